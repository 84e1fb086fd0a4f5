//! Branches, exception generation and exception return.

use a64_cpu::{Cond, Flag, Width};
use a64_decoder::Fields;

use super::emit::{bin, cmp, cond_holds, copy, gpr, mov, return_unless};
use super::format::{asm, branch_offset, cond, imm, reg, uimm, xreg};
use super::Builder;
use crate::ctx::CompileCtx;
use crate::error::JitError;
use crate::ir::{BinOp, CmpOp, ElBank, IrOp, Operand, Place, Ty};

pub(super) fn register(b: &mut Builder) {
    b.insn("b.cond", "0101010 0 imm19:19 0 cond:4", fmt_b_cond, emit_b_cond);
    b.insn("bc.cond", "0101010 0 imm19:19 1 cond:4", fmt_b_cond, emit_b_cond);
    b.insn("cbz", "sf:1 011010 op:1 imm19:19 Rt:5", fmt_cbz, emit_cbz);
    b.insn("tbz", "b5:1 011011 op:1 b40:5 imm14:14 Rt:5", fmt_tbz, emit_tbz);
    b.insn("b", "op:1 00101 imm26:26", fmt_b, emit_b);

    b.insn("br", "1101011 0000 11111 000000 Rn:5 00000", fmt_reg_branch, emit_br);
    b.insn("blr", "1101011 0001 11111 000000 Rn:5 00000", fmt_reg_branch, emit_blr);
    b.insn("ret", "1101011 0010 11111 000000 Rn:5 00000", fmt_ret, emit_ret);
    b.insn("eret", "1101011 0100 11111 000000 11111 00000", fmt_eret, emit_eret);

    b.decode_only("svc", "11010100 000 imm16:16 000 01", fmt_exception);
    b.decode_only("hvc", "11010100 000 imm16:16 000 10", fmt_exception);
    b.decode_only("smc", "11010100 000 imm16:16 000 11", fmt_exception);
    b.decode_only("brk", "11010100 001 imm16:16 000 00", fmt_exception);
    b.decode_only("hlt", "11010100 010 imm16:16 000 00", fmt_exception);
}

fn target(ctx: &CompileCtx<'_>, field: u32, bits: u32) -> u64 {
    ctx.pc().wrapping_add(branch_offset(field, bits) as u64)
}

fn fmt_b_cond(f: &Fields) -> String {
    let [imm19, c] = f.take(["imm19", "cond"]);
    let prefix = if f.word() & (1 << 4) != 0 { "bc" } else { "b" };
    asm(
        &format!("{prefix}.{}", cond(c)),
        &[imm(branch_offset(imm19, 19))],
    )
}

fn emit_b_cond(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [imm19, c] = f.take(["imm19", "cond"]);
    let to = target(ctx, imm19, 19);
    let c = Cond::from_bits(c);
    if c.is_always() {
        return ctx.branch(to, None);
    }
    let taken = cond_holds(ctx, c)?;
    ctx.branch(to, Some(taken.into()))?;
    ctx.release(taken)
}

fn fmt_cbz(f: &Fields) -> String {
    let [sf, op, imm19, rt] = f.take(["sf", "op", "imm19", "Rt"]);
    let mnemonic = if op == 0 { "cbz" } else { "cbnz" };
    asm(mnemonic, &[reg(rt, sf), imm(branch_offset(imm19, 19))])
}

fn emit_cbz(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, op, imm19, rt] = f.take(["sf", "op", "imm19", "Rt"]);
    let to = target(ctx, imm19, 19);
    let taken = ctx.alloc(Ty::I32);
    let op = if op == 0 { CmpOp::Eq } else { CmpOp::Ne };
    cmp(ctx, taken, op, Width::from_sf(sf), gpr(rt), Operand::Imm(0));
    ctx.branch(to, Some(taken.into()))?;
    ctx.release(taken)
}

fn fmt_tbz(f: &Fields) -> String {
    let [b5, op, b40, imm14, rt] = f.take(["b5", "op", "b40", "imm14", "Rt"]);
    let mnemonic = if op == 0 { "tbz" } else { "tbnz" };
    asm(
        mnemonic,
        &[
            reg(rt, b5),
            imm(i64::from((b5 << 5) | b40)),
            imm(branch_offset(imm14, 14)),
        ],
    )
}

fn emit_tbz(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [b5, op, b40, imm14, rt] = f.take(["b5", "op", "b40", "imm14", "Rt"]);
    let to = target(ctx, imm14, 14);
    let bit = ctx.alloc(Ty::I64);
    bin(
        ctx,
        bit,
        BinOp::ShrU,
        Width::W64,
        gpr(rt),
        Operand::Imm(u64::from((b5 << 5) | b40)),
    );
    bin(ctx, bit, BinOp::And, Width::W64, bit, Operand::Imm(1));
    let taken = ctx.alloc(Ty::I32);
    // TBZ branches when the bit is clear, TBNZ when it is set.
    let op = if op == 0 { CmpOp::Eq } else { CmpOp::Ne };
    cmp(ctx, taken, op, Width::W64, bit, Operand::Imm(0));
    ctx.release(bit)?;
    ctx.branch(to, Some(taken.into()))?;
    ctx.release(taken)
}

fn fmt_b(f: &Fields) -> String {
    let [op, imm26] = f.take(["op", "imm26"]);
    let mnemonic = if op == 0 { "b" } else { "bl" };
    asm(mnemonic, &[imm(branch_offset(imm26, 26))])
}

fn emit_b(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [op, imm26] = f.take(["op", "imm26"]);
    let to = target(ctx, imm26, 26);
    if op == 0 {
        return ctx.branch(to, None);
    }

    let link = ctx.pc().wrapping_add(4);
    let slot = ctx.function_slot(to);
    mov(ctx, Some(Place::X(30)), Operand::Imm(link), Width::W64);
    let returned = ctx.alloc(Ty::I64);
    ctx.emit(IrOp::CallSlot {
        dst: returned.into(),
        slot,
    });
    return_unless(ctx, returned, link)?;
    ctx.release(returned)
}

fn fmt_reg_branch(f: &Fields) -> String {
    let mnemonic = if f.word() & (1 << 21) != 0 { "blr" } else { "br" };
    asm(mnemonic, &[xreg(f.get("Rn"))])
}

fn emit_br(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let returned = ctx.alloc(Ty::I64);
    ctx.emit(IrOp::JumpToPc {
        dst: returned.into(),
        target: gpr(f.get("Rn")),
    });
    ctx.emit(IrOp::Return {
        value: returned.into(),
    });
    ctx.release(returned)?;
    ctx.stop()
}

fn emit_blr(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    // Read the target before linking: `blr x30` jumps to the old x30.
    let to = copy(ctx, gpr(f.get("Rn")));
    let link = ctx.pc().wrapping_add(4);
    mov(ctx, Some(Place::X(30)), Operand::Imm(link), Width::W64);
    let returned = ctx.alloc(Ty::I64);
    ctx.emit(IrOp::JumpToPc {
        dst: returned.into(),
        target: to.into(),
    });
    ctx.release(to)?;
    return_unless(ctx, returned, link)?;
    ctx.release(returned)
}

fn fmt_ret(f: &Fields) -> String {
    match f.get("Rn") {
        30 => "ret".to_string(),
        rn => asm("ret", &[xreg(rn)]),
    }
}

fn emit_ret(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    ctx.emit(IrOp::Return {
        value: gpr(f.get("Rn")),
    });
    ctx.stop()
}

fn fmt_eret(_: &Fields) -> String {
    "eret".to_string()
}

fn emit_eret(ctx: &mut CompileCtx<'_>, _: &Fields) -> Result<(), JitError> {
    // Both banked registers are read before PSTATE.EL changes underneath them.
    let spsr = copy(ctx, Place::Spsr(ElBank::Current).into());
    let elr = copy(ctx, Place::Elr(ElBank::Current).into());
    let t = ctx.alloc(Ty::I64);
    for (flag, bit) in [(Flag::N, 31), (Flag::Z, 30), (Flag::C, 29), (Flag::V, 28)] {
        bin(ctx, t, BinOp::ShrU, Width::W64, spsr, Operand::Imm(bit));
        bin(ctx, Place::Flag(flag), BinOp::And, Width::W64, t, Operand::Imm(1));
    }
    bin(ctx, Place::SpSel, BinOp::And, Width::W64, spsr, Operand::Imm(1));
    bin(ctx, t, BinOp::ShrU, Width::W64, spsr, Operand::Imm(2));
    bin(ctx, Place::El, BinOp::And, Width::W64, t, Operand::Imm(3));
    ctx.emit(IrOp::Return { value: elr.into() });
    for local in [spsr, elr, t] {
        ctx.release(local)?;
    }
    ctx.stop()
}

fn fmt_exception(f: &Fields) -> String {
    let mnemonic = match (f.word() >> 21) & 7 {
        0 => match f.word() & 3 {
            1 => "svc",
            2 => "hvc",
            _ => "smc",
        },
        1 => "brk",
        _ => "hlt",
    };
    asm(mnemonic, &[uimm(u64::from(f.get("imm16")))])
}

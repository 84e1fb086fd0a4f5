//! Hints, barriers and system-register access.
//!
//! `MRS`/`MSR` resolve the register's binding while compiling, so a known register becomes a
//! direct state access and an unknown one reads as zero or drops the write.

use a64_cpu::sysreg::{self, SysRegBinding, DAIF_MASK};
use a64_cpu::{Flag, Width};
use a64_decoder::Fields;

use super::emit::{bin, dst, gpr, mov};
use super::format::{asm, imm, xreg};
use super::Builder;
use crate::ctx::CompileCtx;
use crate::error::JitError;
use crate::ir::{BinOp, ElBank, Operand, Place, Ty};

pub(super) fn register(b: &mut Builder) {
    b.insn("hint", "1101010100 0 00 011 0010 CRm:4 op2:3 11111", fmt_hint, emit_nothing);
    b.insn("clrex", "1101010100 0 00 011 0011 CRm:4 010 11111", fmt_clrex, emit_nothing);
    b.insn("dsb", "1101010100 0 00 011 0011 CRm:4 100 11111", fmt_dsb, emit_nothing);
    b.insn("dmb", "1101010100 0 00 011 0011 CRm:4 101 11111", fmt_dmb, emit_nothing);
    b.insn("isb", "1101010100 0 00 011 0011 CRm:4 110 11111", fmt_isb, emit_nothing);

    b.insn("msr spsel", "1101010100 0 00 000 0100 CRm:4 101 11111", fmt_msr_imm, emit_msr_spsel);
    b.insn("msr daifset", "1101010100 0 00 011 0100 CRm:4 110 11111", fmt_msr_imm, emit_msr_daifset);
    b.insn("msr daifclr", "1101010100 0 00 011 0100 CRm:4 111 11111", fmt_msr_imm, emit_msr_daifclr);

    b.insn("sys", "1101010100 0 01 op1:3 CRn:4 CRm:4 op2:3 Rt:5", fmt_sys, emit_nothing);
    b.insn("msr", "1101010100 0 1 o0:1 op1:3 CRn:4 CRm:4 op2:3 Rt:5", fmt_msr, emit_msr);
    b.insn("mrs", "1101010100 1 1 o0:1 op1:3 CRn:4 CRm:4 op2:3 Rt:5", fmt_mrs, emit_mrs);
}

/// Hints, barriers and cache maintenance have no architectural effect on a single core.
fn emit_nothing(_: &mut CompileCtx<'_>, _: &Fields) -> Result<(), JitError> {
    Ok(())
}

fn fmt_hint(f: &Fields) -> String {
    let [crm, op2] = f.take(["CRm", "op2"]);
    match (crm << 3) | op2 {
        0 => "nop".to_string(),
        1 => "yield".to_string(),
        2 => "wfe".to_string(),
        3 => "wfi".to_string(),
        4 => "sev".to_string(),
        5 => "sevl".to_string(),
        n => asm("hint", &[imm(i64::from(n))]),
    }
}

fn fmt_clrex(f: &Fields) -> String {
    match f.get("CRm") {
        15 => "clrex".to_string(),
        n => asm("clrex", &[imm(i64::from(n))]),
    }
}

fn barrier_option(crm: u32) -> String {
    let name = match crm {
        15 => "sy",
        14 => "st",
        13 => "ld",
        11 => "ish",
        10 => "ishst",
        9 => "ishld",
        7 => "nsh",
        6 => "nshst",
        5 => "nshld",
        3 => "osh",
        2 => "oshst",
        1 => "oshld",
        n => return imm(i64::from(n)),
    };
    name.to_string()
}

fn fmt_dsb(f: &Fields) -> String {
    match f.get("CRm") {
        0 => "ssbb".to_string(),
        4 => "pssbb".to_string(),
        crm => asm("dsb", &[barrier_option(crm)]),
    }
}

fn fmt_dmb(f: &Fields) -> String {
    asm("dmb", &[barrier_option(f.get("CRm"))])
}

fn fmt_isb(f: &Fields) -> String {
    match f.get("CRm") {
        15 => "isb".to_string(),
        n => asm("isb", &[imm(i64::from(n))]),
    }
}

fn fmt_msr_imm(f: &Fields) -> String {
    let target = match (f.word() >> 5) & 7 {
        0b101 => "spsel",
        0b110 => "daifset",
        _ => "daifclr",
    };
    asm("msr", &[target.to_string(), imm(i64::from(f.get("CRm")))])
}

fn emit_msr_spsel(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let bit = u64::from(f.get("CRm") & 1);
    mov(ctx, Some(Place::SpSel), Operand::Imm(bit), Width::W64);
    Ok(())
}

fn emit_msr_daifset(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let bits = u64::from(f.get("CRm")) << 6;
    bin(ctx, Place::Daif, BinOp::Or, Width::W64, Place::Daif, Operand::Imm(bits));
    Ok(())
}

fn emit_msr_daifclr(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let keep = !(u64::from(f.get("CRm")) << 6) & DAIF_MASK;
    bin(ctx, Place::Daif, BinOp::And, Width::W64, Place::Daif, Operand::Imm(keep));
    Ok(())
}

fn fmt_sys(f: &Fields) -> String {
    let [op1, crn, crm, op2, rt] = f.take(["op1", "CRn", "CRm", "op2", "Rt"]);
    let mut operands = vec![
        imm(i64::from(op1)),
        format!("c{crn}"),
        format!("c{crm}"),
        imm(i64::from(op2)),
    ];
    if rt != 31 {
        operands.push(xreg(rt));
    }
    asm("sys", &operands)
}

fn selector_of(f: &Fields) -> u16 {
    let [o0, op1, crn, crm, op2] = f.take(["o0", "op1", "CRn", "CRm", "op2"]);
    sysreg::selector(2 + o0, op1, crn, crm, op2)
}

fn fmt_msr(f: &Fields) -> String {
    asm("msr", &[sysreg::name(selector_of(f)), xreg(f.get("Rt"))])
}

fn fmt_mrs(f: &Fields) -> String {
    asm("mrs", &[xreg(f.get("Rt")), sysreg::name(selector_of(f))])
}

fn banked(el: u8) -> ElBank {
    ElBank::El(el)
}

fn emit_msr(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let Some(binding) = sysreg::lookup(selector_of(f)).and_then(|def| def.write) else {
        return Ok(());
    };
    let value = gpr(f.get("Rt"));
    let place = match binding {
        SysRegBinding::Const(_) | SysRegBinding::CurrentEl => return Ok(()),
        SysRegBinding::SpSel => {
            bin(ctx, Place::SpSel, BinOp::And, Width::W64, value, Operand::Imm(1));
            return Ok(());
        }
        SysRegBinding::Daif => {
            bin(ctx, Place::Daif, BinOp::And, Width::W64, value, Operand::Imm(DAIF_MASK));
            return Ok(());
        }
        SysRegBinding::Nzcv => {
            let t = ctx.alloc(Ty::I64);
            for (flag, bit) in [(Flag::N, 31), (Flag::Z, 30), (Flag::C, 29), (Flag::V, 28)] {
                bin(ctx, t, BinOp::ShrU, Width::W64, value, Operand::Imm(bit));
                bin(ctx, Place::Flag(flag), BinOp::And, Width::W64, t, Operand::Imm(1));
            }
            return ctx.release(t);
        }
        SysRegBinding::Backed(slot) => Place::Sys(slot),
        SysRegBinding::StackPointer(el) => Place::SpEl(el),
        SysRegBinding::Elr(el) => Place::Elr(banked(el)),
        SysRegBinding::Spsr(el) => Place::Spsr(banked(el)),
    };
    mov(ctx, Some(place), value, Width::W64);
    Ok(())
}

fn emit_mrs(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let Some(rt) = dst(f.get("Rt")) else {
        return Ok(());
    };
    let binding = sysreg::lookup(selector_of(f)).and_then(|def| def.read);
    let src: Operand = match binding {
        None => Operand::Imm(0),
        Some(SysRegBinding::Const(value)) => Operand::Imm(value),
        Some(SysRegBinding::Backed(slot)) => Place::Sys(slot).into(),
        Some(SysRegBinding::SpSel) => Place::SpSel.into(),
        Some(SysRegBinding::Daif) => Place::Daif.into(),
        Some(SysRegBinding::StackPointer(el)) => Place::SpEl(el).into(),
        Some(SysRegBinding::Elr(el)) => Place::Elr(banked(el)).into(),
        Some(SysRegBinding::Spsr(el)) => Place::Spsr(banked(el)).into(),
        Some(SysRegBinding::CurrentEl) => {
            bin(ctx, rt, BinOp::Shl, Width::W64, Place::El, Operand::Imm(2));
            return Ok(());
        }
        Some(SysRegBinding::Nzcv) => {
            let acc = ctx.alloc(Ty::I64);
            let t = ctx.alloc(Ty::I64);
            mov(ctx, Some(acc.into()), Operand::Imm(0), Width::W64);
            for (flag, bit) in [(Flag::N, 31), (Flag::Z, 30), (Flag::C, 29), (Flag::V, 28)] {
                bin(ctx, t, BinOp::Shl, Width::W64, Place::Flag(flag), Operand::Imm(bit));
                bin(ctx, acc, BinOp::Or, Width::W64, acc, t);
            }
            mov(ctx, Some(rt), acc.into(), Width::W64);
            ctx.release(t)?;
            return ctx.release(acc);
        }
    };
    mov(ctx, Some(rt), src, Width::W64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::catalog::decode;

    fn text(word: u32) -> String {
        let (def, fields) = decode(word).unwrap();
        (def.format)(&fields)
    }

    #[test]
    fn hints_and_barriers() {
        assert_eq!(text(0xd503201f), "nop");
        assert_eq!(text(0xd503203f), "yield");
        assert_eq!(text(0xd503207f), "wfi");
        assert_eq!(text(0xd50320bf), "sevl");
        assert_eq!(text(0xd503233f), "hint #0x19");
        assert_eq!(text(0xd5033f5f), "clrex");
        assert_eq!(text(0xd5033f9f), "dsb sy");
        assert_eq!(text(0xd5033b9f), "dsb ish");
        assert_eq!(text(0xd503309f), "ssbb");
        assert_eq!(text(0xd5033bbf), "dmb ish");
        assert_eq!(text(0xd50339bf), "dmb ishld");
        assert_eq!(text(0xd5033fdf), "isb");
    }

    #[test]
    fn system_register_moves() {
        assert_eq!(text(0xd5384253), "mrs x19, currentel");
        assert_eq!(text(0xd5181000), "msr sctlr_el1, x0");
        assert_eq!(text(0xd53b4200), "mrs x0, nzcv");
        assert_eq!(text(0xd5394f20), "mrs x0, s3_1_c4_c15_1");
        assert_eq!(text(0xd50041bf), "msr spsel, #1");
        assert_eq!(text(0xd50346df), "msr daifset, #6");
        assert_eq!(text(0xd5034fff), "msr daifclr, #0xf");
        assert_eq!(text(0xd508751f), "sys #0, c7, c5, #0");
    }
}

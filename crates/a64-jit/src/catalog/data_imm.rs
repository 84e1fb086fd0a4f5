//! Data processing with immediate operands.

use a64_cpu::bits::{decode_bit_masks, decode_logical_immediate, sign_extend};
use a64_cpu::Width;
use a64_decoder::Fields;

use super::emit::{
    add_with_carry, bin, copy, dst, dst_or_sp, gpr, gpr_or_sp, mov, reserved, set_logical_flags,
};
use super::format::{asm, imm, reg, reg_sp, uimm, unallocated, wreg};
use super::Builder;
use crate::ctx::CompileCtx;
use crate::error::JitError;
use crate::ir::{BinOp, Operand, Place, Ty};

pub(super) fn register(b: &mut Builder) {
    b.insn("adr", "op:1 immlo:2 10000 immhi:19 Rd:5", fmt_adr, emit_adr);
    b.insn(
        "add/sub immediate",
        "sf:1 op:1 S:1 100010 sh:1 imm12:12 Rn:5 Rd:5",
        fmt_add_sub,
        emit_add_sub,
    );
    b.insn(
        "logical immediate",
        "sf:1 opc:2 100100 N:1 immr:6 imms:6 Rn:5 Rd:5",
        fmt_logical,
        emit_logical,
    );
    b.insn(
        "move wide",
        "sf:1 opc:2 100101 hw:2 imm16:16 Rd:5",
        fmt_move_wide,
        emit_move_wide,
    )
    .not("opc", &[1]);
    b.insn(
        "bitfield",
        "sf:1 opc:2 100110 N:1 immr:6 imms:6 Rn:5 Rd:5",
        fmt_bitfield,
        emit_bitfield,
    )
    .not("opc", &[3]);
    b.insn(
        "extr",
        "sf:1 00 100111 N:1 0 Rm:5 imms:6 Rn:5 Rd:5",
        fmt_extr,
        emit_extr,
    );
}

fn adr_offset(f: &Fields) -> i64 {
    let [op, immlo, immhi] = f.take(["op", "immlo", "immhi"]);
    let offset = sign_extend(u64::from((immhi << 2) | immlo), 21);
    if op == 1 {
        offset << 12
    } else {
        offset
    }
}

fn fmt_adr(f: &Fields) -> String {
    let name = if f.get("op") == 1 { "adrp" } else { "adr" };
    asm(name, &[reg(f.get("Rd"), 1), imm(adr_offset(f))])
}

fn emit_adr(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let base = if f.get("op") == 1 {
        ctx.pc() & !0xfff
    } else {
        ctx.pc()
    };
    let value = base.wrapping_add(adr_offset(f) as u64);
    mov(ctx, dst(f.get("Rd")), Operand::Imm(value), Width::W64);
    Ok(())
}

fn fmt_add_sub(f: &Fields) -> String {
    let [sf, op, s, sh, imm12, rn, rd] = f.take(["sf", "op", "S", "sh", "imm12", "Rn", "Rd"]);
    let mut operands = Vec::new();
    let name = match (op, s) {
        (0, 0) if sh == 0 && imm12 == 0 && (rd == 31 || rn == 31) => {
            return asm("mov", &[reg_sp(rd, sf), reg_sp(rn, sf)]);
        }
        (_, 1) if rd == 31 => {
            operands.push(reg_sp(rn, sf));
            if op == 1 {
                "cmp"
            } else {
                "cmn"
            }
        }
        _ => {
            operands.push(if s == 1 { reg(rd, sf) } else { reg_sp(rd, sf) });
            operands.push(reg_sp(rn, sf));
            ["add", "adds", "sub", "subs"][(op * 2 + s) as usize]
        }
    };
    operands.push(uimm(u64::from(imm12)));
    if sh == 1 {
        operands.push("lsl #0xc".to_string());
    }
    asm(name, &operands)
}

fn emit_add_sub(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, op, s, sh, imm12, rn, rd] = f.take(["sf", "op", "S", "sh", "imm12", "Rn", "Rd"]);
    let width = Width::from_sf(sf);
    let value = u64::from(imm12) << (12 * sh);
    let x = gpr_or_sp(rn);
    if s == 0 {
        let op = if op == 1 { BinOp::Sub } else { BinOp::Add };
        bin(ctx, dst_or_sp(rd), op, width, x, Operand::Imm(value));
        return Ok(());
    }
    // SUBS is x + !imm + 1.
    let (y, carry) = if op == 1 {
        (!value & width.mask(), 1)
    } else {
        (value, 0)
    };
    let result = add_with_carry(ctx, width, x, Operand::Imm(y), Operand::Imm(carry), true)?;
    mov(ctx, dst(rd), result.into(), width);
    ctx.release(result)
}

/// Whether `ORR Rd, ZR, #imm` would be spelled with a `MOVZ`/`MOVN` instead.
fn move_wide_preferred(sf: u32, n: u32, imms: u32, immr: u32) -> bool {
    let width = if sf == 1 { 64 } else { 32 };
    if sf == 1 && n != 1 {
        return false;
    }
    if sf == 0 && (n != 0 || imms & 0x20 != 0) {
        return false;
    }
    if imms < 16 {
        return (immr.wrapping_neg() % 16) <= 15 - imms;
    }
    if imms >= width - 15 {
        return immr % 16 <= imms - (width - 15);
    }
    false
}

fn logical_immediate(f: &Fields) -> Option<(Width, u64)> {
    let [sf, n, immr, imms] = f.take(["sf", "N", "immr", "imms"]);
    if sf == 0 && n == 1 {
        return None;
    }
    let width = Width::from_sf(sf);
    decode_logical_immediate(n, imms, immr, width).map(|value| (width, value))
}

fn fmt_logical(f: &Fields) -> String {
    let [sf, opc, n, immr, imms, rn, rd] = f.take(["sf", "opc", "N", "immr", "imms", "Rn", "Rd"]);
    let Some((_, value)) = logical_immediate(f) else {
        return unallocated(f);
    };
    match opc {
        3 if rd == 31 => asm("tst", &[reg(rn, sf), uimm(value)]),
        1 if rn == 31 && !move_wide_preferred(sf, n, imms, immr) => {
            asm("mov", &[reg_sp(rd, sf), uimm(value)])
        }
        _ => {
            let name = ["and", "orr", "eor", "ands"][opc as usize];
            let rd = if opc == 3 { reg(rd, sf) } else { reg_sp(rd, sf) };
            asm(name, &[rd, reg(rn, sf), uimm(value)])
        }
    }
}

fn emit_logical(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [opc, rn, rd] = f.take(["opc", "Rn", "Rd"]);
    let Some((width, value)) = logical_immediate(f) else {
        return Err(reserved(ctx, f));
    };
    let op = match opc {
        1 => BinOp::Or,
        2 => BinOp::Xor,
        _ => BinOp::And,
    };
    if opc != 3 {
        bin(ctx, dst_or_sp(rd), op, width, gpr(rn), Operand::Imm(value));
        return Ok(());
    }
    let result = ctx.alloc(Ty::I64);
    bin(ctx, result, op, width, gpr(rn), Operand::Imm(value));
    set_logical_flags(ctx, width, result.into());
    mov(ctx, dst(rd), result.into(), width);
    ctx.release(result)
}

fn fmt_move_wide(f: &Fields) -> String {
    let [sf, opc, hw, imm16, rd] = f.take(["sf", "opc", "hw", "imm16", "Rd"]);
    if sf == 0 && hw >= 2 {
        return unallocated(f);
    }
    let width = Width::from_sf(sf);
    let shift = hw * 16;
    let shifted = u64::from(imm16) << shift;
    let alias = !(imm16 == 0 && hw != 0);
    match opc {
        2 if alias => return asm("mov", &[reg(rd, sf), uimm(shifted)]),
        0 if alias && (sf == 1 || imm16 != 0xffff) => {
            let value = sign_extend(!shifted & width.mask(), width.bits());
            return asm("mov", &[reg(rd, sf), imm(value)]);
        }
        _ => {}
    }
    let name = match opc {
        0 => "movn",
        2 => "movz",
        _ => "movk",
    };
    let mut operands = vec![reg(rd, sf), uimm(u64::from(imm16))];
    if shift != 0 {
        operands.push(format!("lsl {}", imm(i64::from(shift))));
    }
    asm(name, &operands)
}

fn emit_move_wide(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, opc, hw, imm16, rd] = f.take(["sf", "opc", "hw", "imm16", "Rd"]);
    if sf == 0 && hw >= 2 {
        return Err(reserved(ctx, f));
    }
    let width = Width::from_sf(sf);
    let shifted = u64::from(imm16) << (hw * 16);
    let Some(rd) = dst(rd) else {
        return Ok(());
    };
    match opc {
        0 => mov(ctx, Some(rd), Operand::Imm(!shifted & width.mask()), width),
        2 => mov(ctx, Some(rd), Operand::Imm(shifted), width),
        _ => {
            let keep = !(0xffffu64 << (hw * 16));
            bin(ctx, rd, BinOp::And, width, rd, Operand::Imm(keep));
            bin(ctx, rd, BinOp::Or, width, rd, Operand::Imm(shifted));
        }
    }
    Ok(())
}

/// Whether a bitfield move is best shown as `sbfx`/`ubfx`.
fn bfx_preferred(sf: u32, unsigned: bool, imms: u32, immr: u32) -> bool {
    let top = if sf == 1 { 63 } else { 31 };
    if imms < immr || imms == top {
        return false;
    }
    if immr == 0 {
        if sf == 0 && (imms == 7 || imms == 15) {
            return false;
        }
        if sf == 1 && !unsigned && (imms == 7 || imms == 15 || imms == 31) {
            return false;
        }
    }
    true
}

fn fmt_bitfield(f: &Fields) -> String {
    let [sf, opc, n, immr, imms, rn, rd] = f.take(["sf", "opc", "N", "immr", "imms", "Rn", "Rd"]);
    let width = Width::from_sf(sf);
    if n != sf || decode_bit_masks(n, imms, immr, false, width).is_none() {
        return unallocated(f);
    }
    let bits = width.bits();
    let (d, s) = (reg(rd, sf), reg(rn, sf));
    let num = |v: u32| imm(i64::from(v));
    let lsb_ins = (bits - immr) & (bits - 1);
    match opc {
        // SBFM
        0 => {
            if imms == bits - 1 {
                asm("asr", &[d, s, num(immr)])
            } else if imms < immr {
                asm("sbfiz", &[d, s, num(lsb_ins), num(imms + 1)])
            } else if bfx_preferred(sf, false, imms, immr) {
                asm("sbfx", &[d, s, num(immr), num(imms - immr + 1)])
            } else if immr == 0 && (imms == 7 || imms == 15 || imms == 31) {
                let name = match imms {
                    7 => "sxtb",
                    15 => "sxth",
                    _ => "sxtw",
                };
                asm(name, &[d, wreg(rn)])
            } else {
                asm("sbfm", &[d, s, num(immr), num(imms)])
            }
        }
        // BFM
        1 => {
            if imms < immr {
                if rn == 31 {
                    asm("bfc", &[d, num(lsb_ins), num(imms + 1)])
                } else {
                    asm("bfi", &[d, s, num(lsb_ins), num(imms + 1)])
                }
            } else {
                asm("bfxil", &[d, s, num(immr), num(imms - immr + 1)])
            }
        }
        // UBFM
        _ => {
            if imms != bits - 1 && imms + 1 == immr {
                asm("lsl", &[d, s, num(bits - 1 - imms)])
            } else if imms == bits - 1 {
                asm("lsr", &[d, s, num(immr)])
            } else if imms < immr {
                asm("ubfiz", &[d, s, num(lsb_ins), num(imms + 1)])
            } else if bfx_preferred(sf, true, imms, immr) {
                asm("ubfx", &[d, s, num(immr), num(imms - immr + 1)])
            } else if immr == 0 && (imms == 7 || imms == 15) {
                let name = if imms == 7 { "uxtb" } else { "uxth" };
                asm(name, &[d, wreg(rn)])
            } else {
                asm("ubfm", &[d, s, num(immr), num(imms)])
            }
        }
    }
}

fn emit_bitfield(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, opc, n, immr, imms, rn, rd] = f.take(["sf", "opc", "N", "immr", "imms", "Rn", "Rd"]);
    let width = Width::from_sf(sf);
    let masks = (n == sf)
        .then(|| decode_bit_masks(n, imms, immr, false, width))
        .flatten();
    let Some((wmask, tmask)) = masks else {
        return Err(reserved(ctx, f));
    };
    let Some(rd_place) = dst(rd) else {
        return Ok(());
    };
    let src = gpr(rn);

    // bot = (dst & !wmask) | (ROR(src, R) & wmask), BFM keeps dst bits, the others start at 0.
    let bot = ctx.alloc(Ty::I64);
    bin(ctx, bot, BinOp::RotR, width, src, Operand::Imm(u64::from(immr)));
    bin(ctx, bot, BinOp::And, width, bot, Operand::Imm(wmask));
    if opc == 1 {
        let kept = ctx.alloc(Ty::I64);
        bin(ctx, kept, BinOp::And, width, rd_place, Operand::Imm(!wmask));
        bin(ctx, bot, BinOp::Or, width, bot, kept);
        ctx.release(kept)?;
    }

    // top: SBFM replicates src<S>, BFM keeps dst, UBFM is zero.
    let result = ctx.alloc(Ty::I64);
    bin(ctx, result, BinOp::And, width, bot, Operand::Imm(tmask));
    let top = match opc {
        0 => {
            let top = ctx.alloc(Ty::I64);
            let bits = width.bits();
            bin(ctx, top, BinOp::Shl, width, src, Operand::Imm(u64::from(bits - 1 - imms)));
            bin(ctx, top, BinOp::ShrS, width, top, Operand::Imm(u64::from(bits - 1)));
            Some(top)
        }
        1 => Some(copy(ctx, rd_place.into())),
        _ => None,
    };
    if let Some(top) = top {
        bin(ctx, top, BinOp::And, width, top, Operand::Imm(!tmask));
        bin(ctx, result, BinOp::Or, width, result, top);
        ctx.release(top)?;
    }
    mov(ctx, Some(rd_place), result.into(), width);
    ctx.release(result)?;
    ctx.release(bot)
}

fn fmt_extr(f: &Fields) -> String {
    let [sf, n, rm, imms, rn, rd] = f.take(["sf", "N", "Rm", "imms", "Rn", "Rd"]);
    if n != sf || (sf == 0 && imms >= 32) {
        return unallocated(f);
    }
    let lsb = imm(i64::from(imms));
    if rn == rm {
        asm("ror", &[reg(rd, sf), reg(rn, sf), lsb])
    } else {
        asm("extr", &[reg(rd, sf), reg(rn, sf), reg(rm, sf), lsb])
    }
}

fn emit_extr(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, n, rm, imms, rn, rd] = f.take(["sf", "N", "Rm", "imms", "Rn", "Rd"]);
    if n != sf || (sf == 0 && imms >= 32) {
        return Err(reserved(ctx, f));
    }
    let width = Width::from_sf(sf);
    if imms == 0 {
        mov(ctx, dst(rd), gpr(rm), width);
        return Ok(());
    }
    let low = ctx.alloc(Ty::I64);
    let high = ctx.alloc(Ty::I64);
    bin(ctx, low, BinOp::ShrU, width, gpr(rm), Operand::Imm(u64::from(imms)));
    bin(
        ctx,
        high,
        BinOp::Shl,
        width,
        gpr(rn),
        Operand::Imm(u64::from(width.bits() - imms)),
    );
    bin(ctx, low, BinOp::Or, width, low, high);
    mov(ctx, dst(rd), low.into(), width);
    ctx.release(high)?;
    ctx.release(low)
}

#[cfg(test)]
mod tests {
    use crate::catalog::decode;

    fn text(word: u32) -> String {
        let (def, fields) = decode(word).unwrap();
        (def.format)(&fields)
    }

    #[test]
    fn add_sub_immediate_aliases() {
        assert_eq!(text(0x91000420), "add x0, x1, #1");
        assert_eq!(text(0x910003fd), "mov x29, sp");
        assert_eq!(text(0xd10043ff), "sub sp, sp, #0x10");
        assert_eq!(text(0xf1000421), "subs x1, x1, #1");
        assert_eq!(text(0xf100281f), "cmp x0, #0xa");
        assert_eq!(text(0x3100041f), "cmn w0, #1");
        assert_eq!(text(0x91400420), "add x0, x1, #1, lsl #0xc");
    }

    #[test]
    fn pc_relative_addresses() {
        assert_eq!(text(0x10000040), "adr x0, #8");
        assert_eq!(text(0x90000020), "adrp x0, #0x4000");
        assert_eq!(text(0x10ffffe0), "adr x0, #-4");
    }

    #[test]
    fn logical_immediate_aliases() {
        assert_eq!(text(0x92401c20), "and x0, x1, #0xff");
        // Expressible as MOVZ, so the ORR spelling is kept.
        assert_eq!(text(0xb2401fe0), "orr x0, xzr, #0xff");
        assert_eq!(text(0xb200f3e0), "mov x0, #0x5555555555555555");
        assert_eq!(text(0x7200001f), "tst w0, #1");
        assert_eq!(text(0x12010000), "and w0, w0, #0x80000000");
        // 64-bit immediate field in a 32-bit register.
        assert_eq!(text(0x12401c20), ".inst 0x12401c20");
    }

    #[test]
    fn move_wide_aliases() {
        assert_eq!(text(0xd2800540), "mov x0, #0x2a");
        assert_eq!(text(0xd2a00020), "mov x0, #0x10000");
        assert_eq!(text(0x92800000), "mov x0, #-1");
        assert_eq!(text(0x12800000), "mov w0, #-1");
        assert_eq!(text(0x129fffe0), "movn w0, #0xffff");
        assert_eq!(text(0xf2a00020), "movk x0, #1, lsl #0x10");
        assert_eq!(text(0xd2a00000), "movz x0, #0, lsl #0x10");
        assert_eq!(text(0x52c00020), ".inst 0x52c00020");
    }

    #[test]
    fn bitfield_aliases() {
        assert_eq!(text(0xd37ff820), "lsl x0, x1, #1");
        assert_eq!(text(0xd344fc20), "lsr x0, x1, #4");
        assert_eq!(text(0x9344fc20), "asr x0, x1, #4");
        assert_eq!(text(0x93401c20), "sxtb x0, w1");
        assert_eq!(text(0x93407c20), "sxtw x0, w1");
        assert_eq!(text(0x53001c20), "uxtb w0, w1");
        assert_eq!(text(0x53003c20), "uxth w0, w1");
        assert_eq!(text(0xd3441c20), "ubfx x0, x1, #4, #4");
        assert_eq!(text(0x93441c20), "sbfx x0, x1, #4, #4");
        assert_eq!(text(0xd37c0c20), "ubfiz x0, x1, #4, #4");
        assert_eq!(text(0xb37c0c20), "bfi x0, x1, #4, #4");
        assert_eq!(text(0xb3441c20), "bfxil x0, x1, #4, #4");
    }

    #[test]
    fn extract_and_rotate() {
        assert_eq!(text(0x93c21020), "extr x0, x1, x2, #4");
        assert_eq!(text(0x93c11020), "ror x0, x1, #4");
        assert_eq!(text(0x13811020), "ror w0, w1, #4");
    }
}

//! Data processing with register operands.

use a64_cpu::{Cond, Flag, Width};
use a64_decoder::Fields;

use super::emit::{
    add_with_carry, bin, cond_holds, dst, dst_or_sp, extended, gpr, gpr_or_sp, mov, not, reserved,
    set_logical_flags, shifted,
};
use super::format::{asm, cond, extend_name, imm, reg, reg_sp, shift_suffix, unallocated, wreg, xreg};
use super::Builder;
use crate::ctx::CompileCtx;
use crate::error::JitError;
use crate::ir::{BinOp, IrOp, Local, Operand, Place, Ty};

pub(super) fn register(b: &mut Builder) {
    b.insn(
        "logical shifted register",
        "sf:1 opc:2 01010 shift:2 N:1 Rm:5 imm6:6 Rn:5 Rd:5",
        fmt_logical,
        emit_logical,
    );
    b.insn(
        "add/sub shifted register",
        "sf:1 op:1 S:1 01011 shift:2 0 Rm:5 imm6:6 Rn:5 Rd:5",
        fmt_add_sub_shifted,
        emit_add_sub_shifted,
    )
    .not("shift", &[3]);
    b.insn(
        "add/sub extended register",
        "sf:1 op:1 S:1 01011 00 1 Rm:5 option:3 imm3:3 Rn:5 Rd:5",
        fmt_add_sub_extended,
        emit_add_sub_extended,
    );
    b.insn(
        "adc/sbc",
        "sf:1 op:1 S:1 11010000 Rm:5 000000 Rn:5 Rd:5",
        fmt_adc,
        emit_adc,
    );
    b.insn(
        "ccmp register",
        "sf:1 op:1 1 11010010 Rm:5 cond:4 0 0 Rn:5 0 nzcv:4",
        fmt_ccmp,
        emit_ccmp,
    );
    b.insn(
        "ccmp immediate",
        "sf:1 op:1 1 11010010 imm5:5 cond:4 1 0 Rn:5 0 nzcv:4",
        fmt_ccmp,
        emit_ccmp,
    );
    b.insn(
        "csel",
        "sf:1 op:1 0 11010100 Rm:5 cond:4 0 o2:1 Rn:5 Rd:5",
        fmt_csel,
        emit_csel,
    );
    b.insn(
        "data processing 2-source",
        "sf:1 0 0 11010110 Rm:5 opcode:6 Rn:5 Rd:5",
        fmt_two_source,
        emit_two_source,
    )
    .only("opcode", &[2, 3, 8, 9, 10, 11]);
    b.insn(
        "data processing 3-source",
        "sf:1 00 11011 op31:3 Rm:5 o0:1 Ra:5 Rn:5 Rd:5",
        fmt_three_source,
        emit_three_source,
    )
    .only("op31", &[0, 1, 5]);
}

/// Shifted-register second operand, or the plain register when the shift is a no-op.
fn operand2(
    ctx: &mut CompileCtx<'_>,
    width: Width,
    rm: u32,
    shift: u32,
    amount: u32,
) -> (Operand, Option<Local>) {
    if amount == 0 {
        (gpr(rm), None)
    } else {
        let local = shifted(ctx, width, gpr(rm), shift, amount);
        (local.into(), Some(local))
    }
}

fn release_all(
    ctx: &mut CompileCtx<'_>,
    locals: impl IntoIterator<Item = Option<Local>>,
) -> Result<(), JitError> {
    for local in locals.into_iter().flatten() {
        ctx.release(local)?;
    }
    Ok(())
}

fn fmt_logical(f: &Fields) -> String {
    let [sf, opc, shift, n, rm, imm6, rn, rd] =
        f.take(["sf", "opc", "shift", "N", "Rm", "imm6", "Rn", "Rd"]);
    if sf == 0 && imm6 >= 32 {
        return unallocated(f);
    }
    let (name, mut operands) = match (opc, n) {
        (1, 0) if rn == 31 && shift == 0 && imm6 == 0 => {
            return asm("mov", &[reg(rd, sf), reg(rm, sf)]);
        }
        (1, 1) if rn == 31 => ("mvn", vec![reg(rd, sf), reg(rm, sf)]),
        (3, 0) if rd == 31 => ("tst", vec![reg(rn, sf), reg(rm, sf)]),
        _ => {
            const NAMES: [[&str; 2]; 4] = [
                ["and", "bic"],
                ["orr", "orn"],
                ["eor", "eon"],
                ["ands", "bics"],
            ];
            (
                NAMES[opc as usize][n as usize],
                vec![reg(rd, sf), reg(rn, sf), reg(rm, sf)],
            )
        }
    };
    shift_suffix(&mut operands, shift, imm6);
    asm(name, &operands)
}

fn emit_logical(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, opc, shift, n, rm, imm6, rn, rd] =
        f.take(["sf", "opc", "shift", "N", "Rm", "imm6", "Rn", "Rd"]);
    if sf == 0 && imm6 >= 32 {
        return Err(reserved(ctx, f));
    }
    let width = Width::from_sf(sf);
    let (mut y, shifted) = operand2(ctx, width, rm, shift, imm6);
    let inverted = (n == 1).then(|| not(ctx, width, y));
    if let Some(inverted) = inverted {
        y = inverted.into();
    }
    let op = match opc {
        1 => BinOp::Or,
        2 => BinOp::Xor,
        _ => BinOp::And,
    };
    let result = ctx.alloc(Ty::I64);
    bin(ctx, result, op, width, gpr(rn), y);
    if opc == 3 {
        set_logical_flags(ctx, width, result.into());
    }
    mov(ctx, dst(rd), result.into(), width);
    release_all(ctx, [shifted, inverted, Some(result)])
}

fn fmt_add_sub_shifted(f: &Fields) -> String {
    let [sf, op, s, shift, rm, imm6, rn, rd] =
        f.take(["sf", "op", "S", "shift", "Rm", "imm6", "Rn", "Rd"]);
    if sf == 0 && imm6 >= 32 {
        return unallocated(f);
    }
    let (name, mut operands) = if s == 1 && rd == 31 {
        (
            if op == 1 { "cmp" } else { "cmn" },
            vec![reg(rn, sf), reg(rm, sf)],
        )
    } else if op == 1 && rn == 31 {
        (
            if s == 1 { "negs" } else { "neg" },
            vec![reg(rd, sf), reg(rm, sf)],
        )
    } else {
        (
            ["add", "adds", "sub", "subs"][(op * 2 + s) as usize],
            vec![reg(rd, sf), reg(rn, sf), reg(rm, sf)],
        )
    };
    shift_suffix(&mut operands, shift, imm6);
    asm(name, &operands)
}

/// `rn +/- y`, through the flag-setting adder when `S` is set.
fn add_sub(
    ctx: &mut CompileCtx<'_>,
    width: Width,
    subtract: bool,
    set_flags: bool,
    x: Operand,
    y: Operand,
    rd: Option<Place>,
) -> Result<(), JitError> {
    if !set_flags {
        if let Some(rd) = rd {
            let op = if subtract { BinOp::Sub } else { BinOp::Add };
            bin(ctx, rd, op, width, x, y);
        }
        return Ok(());
    }
    let inverted = subtract.then(|| not(ctx, width, y));
    let y = inverted.map_or(y, Operand::from);
    let result = add_with_carry(ctx, width, x, y, Operand::Imm(subtract as u64), true)?;
    mov(ctx, rd, result.into(), width);
    release_all(ctx, [inverted, Some(result)])
}

fn emit_add_sub_shifted(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, op, s, shift, rm, imm6, rn, rd] =
        f.take(["sf", "op", "S", "shift", "Rm", "imm6", "Rn", "Rd"]);
    if sf == 0 && imm6 >= 32 {
        return Err(reserved(ctx, f));
    }
    let width = Width::from_sf(sf);
    let (y, shifted) = operand2(ctx, width, rm, shift, imm6);
    add_sub(ctx, width, op == 1, s == 1, gpr(rn), y, dst(rd))?;
    release_all(ctx, [shifted])
}

fn fmt_add_sub_extended(f: &Fields) -> String {
    let [sf, op, s, rm, option, imm3, rn, rd] =
        f.take(["sf", "op", "S", "Rm", "option", "imm3", "Rn", "Rd"]);
    if imm3 > 4 {
        return unallocated(f);
    }
    let index = if sf == 1 && option & 3 == 3 {
        xreg(rm)
    } else {
        wreg(rm)
    };
    let (name, mut operands) = if s == 1 && rd == 31 {
        (
            if op == 1 { "cmp" } else { "cmn" },
            vec![reg_sp(rn, sf), index],
        )
    } else {
        let rd = if s == 1 { reg(rd, sf) } else { reg_sp(rd, sf) };
        (
            ["add", "adds", "sub", "subs"][(op * 2 + s) as usize],
            vec![rd, reg_sp(rn, sf), index],
        )
    };
    // With SP involved, the natural-width zero extension is written as LSL.
    let sp_involved = rn == 31 || (s == 0 && rd == 31);
    let natural = if sf == 1 { 3 } else { 2 };
    let amount = imm(i64::from(imm3));
    match (sp_involved && option == natural, imm3) {
        (true, 0) => {}
        (true, _) => operands.push(format!("lsl {amount}")),
        (false, 0) => operands.push(extend_name(option).to_string()),
        (false, _) => operands.push(format!("{} {amount}", extend_name(option))),
    }
    asm(name, &operands)
}

fn emit_add_sub_extended(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, op, s, rm, option, imm3, rn, rd] =
        f.take(["sf", "op", "S", "Rm", "option", "imm3", "Rn", "Rd"]);
    if imm3 > 4 {
        return Err(reserved(ctx, f));
    }
    let width = Width::from_sf(sf);
    let y = extended(ctx, gpr(rm), option, imm3);
    let rd = if s == 1 { dst(rd) } else { Some(dst_or_sp(rd)) };
    add_sub(ctx, width, op == 1, s == 1, gpr_or_sp(rn), y.into(), rd)?;
    ctx.release(y)
}

fn fmt_adc(f: &Fields) -> String {
    let [sf, op, s, rm, rn, rd] = f.take(["sf", "op", "S", "Rm", "Rn", "Rd"]);
    if op == 1 && rn == 31 {
        let name = if s == 1 { "ngcs" } else { "ngc" };
        return asm(name, &[reg(rd, sf), reg(rm, sf)]);
    }
    let name = ["adc", "adcs", "sbc", "sbcs"][(op * 2 + s) as usize];
    asm(name, &[reg(rd, sf), reg(rn, sf), reg(rm, sf)])
}

fn emit_adc(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, op, s, rm, rn, rd] = f.take(["sf", "op", "S", "Rm", "Rn", "Rd"]);
    let width = Width::from_sf(sf);
    let inverted = (op == 1).then(|| not(ctx, width, gpr(rm)));
    let y = inverted.map_or(gpr(rm), Operand::from);
    let carry = Place::Flag(Flag::C).into();
    let result = add_with_carry(ctx, width, gpr(rn), y, carry, s == 1)?;
    mov(ctx, dst(rd), result.into(), width);
    release_all(ctx, [inverted, Some(result)])
}

fn fmt_ccmp(f: &Fields) -> String {
    let [sf, op, c, rn, nzcv] = f.take(["sf", "op", "cond", "Rn", "nzcv"]);
    let name = if op == 1 { "ccmp" } else { "ccmn" };
    let second = match f.try_get("imm5") {
        Some(value) => imm(i64::from(value)),
        None => reg(f.get("Rm"), sf),
    };
    asm(
        name,
        &[
            reg(rn, sf),
            second,
            imm(i64::from(nzcv)),
            cond(c).to_string(),
        ],
    )
}

fn emit_ccmp(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, op, c, rn, nzcv] = f.take(["sf", "op", "cond", "Rn", "nzcv"]);
    let width = Width::from_sf(sf);
    let y = match f.try_get("imm5") {
        Some(value) => Operand::Imm(u64::from(value)),
        None => gpr(f.get("Rm")),
    };

    // The condition reads the incoming flags, so evaluate it before the compare clobbers them.
    let holds = cond_holds(ctx, Cond::from_bits(c))?;
    let inverted = (op == 1).then(|| not(ctx, width, y));
    let y = inverted.map_or(y, Operand::from);
    let result = add_with_carry(ctx, width, gpr(rn), y, Operand::Imm(op.into()), true)?;
    for (flag, bit) in [(Flag::N, 3), (Flag::Z, 2), (Flag::C, 1), (Flag::V, 0)] {
        ctx.emit(IrOp::Select {
            dst: Place::Flag(flag),
            cond: holds.into(),
            if_true: Place::Flag(flag).into(),
            if_false: Operand::Imm(u64::from((nzcv >> bit) & 1)),
        });
    }
    release_all(ctx, [inverted, Some(result), Some(holds)])
}

fn fmt_csel(f: &Fields) -> String {
    let [sf, op, rm, c, o2, rn, rd] = f.take(["sf", "op", "Rm", "cond", "o2", "Rn", "Rd"]);
    let inverted = Cond::from_bits(c).invert();
    if c >> 1 != 7 && rn == rm {
        let alias = match (op, o2, rn) {
            (0, 1, 31) => Some(("cset", vec![reg(rd, sf)])),
            (1, 0, 31) => Some(("csetm", vec![reg(rd, sf)])),
            (0, 1, _) => Some(("cinc", vec![reg(rd, sf), reg(rn, sf)])),
            (1, 0, _) => Some(("cinv", vec![reg(rd, sf), reg(rn, sf)])),
            (1, 1, _) => Some(("cneg", vec![reg(rd, sf), reg(rn, sf)])),
            _ => None,
        };
        if let Some((name, mut operands)) = alias {
            operands.push(inverted.name().to_string());
            return asm(name, &operands);
        }
    }
    let name = ["csel", "csinc", "csinv", "csneg"][(op * 2 + o2) as usize];
    asm(
        name,
        &[
            reg(rd, sf),
            reg(rn, sf),
            reg(rm, sf),
            cond(c).to_string(),
        ],
    )
}

fn emit_csel(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, op, rm, c, o2, rn, rd] = f.take(["sf", "op", "Rm", "cond", "o2", "Rn", "Rd"]);
    let Some(rd) = dst(rd) else {
        return Ok(());
    };
    let width = Width::from_sf(sf);
    let holds = cond_holds(ctx, Cond::from_bits(c))?;
    let otherwise = ctx.alloc(Ty::I64);
    match (op, o2) {
        (0, 0) => mov(ctx, Some(otherwise.into()), gpr(rm), Width::W64),
        (0, _) => bin(ctx, otherwise, BinOp::Add, width, gpr(rm), Operand::Imm(1)),
        (_, 0) => bin(ctx, otherwise, BinOp::Xor, width, gpr(rm), Operand::Imm(u64::MAX)),
        _ => bin(ctx, otherwise, BinOp::Sub, width, Operand::Imm(0), gpr(rm)),
    }
    ctx.emit(IrOp::Select {
        dst: otherwise.into(),
        cond: holds.into(),
        if_true: gpr(rn),
        if_false: otherwise.into(),
    });
    mov(ctx, Some(rd), otherwise.into(), width);
    ctx.release(otherwise)?;
    ctx.release(holds)
}

fn two_source_op(opcode: u32) -> (&'static str, BinOp) {
    match opcode {
        2 => ("udiv", BinOp::DivU),
        3 => ("sdiv", BinOp::DivS),
        8 => ("lsl", BinOp::Shl),
        9 => ("lsr", BinOp::ShrU),
        10 => ("asr", BinOp::ShrS),
        _ => ("ror", BinOp::RotR),
    }
}

fn fmt_two_source(f: &Fields) -> String {
    let [sf, rm, opcode, rn, rd] = f.take(["sf", "Rm", "opcode", "Rn", "Rd"]);
    let (name, _) = two_source_op(opcode);
    asm(name, &[reg(rd, sf), reg(rn, sf), reg(rm, sf)])
}

fn emit_two_source(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, rm, opcode, rn, rd] = f.take(["sf", "Rm", "opcode", "Rn", "Rd"]);
    let (_, op) = two_source_op(opcode);
    if let Some(rd) = dst(rd) {
        // Shift amounts are taken modulo the register width by the IR.
        bin(ctx, rd, op, Width::from_sf(sf), gpr(rn), gpr(rm));
    }
    Ok(())
}

fn fmt_three_source(f: &Fields) -> String {
    let [sf, op31, rm, o0, ra, rn, rd] = f.take(["sf", "op31", "Rm", "o0", "Ra", "Rn", "Rd"]);
    if sf == 0 && op31 != 0 {
        return unallocated(f);
    }
    let (name, alias, long) = match (op31, o0) {
        (0, 0) => ("madd", "mul", false),
        (0, _) => ("msub", "mneg", false),
        (1, 0) => ("smaddl", "smull", true),
        (1, _) => ("smsubl", "smnegl", true),
        (_, 0) => ("umaddl", "umull", true),
        _ => ("umsubl", "umnegl", true),
    };
    let source = |n| if long { wreg(n) } else { reg(n, sf) };
    let mut operands = vec![reg(rd, sf), source(rn), source(rm)];
    if ra == 31 {
        return asm(alias, &operands);
    }
    operands.push(reg(ra, sf));
    asm(name, &operands)
}

fn emit_three_source(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [sf, op31, rm, o0, ra, rn, rd] = f.take(["sf", "op31", "Rm", "o0", "Ra", "Rn", "Rd"]);
    if sf == 0 && op31 != 0 {
        return Err(reserved(ctx, f));
    }
    let width = Width::from_sf(sf);
    let product = ctx.alloc(Ty::I64);
    if op31 == 0 {
        bin(ctx, product, BinOp::Mul, width, gpr(rn), gpr(rm));
    } else {
        // Long multiplies widen both 32-bit sources first.
        let signed = op31 == 1;
        let rhs = ctx.alloc(Ty::I64);
        for (local, src) in [(product, rn), (rhs, rm)] {
            ctx.emit(IrOp::Extend {
                dst: local.into(),
                src: gpr(src),
                bits: 32,
                signed,
            });
        }
        bin(ctx, product, BinOp::Mul, Width::W64, product, rhs);
        ctx.release(rhs)?;
    }
    let op = if o0 == 1 { BinOp::Sub } else { BinOp::Add };
    if let Some(rd) = dst(rd) {
        bin(ctx, rd, op, width, gpr(ra), product);
    }
    ctx.release(product)
}

#[cfg(test)]
mod tests {
    use crate::catalog::decode;

    fn text(word: u32) -> String {
        let (def, fields) = decode(word).unwrap();
        (def.format)(&fields)
    }

    #[test]
    fn logical_shifted_register() {
        assert_eq!(text(0xaa0103e0), "mov x0, x1");
        assert_eq!(text(0x2a0103e0), "mov w0, w1");
        assert_eq!(text(0xaa221020), "orn x0, x1, x2, lsl #4");
        assert_eq!(text(0xaa2103e0), "mvn x0, x1");
        assert_eq!(text(0xea02003f), "tst x1, x2");
        assert_eq!(text(0x8a420420), "and x0, x1, x2, lsr #1");
        assert_eq!(text(0xca820020), "eor x0, x1, x2, asr #0");
        assert_eq!(text(0x0a028020), ".inst 0x0a028020");
    }

    #[test]
    fn add_sub_register_forms() {
        assert_eq!(text(0x8b020020), "add x0, x1, x2");
        assert_eq!(text(0xcb020c20), "sub x0, x1, x2, lsl #3");
        assert_eq!(text(0xeb02003f), "cmp x1, x2");
        assert_eq!(text(0xcb0203e0), "neg x0, x2");
        assert_eq!(text(0x6b0203e0), "negs w0, w2");
        assert_eq!(text(0x8b2163e0), "add x0, sp, x1");
        assert_eq!(text(0x8b224820), "add x0, x1, w2, uxtw #2");
        assert_eq!(text(0x8b22c020), "add x0, x1, w2, sxtw");
        assert_eq!(text(0xeb2263ff), "cmp sp, x2");
        assert_eq!(text(0x9a020020), "adc x0, x1, x2");
        assert_eq!(text(0xfa0203e0), "ngcs x0, x2");
    }

    #[test]
    fn conditional_forms() {
        assert_eq!(text(0x9a821020), "csel x0, x1, x2, ne");
        assert_eq!(text(0x9a9f17e0), "cset x0, eq");
        assert_eq!(text(0xda9f13e0), "csetm x0, eq");
        assert_eq!(text(0x9a811420), "cinc x0, x1, eq");
        assert_eq!(text(0xda810420), "cneg x0, x1, ne");
        assert_eq!(text(0xfa421020), "ccmp x1, x2, #0, ne");
        assert_eq!(text(0xfa450824), "ccmp x1, #5, #4, eq");
        assert_eq!(text(0xba5f1828), "ccmn x1, #0x1f, #8, ne");
    }

    #[test]
    fn multiply_divide_and_variable_shifts() {
        assert_eq!(text(0x9b027c20), "mul x0, x1, x2");
        assert_eq!(text(0x9b020c20), "madd x0, x1, x2, x3");
        assert_eq!(text(0x9b02fc20), "mneg x0, x1, x2");
        assert_eq!(text(0x9b227c20), "smull x0, w1, w2");
        assert_eq!(text(0x9ba28c20), "umsubl x0, w1, w2, x3");
        assert_eq!(text(0x9ac20820), "udiv x0, x1, x2");
        assert_eq!(text(0x1ac20c20), "sdiv w0, w1, w2");
        assert_eq!(text(0x9ac22020), "lsl x0, x1, x2");
        assert_eq!(text(0x9ac22c20), "ror x0, x1, x2");
        assert_eq!(text(0x1b227c20), ".inst 0x1b227c20");
    }
}

//! IR building blocks shared by instruction emitters.

use a64_cpu::{Cond, Flag, Width};
use a64_decoder::Fields;

use crate::ctx::CompileCtx;
use crate::error::JitError;
use crate::ir::{BinOp, CmpOp, IrOp, Local, Operand, Place, Ty};

/// Error for a word that matched a pattern but sits in an unallocated sub-encoding.
pub fn reserved(ctx: &CompileCtx<'_>, f: &Fields) -> JitError {
    JitError::InvalidEncoding {
        pc: ctx.pc(),
        word: f.word(),
    }
}

/// Source register operand; 31 reads as zero.
pub fn gpr(n: u32) -> Operand {
    if n == 31 {
        Operand::Imm(0)
    } else {
        Place::X(n as u8).into()
    }
}

/// Source register operand; 31 is the stack pointer.
pub fn gpr_or_sp(n: u32) -> Operand {
    if n == 31 {
        Place::Sp.into()
    } else {
        Place::X(n as u8).into()
    }
}

/// Destination register; `None` for the zero register.
pub fn dst(n: u32) -> Option<Place> {
    (n != 31).then_some(Place::X(n as u8))
}

pub fn dst_or_sp(n: u32) -> Place {
    if n == 31 {
        Place::Sp
    } else {
        Place::X(n as u8)
    }
}

/// Write `src` truncated to `width`, discarding writes to the zero register.
pub fn mov(ctx: &mut CompileCtx<'_>, dst: Option<Place>, src: Operand, width: Width) {
    if let Some(dst) = dst {
        ctx.emit(IrOp::Mov { dst, src, width });
    }
}

pub fn bin(
    ctx: &mut CompileCtx<'_>,
    dst: impl Into<Place>,
    op: BinOp,
    width: Width,
    lhs: impl Into<Operand>,
    rhs: impl Into<Operand>,
) {
    ctx.emit(IrOp::Bin {
        dst: dst.into(),
        op,
        width,
        lhs: lhs.into(),
        rhs: rhs.into(),
    });
}

pub fn cmp(
    ctx: &mut CompileCtx<'_>,
    dst: impl Into<Place>,
    op: CmpOp,
    width: Width,
    lhs: impl Into<Operand>,
    rhs: impl Into<Operand>,
) {
    ctx.emit(IrOp::Cmp {
        dst: dst.into(),
        op,
        width,
        lhs: lhs.into(),
        rhs: rhs.into(),
    });
}

/// Fresh 64-bit scratch local holding `src`.
pub fn copy(ctx: &mut CompileCtx<'_>, src: Operand) -> Local {
    let local = ctx.alloc(Ty::I64);
    ctx.emit(IrOp::Mov {
        dst: local.into(),
        src,
        width: Width::W64,
    });
    local
}

/// Store the N and Z flags for `result`.
pub fn set_nz(ctx: &mut CompileCtx<'_>, width: Width, result: Operand) {
    bin(
        ctx,
        Place::Flag(Flag::N),
        BinOp::ShrU,
        width,
        result,
        Operand::Imm(u64::from(width.bits() - 1)),
    );
    cmp(
        ctx,
        Place::Flag(Flag::Z),
        CmpOp::Eq,
        width,
        result,
        Operand::Imm(0),
    );
}

/// NZCV for a logical result: N and Z from the value, C and V cleared.
pub fn set_logical_flags(ctx: &mut CompileCtx<'_>, width: Width, result: Operand) {
    set_nz(ctx, width, result);
    for flag in [Flag::C, Flag::V] {
        mov(ctx, Some(Place::Flag(flag)), Operand::Imm(0), Width::W64);
    }
}

/// Bitwise complement of `value` at `width` in a new local.
pub fn not(ctx: &mut CompileCtx<'_>, width: Width, value: Operand) -> Local {
    let local = ctx.alloc(Ty::I64);
    bin(ctx, local, BinOp::Xor, width, value, Operand::Imm(u64::MAX));
    local
}

/// `x + y + carry` at `width` in a new local, optionally setting NZCV.
///
/// Computed in two additions with per-step carry and overflow, combined by XOR; this must
/// match [`a64_cpu::add_with_carry`] exactly.
pub fn add_with_carry(
    ctx: &mut CompileCtx<'_>,
    width: Width,
    x: Operand,
    y: Operand,
    carry: Operand,
    set_flags: bool,
) -> Result<Local, JitError> {
    let sign = Operand::Imm(u64::from(width.bits() - 1));
    let partial = ctx.alloc(Ty::I64);
    let result = ctx.alloc(Ty::I64);
    bin(ctx, partial, BinOp::Add, width, x, y);
    bin(ctx, result, BinOp::Add, width, partial, carry);
    if !set_flags {
        ctx.release(partial)?;
        return Ok(result);
    }

    let c = ctx.alloc(Ty::I32);
    let v = ctx.alloc(Ty::I32);
    let a = ctx.alloc(Ty::I64);
    let b = ctx.alloc(Ty::I64);

    // Step 1: x + y.
    cmp(ctx, c, CmpOp::LtU, width, partial, x);
    bin(ctx, a, BinOp::Xor, width, x, partial);
    bin(ctx, b, BinOp::Xor, width, y, partial);
    bin(ctx, a, BinOp::And, width, a, b);
    bin(ctx, v, BinOp::ShrU, width, a, sign);

    // Step 2: + carry.
    cmp(ctx, a, CmpOp::LtU, width, result, partial);
    bin(ctx, Place::Flag(Flag::C), BinOp::Xor, Width::W64, c, a);
    bin(ctx, a, BinOp::Xor, width, partial, result);
    bin(ctx, b, BinOp::Xor, width, carry, result);
    bin(ctx, a, BinOp::And, width, a, b);
    bin(ctx, a, BinOp::ShrU, width, a, sign);
    bin(ctx, Place::Flag(Flag::V), BinOp::Xor, Width::W64, v, a);

    set_nz(ctx, width, result.into());

    for local in [partial, c, v, a, b] {
        ctx.release(local)?;
    }
    Ok(result)
}

/// 0/1 local that is 1 when `cond` holds for the current flags.
pub fn cond_holds(ctx: &mut CompileCtx<'_>, cond: Cond) -> Result<Local, JitError> {
    let out = ctx.alloc(Ty::I32);
    let flag = |f: Flag| Operand::Place(Place::Flag(f));
    match cond.bits() >> 1 {
        0 => mov(ctx, Some(out.into()), flag(Flag::Z), Width::W64),
        1 => mov(ctx, Some(out.into()), flag(Flag::C), Width::W64),
        2 => mov(ctx, Some(out.into()), flag(Flag::N), Width::W64),
        3 => mov(ctx, Some(out.into()), flag(Flag::V), Width::W64),
        // HI: C && !Z
        4 => {
            bin(ctx, out, BinOp::Xor, Width::W64, flag(Flag::Z), Operand::Imm(1));
            bin(ctx, out, BinOp::And, Width::W64, out, flag(Flag::C));
        }
        // GE: N == V
        5 => cmp(ctx, out, CmpOp::Eq, Width::W64, flag(Flag::N), flag(Flag::V)),
        // GT: !Z && N == V
        6 => {
            let t = ctx.alloc(Ty::I32);
            cmp(ctx, out, CmpOp::Eq, Width::W64, flag(Flag::N), flag(Flag::V));
            bin(ctx, t, BinOp::Xor, Width::W64, flag(Flag::Z), Operand::Imm(1));
            bin(ctx, out, BinOp::And, Width::W64, out, t);
            ctx.release(t)?;
        }
        _ => mov(ctx, Some(out.into()), Operand::Imm(1), Width::W64),
    }
    if cond.bits() & 1 == 1 && !cond.is_always() {
        bin(ctx, out, BinOp::Xor, Width::W64, out, Operand::Imm(1));
    }
    Ok(out)
}

pub fn shift_op(shift: u32) -> BinOp {
    match shift & 3 {
        0 => BinOp::Shl,
        1 => BinOp::ShrU,
        2 => BinOp::ShrS,
        _ => BinOp::RotR,
    }
}

/// `src <shift> amount` at `width` in a new local.
pub fn shifted(
    ctx: &mut CompileCtx<'_>,
    width: Width,
    src: Operand,
    shift: u32,
    amount: u32,
) -> Local {
    let local = ctx.alloc(Ty::I64);
    bin(
        ctx,
        local,
        shift_op(shift),
        width,
        src,
        Operand::Imm(u64::from(amount)),
    );
    local
}

/// Extended-register operand: `option` selects `UXTB..SXTX`, then a left shift by `amount`.
pub fn extended(ctx: &mut CompileCtx<'_>, src: Operand, option: u32, amount: u32) -> Local {
    let local = ctx.alloc(Ty::I64);
    let bits = 8u8 << (option & 3);
    ctx.emit(IrOp::Extend {
        dst: local.into(),
        src,
        bits,
        signed: option & 4 != 0,
    });
    if amount != 0 {
        bin(
            ctx,
            local,
            BinOp::Shl,
            Width::W64,
            local,
            Operand::Imm(u64::from(amount)),
        );
    }
    local
}

/// Leave the function with `value` unless it equals the expected return address.
///
/// Used after calls: a callee that returns anywhere other than the instruction after the call
/// did not return normally, so the caller propagates that address outwards.
pub fn return_unless(ctx: &mut CompileCtx<'_>, value: Local, expected: u64) -> Result<(), JitError> {
    let differs = ctx.alloc(Ty::I32);
    cmp(
        ctx,
        differs,
        CmpOp::Ne,
        Width::W64,
        value,
        Operand::Imm(expected),
    );
    ctx.emit(IrOp::If {
        cond: differs.into(),
        then_ops: vec![IrOp::Return {
            value: value.into(),
        }],
        else_ops: Vec::new(),
    });
    ctx.release(differs)
}

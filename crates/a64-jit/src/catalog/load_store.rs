//! Single-register and pair loads and stores.

use a64_cpu::bits::sign_extend;
use a64_cpu::{MemSize, Width};
use a64_decoder::Fields;

use super::emit::{bin, dst, dst_or_sp, extended, gpr, gpr_or_sp, mov, reserved};
use super::format::{
    asm, branch_offset, extend_name, imm, mem_operand, reg, reg_sp, unallocated, AddrMode,
};
use super::Builder;
use crate::ctx::CompileCtx;
use crate::error::JitError;
use crate::ir::{BinOp, IrOp, Local, Operand, Ty};

pub(super) fn register(b: &mut Builder) {
    b.insn("ldr literal", "opc:2 011 0 00 imm19:19 Rt:5", fmt_literal, emit_literal);
    b.insn(
        "ldr/str unsigned offset",
        "size:2 111 0 01 opc:2 imm12:12 Rn:5 Rt:5",
        fmt_unsigned,
        emit_unsigned,
    );
    b.insn(
        "ldur/stur",
        "size:2 111 0 00 opc:2 0 imm9:9 00 Rn:5 Rt:5",
        fmt_imm9,
        emit_imm9,
    );
    b.insn(
        "ldr/str post-index",
        "size:2 111 0 00 opc:2 0 imm9:9 01 Rn:5 Rt:5",
        fmt_imm9,
        emit_imm9,
    );
    b.insn(
        "ldr/str pre-index",
        "size:2 111 0 00 opc:2 0 imm9:9 11 Rn:5 Rt:5",
        fmt_imm9,
        emit_imm9,
    );
    b.insn(
        "ldr/str register offset",
        "size:2 111 0 00 opc:2 1 Rm:5 option:3 S:1 10 Rn:5 Rt:5",
        fmt_register,
        emit_register,
    )
    .only("option", &[2, 3, 6, 7]);
    b.insn(
        "ldp/stp",
        "opc:2 101 0 0 idx:2 L:1 imm7:7 Rt2:5 Rn:5 Rt:5",
        fmt_pair,
        emit_pair,
    )
    .not("opc", &[3]);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Store,
    Load { width: Width, signed: bool },
    Prefetch,
}

/// Access kind from the `size:opc` fields of a single-register load/store.
fn classify(size: u32, opc: u32) -> Option<Kind> {
    match (opc, size) {
        (0, _) => Some(Kind::Store),
        (1, 3) => Some(Kind::Load {
            width: Width::W64,
            signed: false,
        }),
        (1, _) => Some(Kind::Load {
            width: Width::W32,
            signed: false,
        }),
        (2, 3) => Some(Kind::Prefetch),
        (2, _) => Some(Kind::Load {
            width: Width::W64,
            signed: true,
        }),
        (3, 0 | 1) => Some(Kind::Load {
            width: Width::W32,
            signed: true,
        }),
        _ => None,
    }
}

fn mnemonic(kind: Kind, size: u32, unscaled: bool) -> &'static str {
    const STORE: [[&str; 4]; 2] = [["strb", "strh", "str", "str"], ["sturb", "sturh", "stur", "stur"]];
    const LOAD: [[&str; 4]; 2] = [["ldrb", "ldrh", "ldr", "ldr"], ["ldurb", "ldurh", "ldur", "ldur"]];
    const SIGNED: [[&str; 4]; 2] = [
        ["ldrsb", "ldrsh", "ldrsw", "ldrsw"],
        ["ldursb", "ldursh", "ldursw", "ldursw"],
    ];
    let (row, col) = (unscaled as usize, (size & 3) as usize);
    match kind {
        Kind::Store => STORE[row][col],
        Kind::Load { signed: false, .. } => LOAD[row][col],
        Kind::Load { signed: true, .. } => SIGNED[row][col],
        Kind::Prefetch if unscaled => "prfum",
        Kind::Prefetch => "prfm",
    }
}

/// `PRFM` operation name, e.g. `pldl1keep`.
fn prefetch_op(rt: u32) -> String {
    let kind = match rt >> 3 {
        0 => "pld",
        1 => "pli",
        2 => "pst",
        _ => return imm(i64::from(rt)),
    };
    let target = match (rt >> 1) & 3 {
        0 => "l1",
        1 => "l2",
        2 => "l3",
        _ => return imm(i64::from(rt)),
    };
    let policy = if rt & 1 == 0 { "keep" } else { "strm" };
    format!("{kind}{target}{policy}")
}

fn transfer_reg(kind: Kind, size: u32, rt: u32) -> String {
    match kind {
        Kind::Store => reg(rt, (size == 3) as u32),
        Kind::Load { width, .. } => reg(rt, (width == Width::W64) as u32),
        Kind::Prefetch => prefetch_op(rt),
    }
}

/// Load into a fresh local, sign-extending from the access size when asked.
fn load(ctx: &mut CompileCtx<'_>, addr: Operand, size: MemSize, signed: bool) -> Local {
    let value = ctx.alloc(Ty::I64);
    ctx.emit(IrOp::Load {
        dst: value.into(),
        addr,
        size,
    });
    if signed && size != MemSize::U64 {
        ctx.emit(IrOp::Extend {
            dst: value.into(),
            src: value.into(),
            bits: (size.bytes() * 8) as u8,
            signed: true,
        });
    }
    value
}

fn access(
    ctx: &mut CompileCtx<'_>,
    kind: Kind,
    size: MemSize,
    rt: u32,
    addr: Operand,
) -> Result<(), JitError> {
    match kind {
        Kind::Prefetch => Ok(()),
        Kind::Store => {
            ctx.emit(IrOp::Store {
                addr,
                value: gpr(rt),
                size,
            });
            Ok(())
        }
        Kind::Load { width, signed } => {
            let value = load(ctx, addr, size, signed);
            mov(ctx, dst(rt), value.into(), width);
            ctx.release(value)
        }
    }
}

/// Compute the effective address for `rn + offset` under `mode`, run `body` with it and
/// perform any base writeback afterwards.
fn addressed(
    ctx: &mut CompileCtx<'_>,
    rn: u32,
    offset: i64,
    mode: AddrMode,
    body: impl FnOnce(&mut CompileCtx<'_>, Operand) -> Result<(), JitError>,
) -> Result<(), JitError> {
    let base = gpr_or_sp(rn);
    let offset = Operand::Imm(offset as u64);
    match mode {
        AddrMode::Offset if offset == Operand::Imm(0) => body(ctx, base),
        AddrMode::Offset => {
            let addr = ctx.alloc(Ty::I64);
            bin(ctx, addr, BinOp::Add, Width::W64, base, offset);
            body(ctx, addr.into())?;
            ctx.release(addr)
        }
        AddrMode::PreIndex => {
            let addr = ctx.alloc(Ty::I64);
            bin(ctx, addr, BinOp::Add, Width::W64, base, offset);
            body(ctx, addr.into())?;
            mov(ctx, Some(dst_or_sp(rn)), addr.into(), Width::W64);
            ctx.release(addr)
        }
        AddrMode::PostIndex => {
            let next = ctx.alloc(Ty::I64);
            bin(ctx, next, BinOp::Add, Width::W64, base, offset);
            body(ctx, base)?;
            mov(ctx, Some(dst_or_sp(rn)), next.into(), Width::W64);
            ctx.release(next)
        }
    }
}

fn literal_kind(opc: u32) -> (Kind, MemSize) {
    match opc {
        0 => (
            Kind::Load {
                width: Width::W32,
                signed: false,
            },
            MemSize::U32,
        ),
        1 => (
            Kind::Load {
                width: Width::W64,
                signed: false,
            },
            MemSize::U64,
        ),
        2 => (
            Kind::Load {
                width: Width::W64,
                signed: true,
            },
            MemSize::U32,
        ),
        _ => (Kind::Prefetch, MemSize::U64),
    }
}

fn fmt_literal(f: &Fields) -> String {
    let [opc, imm19, rt] = f.take(["opc", "imm19", "Rt"]);
    let (kind, _) = literal_kind(opc);
    let name = match kind {
        Kind::Load { signed: true, .. } => "ldrsw",
        Kind::Prefetch => "prfm",
        _ => "ldr",
    };
    asm(
        name,
        &[transfer_reg(kind, 3, rt), imm(branch_offset(imm19, 19))],
    )
}

fn emit_literal(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [opc, imm19, rt] = f.take(["opc", "imm19", "Rt"]);
    let (kind, size) = literal_kind(opc);
    let addr = ctx.pc().wrapping_add(branch_offset(imm19, 19) as u64);
    access(ctx, kind, size, rt, Operand::Imm(addr))
}

fn fmt_unsigned(f: &Fields) -> String {
    let [size, opc, imm12, rn, rt] = f.take(["size", "opc", "imm12", "Rn", "Rt"]);
    let Some(kind) = classify(size, opc) else {
        return unallocated(f);
    };
    let offset = i64::from(imm12) << size;
    asm(
        mnemonic(kind, size, false),
        &[transfer_reg(kind, size, rt), mem_operand(rn, offset, AddrMode::Offset)],
    )
}

fn emit_unsigned(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [size, opc, imm12, rn, rt] = f.take(["size", "opc", "imm12", "Rn", "Rt"]);
    let Some(kind) = classify(size, opc) else {
        return Err(reserved(ctx, f));
    };
    let offset = i64::from(imm12) << size;
    addressed(ctx, rn, offset, AddrMode::Offset, |ctx, addr| {
        access(ctx, kind, MemSize::from_log2(size), rt, addr)
    })
}

/// Unscaled, pre-index and post-index forms share the 9-bit signed offset layout.
fn imm9_mode(f: &Fields) -> AddrMode {
    match (f.word() >> 10) & 3 {
        0b00 => AddrMode::Offset,
        0b01 => AddrMode::PostIndex,
        _ => AddrMode::PreIndex,
    }
}

fn fmt_imm9(f: &Fields) -> String {
    let [size, opc, imm9, rn, rt] = f.take(["size", "opc", "imm9", "Rn", "Rt"]);
    let mode = imm9_mode(f);
    let Some(kind) = classify(size, opc) else {
        return unallocated(f);
    };
    if kind == Kind::Prefetch && mode != AddrMode::Offset {
        return unallocated(f);
    }
    let offset = sign_extend(u64::from(imm9), 9);
    asm(
        mnemonic(kind, size, mode == AddrMode::Offset),
        &[transfer_reg(kind, size, rt), mem_operand(rn, offset, mode)],
    )
}

fn emit_imm9(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [size, opc, imm9, rn, rt] = f.take(["size", "opc", "imm9", "Rn", "Rt"]);
    let mode = imm9_mode(f);
    let kind = match classify(size, opc) {
        Some(Kind::Prefetch) if mode != AddrMode::Offset => None,
        kind => kind,
    };
    let Some(kind) = kind else {
        return Err(reserved(ctx, f));
    };
    let offset = sign_extend(u64::from(imm9), 9);
    addressed(ctx, rn, offset, mode, |ctx, addr| {
        access(ctx, kind, MemSize::from_log2(size), rt, addr)
    })
}

fn fmt_register(f: &Fields) -> String {
    let [size, opc, rm, option, s, rn, rt] =
        f.take(["size", "opc", "Rm", "option", "S", "Rn", "Rt"]);
    let Some(kind) = classify(size, opc) else {
        return unallocated(f);
    };
    let mut index = vec![reg_sp(rn, 1), reg(rm, option & 1)];
    match (option, s) {
        (3, 0) => {}
        (3, _) => index.push(format!("lsl {}", imm(i64::from(size)))),
        (_, 0) => index.push(extend_name(option).to_string()),
        _ => index.push(format!("{} {}", extend_name(option), imm(i64::from(size)))),
    }
    asm(
        mnemonic(kind, size, false),
        &[transfer_reg(kind, size, rt), format!("[{}]", index.join(", "))],
    )
}

fn emit_register(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [size, opc, rm, option, s, rn, rt] =
        f.take(["size", "opc", "Rm", "option", "S", "Rn", "Rt"]);
    let Some(kind) = classify(size, opc) else {
        return Err(reserved(ctx, f));
    };
    let amount = if s == 1 { size } else { 0 };
    let addr = extended(ctx, gpr(rm), option, amount);
    bin(ctx, addr, BinOp::Add, Width::W64, gpr_or_sp(rn), addr);
    access(ctx, kind, MemSize::from_log2(size), rt, addr.into())?;
    ctx.release(addr)
}

fn pair_mode(idx: u32) -> AddrMode {
    match idx {
        0b00 | 0b10 => AddrMode::Offset,
        0b01 => AddrMode::PostIndex,
        _ => AddrMode::PreIndex,
    }
}

/// `(element size, sign-extend)` for a pair, or `None` if unallocated.
fn pair_layout(opc: u32, idx: u32, load: bool) -> Option<(MemSize, bool)> {
    match opc {
        0 => Some((MemSize::U32, false)),
        2 => Some((MemSize::U64, false)),
        1 if load && idx != 0 => Some((MemSize::U32, true)),
        _ => None,
    }
}

fn fmt_pair(f: &Fields) -> String {
    let [opc, idx, l, imm7, rt2, rn, rt] = f.take(["opc", "idx", "L", "imm7", "Rt2", "Rn", "Rt"]);
    let Some((size, signed)) = pair_layout(opc, idx, l == 1) else {
        return unallocated(f);
    };
    let name = match (idx, l, signed) {
        (0, 0, _) => "stnp",
        (0, _, _) => "ldnp",
        (_, 0, _) => "stp",
        (_, _, true) => "ldpsw",
        _ => "ldp",
    };
    let sf = (size == MemSize::U64 || signed) as u32;
    let offset = sign_extend(u64::from(imm7), 7) << size.log2();
    asm(
        name,
        &[reg(rt, sf), reg(rt2, sf), mem_operand(rn, offset, pair_mode(idx))],
    )
}

fn emit_pair(ctx: &mut CompileCtx<'_>, f: &Fields) -> Result<(), JitError> {
    let [opc, idx, l, imm7, rt2, rn, rt] = f.take(["opc", "idx", "L", "imm7", "Rt2", "Rn", "Rt"]);
    let Some((size, signed)) = pair_layout(opc, idx, l == 1) else {
        return Err(reserved(ctx, f));
    };
    let offset = sign_extend(u64::from(imm7), 7) << size.log2();
    let width = if size == MemSize::U64 || signed {
        Width::W64
    } else {
        Width::W32
    };
    addressed(ctx, rn, offset, pair_mode(idx), |ctx, addr| {
        let second = ctx.alloc(Ty::I64);
        bin(
            ctx,
            second,
            BinOp::Add,
            Width::W64,
            addr,
            Operand::Imm(size.bytes() as u64),
        );
        if l == 0 {
            for (value, at) in [(rt, addr), (rt2, second.into())] {
                ctx.emit(IrOp::Store {
                    addr: at,
                    value: gpr(value),
                    size,
                });
            }
            return ctx.release(second);
        }
        // Both halves are read before either register is written.
        let first = load(ctx, addr, size, signed);
        let last = load(ctx, second.into(), size, signed);
        mov(ctx, dst(rt), first.into(), width);
        mov(ctx, dst(rt2), last.into(), width);
        for local in [first, last, second] {
            ctx.release(local)?;
        }
        Ok(())
    })
}

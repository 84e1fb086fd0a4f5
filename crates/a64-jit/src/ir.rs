//! Three-address IR emitted by instruction codegen.
//!
//! Values are 64-bit. Operations that take a [`Width`] truncate their inputs to that width and
//! zero-extend their result, matching how A64 `W` registers behave.

use a64_cpu::bits::{ones, sign_extend};
use a64_cpu::{Flag, MemSize, Width};

use crate::shape::Shape;

/// Compilation-scoped scratch local.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Local(pub u32);

/// Type of a scratch local. `I32` locals only ever hold values below `2^32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    I32,
    I64,
}

impl Ty {
    #[inline]
    pub fn mask(self) -> u64 {
        match self {
            Ty::I32 => 0xffff_ffff,
            Ty::I64 => u64::MAX,
        }
    }
}

/// Index into the compiled-function table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

/// Which exception level's `ELR`/`SPSR` bank an access uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElBank {
    /// The bank of the EL current at run time (EL0 uses EL1's).
    Current,
    El(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Place {
    /// `x0..x30`.
    X(u8),
    /// Stack pointer selected by `PSTATE.SP` and `PSTATE.EL` at run time.
    Sp,
    SpEl(u8),
    /// Condition flag, read and written as 0 or 1.
    Flag(Flag),
    El,
    SpSel,
    Daif,
    Elr(ElBank),
    Spsr(ElBank),
    /// Backed system-register storage slot.
    Sys(usize),
    Local(Local),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Imm(u64),
    Place(Place),
}

impl From<Place> for Operand {
    fn from(place: Place) -> Self {
        Operand::Place(place)
    }
}

impl From<Local> for Operand {
    fn from(local: Local) -> Self {
        Operand::Place(Place::Local(local))
    }
}

impl From<Local> for Place {
    fn from(local: Local) -> Self {
        Place::Local(local)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    /// Shift amounts are taken modulo the width.
    Shl,
    ShrU,
    ShrS,
    RotR,
    /// Division by zero yields 0.
    DivU,
    /// Division by zero yields 0; `MIN / -1` yields `MIN`.
    DivS,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    LtS,
    LtU,
    LeS,
    LeU,
    GtS,
    GtU,
    GeS,
    GeU,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrOp {
    Mov {
        dst: Place,
        src: Operand,
        width: Width,
    },
    Bin {
        dst: Place,
        op: BinOp,
        width: Width,
        lhs: Operand,
        rhs: Operand,
    },
    /// `dst = (lhs op rhs) as u64` (0 or 1).
    Cmp {
        dst: Place,
        op: CmpOp,
        width: Width,
        lhs: Operand,
        rhs: Operand,
    },
    Select {
        dst: Place,
        cond: Operand,
        if_true: Operand,
        if_false: Operand,
    },
    /// Sign- or zero-extend the low `bits` bits of `src` to 64 bits.
    Extend {
        dst: Place,
        src: Operand,
        bits: u8,
        signed: bool,
    },
    /// Zero-extending guest memory load.
    Load {
        dst: Place,
        addr: Operand,
        size: MemSize,
    },
    Store {
        addr: Operand,
        value: Operand,
        size: MemSize,
    },
    /// Call the function installed at `slot`; `dst` receives the guest address it returned to.
    CallSlot {
        dst: Place,
        slot: SlotId,
    },
    /// Run the function compiled for the guest address `target` (compiling it on demand).
    JumpToPc {
        dst: Place,
        target: Operand,
    },
    If {
        cond: Operand,
        then_ops: Vec<IrOp>,
        else_ops: Vec<IrOp>,
    },
    /// Leave the function, handing `value` (the next guest pc) to the caller.
    Return {
        value: Operand,
    },
}

impl IrOp {
    /// Visit this op and any ops nested inside it.
    pub fn walk(&self, f: &mut impl FnMut(&IrOp)) {
        f(self);
        if let IrOp::If {
            then_ops, else_ops, ..
        } = self
        {
            for op in then_ops.iter().chain(else_ops) {
                op.walk(f);
            }
        }
    }
}

/// One guest function ready for a backend: structured control flow over IR bodies.
#[derive(Clone, Debug)]
pub struct StructuredFunction {
    pub entry: u64,
    /// Declared scratch locals, indexed by [`Local`].
    pub locals: Vec<Ty>,
    pub body: Shape<Vec<IrOp>, Operand>,
}

impl StructuredFunction {
    pub fn any_op(&self, mut pred: impl FnMut(&IrOp) -> bool) -> bool {
        let mut found = false;
        self.body.for_each_body(&mut |ops: &Vec<IrOp>| {
            for op in ops {
                op.walk(&mut |op| found |= pred(op));
            }
        });
        found
    }
}

#[inline]
fn signed(value: u64, width: Width) -> i64 {
    sign_extend(value & width.mask(), width.bits())
}

/// Reference semantics of [`BinOp`].
pub fn eval_bin(op: BinOp, width: Width, lhs: u64, rhs: u64) -> u64 {
    let (a, b) = (lhs & width.mask(), rhs & width.mask());
    let amount = (b as u32) & (width.bits() - 1);
    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a << amount,
        BinOp::ShrU => a >> amount,
        BinOp::ShrS => (signed(a, width) >> amount) as u64,
        BinOp::RotR => match width {
            Width::W32 => u64::from((a as u32).rotate_right(amount)),
            Width::W64 => a.rotate_right(amount),
        },
        BinOp::DivU => a.checked_div(b).unwrap_or(0),
        BinOp::DivS => {
            let (x, y) = (signed(a, width), signed(b, width));
            if y == 0 {
                0
            } else {
                match width {
                    Width::W32 => (x as i32).wrapping_div(y as i32) as u32 as u64,
                    Width::W64 => x.wrapping_div(y) as u64,
                }
            }
        }
    };
    result & width.mask()
}

/// Reference semantics of [`CmpOp`].
pub fn eval_cmp(op: CmpOp, width: Width, lhs: u64, rhs: u64) -> u64 {
    let (a, b) = (lhs & width.mask(), rhs & width.mask());
    let (sa, sb) = (signed(a, width), signed(b, width));
    let holds = match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::LtS => sa < sb,
        CmpOp::LtU => a < b,
        CmpOp::LeS => sa <= sb,
        CmpOp::LeU => a <= b,
        CmpOp::GtS => sa > sb,
        CmpOp::GtU => a > b,
        CmpOp::GeS => sa >= sb,
        CmpOp::GeU => a >= b,
    };
    holds as u64
}

/// Reference semantics of [`IrOp::Extend`].
pub fn eval_extend(value: u64, bits: u8, signed: bool) -> u64 {
    let bits = u32::from(bits);
    if signed {
        sign_extend(value & ones(bits), bits) as u64
    } else {
        value & ones(bits)
    }
}

//! Per-block codegen context handed to instruction emitters.

use crate::error::{InvariantViolation, JitError};
use crate::ir::{IrOp, Local, Operand, SlotId, Ty};
use crate::locals::LocalPool;
use crate::table::Slots;

/// How an instruction ended its block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Terminator {
    /// No successors; the block's ops return from the function.
    Stop,
    /// Jump to `target`, or when `cond` is set, to `target` if it is non-zero and to the next
    /// instruction otherwise.
    Branch { target: u64, cond: Option<Operand> },
}

pub(crate) trait SlotSource {
    fn function_slot(&mut self, addr: u64) -> SlotId;
}

impl<F> SlotSource for Slots<F> {
    fn function_slot(&mut self, addr: u64) -> SlotId {
        Slots::function_slot(self, addr)
    }
}

pub struct CompileCtx<'a> {
    pc: u64,
    ops: Vec<IrOp>,
    terminator: Option<Terminator>,
    locals: &'a mut LocalPool,
    slots: &'a mut dyn SlotSource,
}

impl<'a> CompileCtx<'a> {
    pub(crate) fn new(pc: u64, locals: &'a mut LocalPool, slots: &'a mut dyn SlotSource) -> Self {
        Self {
            pc,
            ops: Vec::new(),
            terminator: None,
            locals,
            slots,
        }
    }

    /// Address of the instruction being compiled.
    #[inline]
    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub(crate) fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    pub fn emit(&mut self, op: IrOp) {
        self.ops.push(op);
    }

    /// End the block with a jump to `target`, conditional on `cond` being non-zero.
    pub fn branch(&mut self, target: u64, cond: Option<Operand>) -> Result<(), JitError> {
        self.terminate(Terminator::Branch { target, cond })
    }

    /// End the block without successors (the emitted ops have already returned).
    pub fn stop(&mut self) -> Result<(), JitError> {
        self.terminate(Terminator::Stop)
    }

    fn terminate(&mut self, terminator: Terminator) -> Result<(), JitError> {
        if self.terminator.is_some() {
            return Err(InvariantViolation::DoubleTerminated { pc: self.pc }.into());
        }
        self.terminator = Some(terminator);
        Ok(())
    }

    /// Table slot for the function at `addr`.
    pub fn function_slot(&mut self, addr: u64) -> SlotId {
        self.slots.function_slot(addr)
    }

    pub fn alloc(&mut self, ty: Ty) -> Local {
        self.locals.alloc(ty)
    }

    pub fn release(&mut self, local: Local) -> Result<(), JitError> {
        self.locals.release(local).map_err(|local| {
            InvariantViolation::ReleaseUnallocated {
                pc: self.pc,
                local: local.0,
            }
            .into()
        })
    }

    pub(crate) fn terminated(&self) -> bool {
        self.terminator.is_some()
    }

    pub(crate) fn held_locals(&self) -> usize {
        self.locals.held()
    }

    pub(crate) fn finish(self) -> (Vec<IrOp>, Option<Terminator>) {
        (self.ops, self.terminator)
    }
}

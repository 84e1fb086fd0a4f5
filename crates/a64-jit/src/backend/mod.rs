//! Execution backends for structured functions.

use a64_cpu::{CpuState, GuestMemory};

use crate::error::JitError;
use crate::ir::{SlotId, StructuredFunction};

mod interp;
mod wasm;

pub use interp::{InterpBackend, InterpFunction};
pub use wasm::{WasmBackend, WasmFunction};

/// Host services available to running guest code.
pub trait Runtime {
    fn cpu(&mut self) -> &mut CpuState;

    fn memory(&mut self) -> &mut GuestMemory;

    /// Run the function installed in `slot` (compiling it first if it is a trampoline) and
    /// return the guest address it returned to.
    fn call_slot(&mut self, slot: SlotId) -> Result<u64, JitError>;

    /// Run the function starting at guest address `pc`.
    fn jump_to_pc(&mut self, pc: u64) -> Result<u64, JitError>;

    /// Charge one loop iteration against the execution budget.
    fn tick(&mut self) -> Result<(), JitError>;
}

/// Turns structured functions into something executable.
pub trait Backend {
    type Function;

    fn lower(&mut self, func: StructuredFunction) -> Result<Self::Function, JitError>;

    /// Run `func` to completion, returning the next guest pc.
    fn invoke(func: &Self::Function, rt: &mut dyn Runtime) -> Result<u64, JitError>;
}

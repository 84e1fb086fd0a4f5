use a64_cpu::MemoryError;
use thiserror::Error;

use crate::structurize::StructureError;

/// Internal compiler consistency failures. These indicate a bug in instruction codegen or in the
/// compiler itself rather than a property of the guest program.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("instruction at {pc:#x} terminated its block twice")]
    DoubleTerminated { pc: u64 },
    #[error("block {from:#x} branches to undiscovered block {to:#x}")]
    UnknownBlock { from: u64, to: u64 },
    #[error("{count} scratch locals still held when finishing block at {pc:#x}")]
    UnreleasedScratch { pc: u64, count: usize },
    #[error("instruction at {pc:#x} released local {local} that is not allocated")]
    ReleaseUnallocated { pc: u64, local: u32 },
    #[error("function {entry:#x} finished without returning")]
    FellOffEnd { entry: u64 },
    #[error(transparent)]
    Structure(#[from] StructureError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JitError {
    #[error("invalid instruction encoding {word:#010x} at {pc:#x}")]
    InvalidEncoding { pc: u64, word: u32 },
    #[error("unsupported instruction `{mnemonic}` ({word:#010x}) at {pc:#x}")]
    UnsupportedInstruction {
        pc: u64,
        word: u32,
        mnemonic: &'static str,
    },
    #[error("instruction fetch at {pc:#x} is outside guest memory")]
    FetchOutOfBounds { pc: u64 },
    #[error("compiler invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("function {entry:#x} exceeds the limit of {limit} blocks")]
    BlockLimit { entry: u64, limit: usize },
    #[error("guest call depth exceeded {depth}")]
    CallDepthExceeded { depth: usize },
    #[error("loop budget exhausted")]
    BudgetExhausted,
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StructureError> for JitError {
    fn from(err: StructureError) -> Self {
        JitError::Invariant(InvariantViolation::Structure(err))
    }
}

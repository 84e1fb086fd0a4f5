//! AArch64 processor state and the flag/bit-manipulation algorithms shared by the decoder,
//! disassembler and JIT.
//!
//! [`CpuState`] has a fixed `#[repr(C)]` layout so generated code can address it directly in
//! linear memory; see the `*_OFFSET` constants on it.

#![forbid(unsafe_code)]

pub mod bits;
mod cond;
mod flags;
mod mem;
mod state;
pub mod sysreg;

pub use cond::Cond;
pub use flags::{add_with_carry, subtract, Flag, Nzcv};
pub use mem::{GuestMemory, MemSize, MemoryError};
pub use state::{CpuState, Width};

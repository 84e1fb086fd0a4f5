//! WebAssembly code generation for structured functions.
//!
//! A generated module imports guest RAM as `env.memory` (guest address `a` at linear address `a`)
//! and reads and writes the [`a64_cpu::CpuState`] image at the `cpu_ptr` it is called with, using
//! the `*_OFFSET` layout constants. See [`abi`] for the import and export names.

pub mod abi;
mod codegen;

pub use codegen::{emit_function, WasmOptions};

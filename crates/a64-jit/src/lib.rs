//! A function-at-a-time JIT for AArch64 guest code.
//!
//! The pipeline runs in four stages:
//! - [`catalog`]: decode each instruction word and emit three-address [`ir`] for it.
//! - [`compiler`]: discover the basic blocks of a function and build its control-flow graph.
//! - [`structurize`]: turn the graph into structured loops and conditionals ([`shape`]).
//! - [`backend`]: run the structured function ([`InterpBackend`]) or encode it as a WebAssembly
//!   module ([`wasm`]).
//!
//! [`Emulator`] ties a [`Compiler`] to a [`a64_cpu::CpuState`] and guest RAM and runs guest
//! functions to completion.
#![forbid(unsafe_code)]

pub mod backend;
pub mod catalog;
pub mod compiler;
pub mod ctx;
mod disasm;
pub mod emulator;
pub mod error;
pub mod ir;
mod locals;
pub mod shape;
pub mod structurize;
pub mod table;
pub mod wasm;

pub use backend::{Backend, InterpBackend, Runtime, WasmBackend};
pub use compiler::{Compiler, CompilerStats, JitConfig};
pub use disasm::{decode, disassemble};
pub use emulator::Emulator;
pub use error::{InvariantViolation, JitError};
pub use ir::StructuredFunction;

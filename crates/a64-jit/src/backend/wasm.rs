//! Backend that encodes every lowered function as a WebAssembly module.
//!
//! Execution goes through the interpreter, so the modules are a by-product a host can load into
//! its own engine (the CLI writes them out with `--emit-wasm`).

use tracing::debug;

use crate::backend::{Backend, InterpBackend, InterpFunction, Runtime};
use crate::error::JitError;
use crate::ir::StructuredFunction;
use crate::wasm::{emit_function, WasmOptions};

#[derive(Debug, Default, Clone, Copy)]
pub struct WasmBackend {
    options: WasmOptions,
}

impl WasmBackend {
    pub fn new(options: WasmOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &WasmOptions {
        &self.options
    }
}

#[derive(Debug, Clone)]
pub struct WasmFunction {
    entry: u64,
    module: Vec<u8>,
    interp: InterpFunction,
}

impl WasmFunction {
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// Encoded module bytes.
    pub fn module(&self) -> &[u8] {
        &self.module
    }
}

impl Backend for WasmBackend {
    type Function = WasmFunction;

    fn lower(&mut self, func: StructuredFunction) -> Result<WasmFunction, JitError> {
        let entry = func.entry;
        let module = emit_function(&func, &self.options)?;
        debug!(
            entry = format_args!("{entry:#x}"),
            bytes = module.len(),
            "emitted wasm module"
        );
        let interp = InterpBackend.lower(func)?;
        Ok(WasmFunction {
            entry,
            module,
            interp,
        })
    }

    fn invoke(func: &WasmFunction, rt: &mut dyn Runtime) -> Result<u64, JitError> {
        InterpBackend::invoke(&func.interp, rt)
    }
}

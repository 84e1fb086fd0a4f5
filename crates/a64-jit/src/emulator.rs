use std::rc::Rc;

use a64_cpu::{CpuState, GuestMemory};
use tracing::debug;

use crate::backend::{Backend, Runtime};
use crate::compiler::{Compiler, JitConfig};
use crate::error::JitError;
use crate::ir::SlotId;
use crate::table::SlotEntry;

/// A single core: processor state, guest RAM and the JIT that runs code against them.
pub struct Emulator<B: Backend> {
    cpu: CpuState,
    mem: GuestMemory,
    compiler: Compiler<B>,
    depth: usize,
    budget: Option<u64>,
}

impl<B: Backend> Emulator<B> {
    pub fn new(mem: GuestMemory, backend: B, config: JitConfig) -> Self {
        Self {
            cpu: CpuState::new(),
            mem,
            compiler: Compiler::new(backend, config),
            depth: 0,
            budget: None,
        }
    }

    pub fn cpu(&self) -> &CpuState {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut CpuState {
        &mut self.cpu
    }

    pub fn memory(&self) -> &GuestMemory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.mem
    }

    pub fn compiler(&self) -> &Compiler<B> {
        &self.compiler
    }

    pub fn compiler_mut(&mut self) -> &mut Compiler<B> {
        &mut self.compiler
    }

    /// Run the function at `entry` and return the guest address it finally returned to.
    pub fn execute(&mut self, entry: u64) -> Result<u64, JitError> {
        self.depth = 0;
        self.budget = self.compiler.config().loop_budget;
        debug!(entry = format_args!("{entry:#x}"), "execute");
        self.run_at(entry)
    }

    fn run_at(&mut self, pc: u64) -> Result<u64, JitError> {
        let function = self.compiler.compile(pc, &self.mem)?;
        self.enter(&function)
    }

    fn enter(&mut self, function: &Rc<B::Function>) -> Result<u64, JitError> {
        let limit = self.compiler.config().max_call_depth;
        if self.depth >= limit {
            return Err(JitError::CallDepthExceeded { depth: limit });
        }
        self.depth += 1;
        let result = B::invoke(function, self);
        self.depth -= 1;
        result
    }
}

impl<B: Backend> Runtime for Emulator<B> {
    fn cpu(&mut self) -> &mut CpuState {
        &mut self.cpu
    }

    fn memory(&mut self) -> &mut GuestMemory {
        &mut self.mem
    }

    fn call_slot(&mut self, slot: SlotId) -> Result<u64, JitError> {
        match self.compiler.slot(slot) {
            Some(SlotEntry::Compiled { function, .. }) => {
                let function = Rc::clone(function);
                self.enter(&function)
            }
            Some(SlotEntry::Trampoline { entry }) => {
                let entry = *entry;
                self.run_at(entry)
            }
            Some(SlotEntry::Vacant) | None => {
                Err(JitError::Backend(format!("call through vacant slot {}", slot.0)))
            }
        }
    }

    fn jump_to_pc(&mut self, pc: u64) -> Result<u64, JitError> {
        self.run_at(pc)
    }

    fn tick(&mut self) -> Result<(), JitError> {
        match &mut self.budget {
            Some(0) => Err(JitError::BudgetExhausted),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

//! Function discovery, CFG construction and the compiled-function cache.

use std::collections::HashMap;
use std::rc::Rc;

use a64_cpu::GuestMemory;
use tracing::{debug, trace};

use crate::backend::Backend;
use crate::catalog;
use crate::ctx::{CompileCtx, Terminator};
use crate::error::{InvariantViolation, JitError};
use crate::ir::{IrOp, Operand, SlotId, StructuredFunction};
use crate::locals::LocalPool;
use crate::structurize::BlockGraph;
use crate::table::{SlotEntry, Slots};

#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Upper bound on basic blocks discovered for a single function.
    pub max_blocks_per_function: usize,
    /// Initial number of function-table slots.
    pub initial_table_size: usize,
    /// Merge straight-line block chains before structuring.
    pub coalesce_blocks: bool,
    /// Deepest guest call nesting before [`JitError::CallDepthExceeded`].
    pub max_call_depth: usize,
    /// Total loop back-edges allowed per [`crate::Emulator::execute`]; `None` is unlimited.
    pub loop_budget: Option<u64>,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_function: 16384,
            initial_table_size: 1,
            coalesce_blocks: true,
            max_call_depth: 4096,
            loop_budget: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompilerStats {
    pub compilations: u64,
    pub blocks_discovered: u64,
    pub cache_hits: u64,
    pub trampolines_created: u64,
}

type Exits = Vec<(Option<Operand>, u64)>;

pub struct Compiler<B: Backend> {
    backend: B,
    config: JitConfig,
    slots: Slots<B::Function>,
    stats: CompilerStats,
}

impl<B: Backend> Compiler<B> {
    pub fn new(backend: B, config: JitConfig) -> Self {
        let slots = Slots::new(config.initial_table_size);
        Self {
            backend,
            config,
            slots,
            stats: CompilerStats::default(),
        }
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn stats(&self) -> CompilerStats {
        CompilerStats {
            trampolines_created: self.slots.trampolines_created,
            ..self.stats
        }
    }

    /// Slot currently assigned to the function at `addr`.
    pub fn lookup(&self, addr: u64) -> Option<SlotId> {
        self.slots.cache.get(&addr).copied()
    }

    pub fn slot(&self, slot: SlotId) -> Option<&SlotEntry<B::Function>> {
        self.slots.table.get(slot)
    }

    pub fn table_capacity(&self) -> usize {
        self.slots.table.capacity()
    }

    /// Compile the function at `entry`, or return the cached compilation.
    pub fn compile(
        &mut self,
        entry: u64,
        mem: &GuestMemory,
    ) -> Result<Rc<B::Function>, JitError> {
        let slot = self.slots.function_slot(entry);
        if let Some(SlotEntry::Compiled { function, .. }) = self.slots.table.get(slot) {
            self.stats.cache_hits += 1;
            return Ok(Rc::clone(function));
        }

        debug!(entry = format_args!("{entry:#x}"), "compiling function");
        let structured = self.build(entry, mem)?;
        let function = Rc::new(self.backend.lower(structured)?);
        self.slots.table.set(
            slot,
            SlotEntry::Compiled {
                entry,
                function: Rc::clone(&function),
            },
        );
        self.stats.compilations += 1;
        debug!(
            entry = format_args!("{entry:#x}"),
            slot = slot.0,
            "installed compiled function"
        );
        Ok(function)
    }

    /// Put a trampoline back into the slot of `addr`, forcing recompilation on next call.
    /// Returns whether `addr` had a slot.
    pub fn invalidate(&mut self, addr: u64) -> bool {
        match self.slots.cache.get(&addr) {
            Some(&slot) => {
                self.slots
                    .table
                    .set(slot, SlotEntry::Trampoline { entry: addr });
                debug!(addr = format_args!("{addr:#x}"), "invalidated function");
                true
            }
            None => false,
        }
    }

    /// Drop every cached function and free every slot.
    pub fn flush(&mut self) {
        self.slots.cache.clear();
        self.slots.table.reset();
        debug!("flushed function cache");
    }

    /// Discover, structure and return the function at `entry` without lowering it.
    pub fn build(
        &mut self,
        entry: u64,
        mem: &GuestMemory,
    ) -> Result<StructuredFunction, JitError> {
        let limit = self.config.max_blocks_per_function;
        let mut locals = LocalPool::new();
        let mut graph: BlockGraph<Vec<IrOp>, Operand> = BlockGraph::new();
        let mut nodes: HashMap<u64, usize> = HashMap::new();
        let mut pending: Vec<(usize, u64, Exits)> = Vec::new();
        let mut worklist = vec![entry];

        while let Some(start) = worklist.pop() {
            if nodes.contains_key(&start) {
                continue;
            }
            if nodes.len() >= limit {
                return Err(JitError::BlockLimit { entry, limit });
            }
            let (ops, exits) = self.translate_block(start, mem, &mut locals, &nodes)?;
            let node = graph.add_block(ops);
            nodes.insert(start, node);
            self.stats.blocks_discovered += 1;
            for &(_, target) in exits.iter().rev() {
                if !nodes.contains_key(&target) {
                    worklist.push(target);
                }
            }
            pending.push((node, start, exits));
        }

        for (node, from, exits) in pending {
            for (cond, to) in exits {
                let target = *nodes
                    .get(&to)
                    .ok_or(InvariantViolation::UnknownBlock { from, to })?;
                graph.add_exit(node, cond, target);
            }
        }
        let entry_node = *nodes.get(&entry).ok_or(InvariantViolation::UnknownBlock {
            from: entry,
            to: entry,
        })?;
        graph.set_entry(entry_node);
        if self.config.coalesce_blocks {
            graph.coalesce(|into, from| into.extend(from));
        }
        let body = graph.structurize()?;
        debug!(
            entry = format_args!("{entry:#x}"),
            blocks = nodes.len(),
            "structured function"
        );
        Ok(StructuredFunction {
            entry,
            locals: locals.into_types(),
            body,
        })
    }

    /// Translate instructions from `start` until one ends the block or execution falls into an
    /// already discovered block.
    fn translate_block(
        &mut self,
        start: u64,
        mem: &GuestMemory,
        locals: &mut LocalPool,
        known: &HashMap<u64, usize>,
    ) -> Result<(Vec<IrOp>, Exits), JitError> {
        let mut ctx = CompileCtx::new(start, locals, &mut self.slots);
        let mut pc = start;
        let fallthrough = loop {
            ctx.set_pc(pc);
            let word = mem
                .read_u32(pc)
                .map_err(|_| JitError::FetchOutOfBounds { pc })?;
            let (def, fields) =
                catalog::decode(word).map_err(|_| JitError::InvalidEncoding { pc, word })?;
            trace!(
                pc = format_args!("{pc:#x}"),
                word = format_args!("{word:#010x}"),
                "{}",
                (def.format)(&fields)
            );
            let emit = def.emit.ok_or(JitError::UnsupportedInstruction {
                pc,
                word,
                mnemonic: def.mnemonic,
            })?;
            emit(&mut ctx, &fields)?;

            let next = pc.wrapping_add(4);
            if ctx.terminated() || known.contains_key(&next) {
                break next;
            }
            pc = next;
        };

        let held = ctx.held_locals();
        if held != 0 {
            return Err(InvariantViolation::UnreleasedScratch { pc, count: held }.into());
        }
        let (ops, terminator) = ctx.finish();
        let exits = match terminator {
            None => vec![(None, fallthrough)],
            Some(Terminator::Stop) => Vec::new(),
            Some(Terminator::Branch { target, cond: None }) => vec![(None, target)],
            Some(Terminator::Branch {
                target,
                cond: Some(cond),
            }) => vec![(Some(cond), target), (None, fallthrough)],
        };
        Ok((ops, exits))
    }
}

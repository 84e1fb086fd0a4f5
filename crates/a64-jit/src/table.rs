use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::ir::SlotId;

/// State of one compiled-function table slot.
#[derive(Debug)]
pub enum SlotEntry<F> {
    Vacant,
    /// Compile `entry` on first call.
    Trampoline { entry: u64 },
    Compiled { entry: u64, function: Rc<F> },
}

impl<F> Clone for SlotEntry<F> {
    fn clone(&self) -> Self {
        match self {
            SlotEntry::Vacant => SlotEntry::Vacant,
            SlotEntry::Trampoline { entry } => SlotEntry::Trampoline { entry: *entry },
            SlotEntry::Compiled { entry, function } => SlotEntry::Compiled {
                entry: *entry,
                function: Rc::clone(function),
            },
        }
    }
}

/// Growable table of function slots. When every slot is taken the table doubles and the new
/// indices join the free list.
#[derive(Debug)]
pub struct FunctionTable<F> {
    slots: Vec<SlotEntry<F>>,
    /// Popped from the back; kept in descending order so the lowest index goes first.
    free: Vec<SlotId>,
}

impl<F> FunctionTable<F> {
    pub fn new(initial_size: usize) -> Self {
        let size = initial_size.max(1);
        Self {
            slots: (0..size).map(|_| SlotEntry::Vacant).collect(),
            free: (0..size as u32).rev().map(SlotId).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn alloc(&mut self) -> SlotId {
        if self.free.is_empty() {
            let old = self.slots.len();
            let new = old * 2;
            self.slots.resize_with(new, || SlotEntry::Vacant);
            self.free.extend((old as u32..new as u32).rev().map(SlotId));
            debug!(old, new, "grew function table");
        }
        // Non-empty after the growth above.
        self.free.pop().unwrap_or(SlotId(0))
    }

    pub fn get(&self, slot: SlotId) -> Option<&SlotEntry<F>> {
        self.slots.get(slot.0 as usize)
    }

    pub fn set(&mut self, slot: SlotId, entry: SlotEntry<F>) {
        self.slots[slot.0 as usize] = entry;
    }

    /// Mark every slot vacant and free.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = SlotEntry::Vacant;
        }
        self.free = (0..self.slots.len() as u32).rev().map(SlotId).collect();
    }
}

/// Address-to-slot cache plus the table it indexes.
#[derive(Debug)]
pub(crate) struct Slots<F> {
    pub(crate) cache: HashMap<u64, SlotId>,
    pub(crate) table: FunctionTable<F>,
    pub(crate) trampolines_created: u64,
}

impl<F> Slots<F> {
    pub(crate) fn new(initial_size: usize) -> Self {
        Self {
            cache: HashMap::new(),
            table: FunctionTable::new(initial_size),
            trampolines_created: 0,
        }
    }

    /// Slot for the function at `addr`, installing a trampoline if there is none yet.
    pub(crate) fn function_slot(&mut self, addr: u64) -> SlotId {
        if let Some(&slot) = self.cache.get(&addr) {
            return slot;
        }
        let slot = self.table.alloc();
        self.table.set(slot, SlotEntry::Trampoline { entry: addr });
        self.cache.insert(addr, slot);
        self.trampolines_created += 1;
        debug!(addr = format_args!("{addr:#x}"), slot = slot.0, "installed trampoline");
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_doubles_and_hands_out_lowest_free_slot() {
        let mut table: FunctionTable<()> = FunctionTable::new(1);
        assert_eq!(table.alloc(), SlotId(0));
        assert_eq!(table.alloc(), SlotId(1));
        assert_eq!(table.capacity(), 2);
        assert_eq!(table.alloc(), SlotId(2));
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.alloc(), SlotId(3));
        assert_eq!(table.alloc(), SlotId(4));
        assert_eq!(table.capacity(), 8);

        table.reset();
        assert_eq!(table.alloc(), SlotId(0));
        assert!(matches!(table.get(SlotId(4)), Some(SlotEntry::Vacant)));
    }

    #[test]
    fn function_slot_is_stable_per_address() {
        let mut slots: Slots<()> = Slots::new(1);
        let a = slots.function_slot(0x400);
        let b = slots.function_slot(0x800);
        assert_ne!(a, b);
        assert_eq!(slots.function_slot(0x400), a);
        assert_eq!(slots.trampolines_created, 2);
        assert!(matches!(
            slots.table.get(b),
            Some(SlotEntry::Trampoline { entry: 0x800 })
        ));
    }
}

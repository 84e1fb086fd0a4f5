use crate::ir::{Local, Ty};

/// Typed scratch locals for one compilation.
///
/// Released locals go back on a per-type free list and are handed out again before any new
/// local is declared, so the declared set stays small.
#[derive(Debug, Default)]
pub struct LocalPool {
    types: Vec<Ty>,
    held: Vec<bool>,
    free_i32: Vec<Local>,
    free_i64: Vec<Local>,
}

impl LocalPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn free_list(&mut self, ty: Ty) -> &mut Vec<Local> {
        match ty {
            Ty::I32 => &mut self.free_i32,
            Ty::I64 => &mut self.free_i64,
        }
    }

    pub fn alloc(&mut self, ty: Ty) -> Local {
        let local = match self.free_list(ty).pop() {
            Some(local) => local,
            None => {
                let local = Local(self.types.len() as u32);
                self.types.push(ty);
                self.held.push(false);
                local
            }
        };
        self.held[local.0 as usize] = true;
        local
    }

    /// Return `local` to the pool. Fails if it is not currently allocated.
    pub fn release(&mut self, local: Local) -> Result<(), Local> {
        let idx = local.0 as usize;
        match self.held.get_mut(idx) {
            Some(held) if *held => {
                *held = false;
                let ty = self.types[idx];
                self.free_list(ty).push(local);
                Ok(())
            }
            _ => Err(local),
        }
    }

    /// Number of locals currently allocated.
    pub fn held(&self) -> usize {
        self.held.iter().filter(|&&h| h).count()
    }

    pub fn ty(&self, local: Local) -> Option<Ty> {
        self.types.get(local.0 as usize).copied()
    }

    /// Declared local types, indexed by [`Local`].
    pub fn into_types(self) -> Vec<Ty> {
        self.types
    }
}

use crate::compiler_stack::PhysReg;
use wasmc_collections::StackNodeId;

/// Per-function register bookkeeping: which scratch registers are free, and
/// the last-occurrence oracle (§9 "Last-occurrence index": "a per-register
/// array pointing to the topmost stack element currently holding that
/// register's value; authoritative liveness oracle").
///
/// `num_scratch_regs` is fixed per `Backend` (its usable scratch set, after
/// reserving the frame pointer, linear-memory base, and any ABI-fixed
/// registers); indices into `last_use` are physical register numbers.
pub struct RegisterTracker {
    free: alloc::vec::Vec<bool>,
    last_use: alloc::vec::Vec<Option<StackNodeId>>,
}

impl RegisterTracker {
    pub fn new(num_regs: usize) -> Self {
        Self {
            free: alloc::vec![true; num_regs],
            last_use: alloc::vec![None; num_regs],
        }
    }

    pub fn is_free(&self, reg: PhysReg) -> bool {
        self.free[reg.0 as usize]
    }

    pub fn mark_used(&mut self, reg: PhysReg, owner: StackNodeId) {
        self.free[reg.0 as usize] = false;
        self.last_use[reg.0 as usize] = Some(owner);
    }

    pub fn mark_free(&mut self, reg: PhysReg) {
        self.free[reg.0 as usize] = true;
        self.last_use[reg.0 as usize] = None;
    }

    /// The oracle from §9: "is this register free?" answered by whether
    /// anything on the stack still references it.
    pub fn last_occurrence(&self, reg: PhysReg) -> Option<StackNodeId> {
        self.last_use[reg.0 as usize]
    }

    /// Returns the first free scratch register, scanning low to high so
    /// allocation is deterministic (and so ABI-fixed low registers, if any,
    /// can be excluded simply by marking them permanently used).
    pub fn first_free(&self) -> Option<PhysReg> {
        self.free
            .iter()
            .position(|&free| free)
            .map(|idx| PhysReg(idx as u8))
    }

    pub fn num_regs(&self) -> usize {
        self.free.len()
    }
}

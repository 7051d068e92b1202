use super::{locals::LocalSlot, regalloc::RegisterTracker};
use crate::{compiler_stack::PatchSite, module_info::SigIdx};
use alloc::vec::Vec;
use wasmc_collections::StackNodeId;

/// Per-function dynamic compile state (§3 `FunctionInfo`).
///
/// Constructed fresh for each function body; `Common`'s globals table and
/// `ModuleInfo` are the only state that outlives a single function.
pub struct FunctionCompileState {
    pub index: u32,
    pub sig_idx: SigIdx,
    pub locals: Vec<LocalSlot>,
    pub num_params: u32,
    pub num_locals_in_reg: u32,
    /// Current size, in bytes, of the stack frame's dynamic (spill) area.
    /// Monotonically tracked per §3's invariant; reset to a block's stashed
    /// value when a branch targets it.
    pub stack_frame_size: u32,
    /// High-water mark checked once per widened frame against the
    /// configured stack fence (§3: "further enlargements for spills are
    /// tracked and checked once per widened frame").
    pub checked_stack_frame_size: u32,
    pub param_width: u32,
    pub direct_locals_width: u32,
    pub last_block_reference: Option<StackNodeId>,
    pub unreachable: bool,
    pub properly_terminated: bool,
    pub regs: RegisterTracker,
    /// Forward calls to *this* function body recorded before it was
    /// emitted (§4.6 "Branch patching": the list head for a not-yet-emitted
    /// function lives in `wasmFncBodyBinaryPositions[fncIndex]`; we key by
    /// the function's own state instead of a global array indexed the same
    /// way).
    pub pending_forward_calls: Vec<PatchSite>,
    pub body_offset: Option<u32>,
}

impl FunctionCompileState {
    pub fn new(
        index: u32,
        sig_idx: SigIdx,
        locals: Vec<LocalSlot>,
        num_params: u32,
        num_scratch_regs: usize,
    ) -> Self {
        Self {
            index,
            sig_idx,
            locals,
            num_params,
            num_locals_in_reg: 0,
            stack_frame_size: 0,
            checked_stack_frame_size: 0,
            param_width: 0,
            direct_locals_width: 0,
            last_block_reference: None,
            unreachable: false,
            properly_terminated: false,
            regs: RegisterTracker::new(num_scratch_regs),
            pending_forward_calls: Vec::new(),
            body_offset: None,
        }
    }
}

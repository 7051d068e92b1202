//! The compiler's own expression stack: a mixed sequence of concrete
//! values, deferred actions, and control-flow frames (§3, §4.4).

use crate::{module_info::SigIdx, opcode::NumericOp};
use wasmc_collections::{StackArena, StackNodeId};
use wasmc_core::{UntypedValue, ValType};

/// An abstract physical register number. Each `Backend` maps this to its
/// own concrete register file (§4.6); `Common` and `CompilerStack` never
/// need to know how many bits wide a register is or what it's called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysReg(pub u8);

/// Where a materialized value currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Register(PhysReg),
    /// Byte offset from the frame pointer into the current function's
    /// spill area (a "temp slot", §3 `TEMP_RESULT`).
    StackSlot(i32),
    /// Byte offset into link data (§6 "Link data"): used for imported
    /// mutable globals whose authoritative storage is basedata, not the
    /// native stack frame.
    LinkData(u32),
}

/// A forward-branch patch site: a byte offset inside the function body's
/// native code where a relative displacement must be written once the
/// branch target becomes known (§4.6 "Branch patching").
#[derive(Debug, Clone, Copy)]
pub struct PatchSite {
    pub code_offset: u32,
}

/// A singly-linked list of not-yet-resolved forward branches, threaded
/// through a `Vec` rather than through raw pointers (§9: arena-style
/// indices, never pointers that outlive their backing storage).
#[derive(Debug, Clone, Default)]
pub struct PendingBranches(pub alloc::vec::Vec<PatchSite>);

impl PendingBranches {
    pub fn push(&mut self, site: PatchSite) {
        self.0.push(site);
    }

    pub fn take(&mut self) -> alloc::vec::Vec<PatchSite> {
        core::mem::take(&mut self.0)
    }
}

/// Static data shared by `BLOCK`/`LOOP`/`IFBLOCK` stack elements.
#[derive(Debug, Clone)]
pub struct BlockFrame {
    pub sig_idx: SigIdx,
    pub prev_block: Option<StackNodeId>,
    /// `stackFrameSize` at block entry; a branch targeting this block resets
    /// SP to this value before emitting the branch (§3 invariant).
    pub entry_stack_frame_size: u32,
    /// Byte offset (relative to the frame) where this block's results will
    /// be materialized once the block ends / loops back.
    pub results_stack_offset: i32,
    pub pending_branches: PendingBranches,
}

#[derive(Debug, Clone)]
pub enum StackElement {
    Invalid,
    ScratchRegister {
        reg: PhysReg,
        ty: ValType,
    },
    TempResult {
        storage: Storage,
        ty: ValType,
    },
    Constant {
        value: UntypedValue,
        ty: ValType,
    },
    Local {
        idx: u32,
    },
    Global {
        idx: u32,
    },
    /// An unemitted computation whose operands are the `arity()` stack
    /// elements immediately below this one at the time it was pushed.
    /// `side_effect` opcodes (those in `NumericOp::can_trap`) force a flush
    /// before the next side-effecting instruction (§4.5 "Side-effect
    /// barrier").
    DeferredAction {
        op: NumericOp,
        side_effect: bool,
    },
    Block(BlockFrame),
    Loop {
        frame: BlockFrame,
        /// Native code offset of the loop's first instruction; a
        /// backward branch to this loop targets here directly.
        start_offset: u32,
    },
    IfBlock {
        frame: BlockFrame,
        /// Patch site for the negated conditional branch emitted at `if`,
        /// resolved either at `else` (jump to there) or at `end` (jump past
        /// the whole construct) (§4.6 "IF").
        else_or_end_site: PatchSite,
        has_else: bool,
    },
    /// Marks a position whose value must not be condensed — used when a
    /// value has already been materialized by an operation with its own
    /// side-effect barrier and only needs to participate in stack-depth
    /// bookkeeping from here on.
    Skip,
}

impl StackElement {
    pub fn ty(&self) -> Option<ValType> {
        match self {
            StackElement::ScratchRegister { ty, .. }
            | StackElement::TempResult { ty, .. }
            | StackElement::Constant { ty, .. } => Some(*ty),
            _ => None,
        }
    }

    pub fn is_block_like(&self) -> bool {
        matches!(
            self,
            StackElement::Block(_) | StackElement::Loop { .. } | StackElement::IfBlock { .. }
        )
    }
}

/// The compiler's expression-tree stack (§4.4): a doubly-linked sequence of
/// [`StackElement`]s backed by an arena, supporting the operations needed to
/// collapse Wasm's tree-shaped expressions into linear native code in a
/// single pass.
pub struct CompilerStack {
    nodes: StackArena<StackElement>,
}

impl Default for CompilerStack {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerStack {
    pub fn new() -> Self {
        Self {
            nodes: StackArena::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn top(&self) -> Option<StackNodeId> {
        self.nodes.top()
    }

    pub fn push(&mut self, elem: StackElement) -> StackNodeId {
        self.nodes.push(elem)
    }

    pub fn pop(&mut self) -> Option<StackElement> {
        self.nodes.pop()
    }

    pub fn get(&self, id: StackNodeId) -> &StackElement {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: StackNodeId) -> &mut StackElement {
        self.nodes.get_mut(id)
    }

    pub fn prev(&self, id: StackNodeId) -> Option<StackNodeId> {
        self.nodes.prev(id)
    }

    pub fn next(&self, id: StackNodeId) -> Option<StackNodeId> {
        self.nodes.next(id)
    }

    pub fn sibling(&self, id: StackNodeId) -> Option<StackNodeId> {
        self.nodes.sibling(id)
    }

    pub fn set_sibling(&mut self, id: StackNodeId, sibling: Option<StackNodeId>) {
        self.nodes.set_sibling(id, sibling)
    }

    pub fn insert(&mut self, before: StackNodeId, elem: StackElement) -> StackNodeId {
        self.nodes.insert(before, elem)
    }

    pub fn erase(&mut self, id: StackNodeId) -> StackElement {
        self.nodes.erase(id)
    }

    /// Splits the chain at `at` (inclusive), removing `[at, top]` from this
    /// stack and returning them in bottom-to-top order. Used to pop a block
    /// while preserving its trailing results subsequence (§4.4 `split`).
    pub fn split_from(&mut self, at: StackNodeId) -> alloc::vec::Vec<StackElement> {
        self.nodes.split(at)
    }

    /// Re-appends a previously split-off subchain at the current top
    /// (§4.4 `contactAtEnd`).
    pub fn contact_at_end(
        &mut self,
        subchain: alloc::vec::Vec<StackElement>,
    ) -> alloc::vec::Vec<StackNodeId> {
        self.nodes.contact_at_end(subchain)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StackNodeId, &StackElement)> {
        self.nodes.iter()
    }
}

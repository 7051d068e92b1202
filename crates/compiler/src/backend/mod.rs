//! The contract between `Common` and an ISA-specific code generator (§4.6).
//!
//! Three implementations exist: [`x86_64`] (the reference, full-fidelity
//! backend), [`aarch64`] and [`tricore`] (same trait, a reduced but genuine
//! instruction subset — see `DESIGN.md` for the scope tradeoff). Concrete
//! instruction encoding *tables* are explicitly out of scope collaborators
//! per spec §1; what's in scope is the shape of the contract itself and one
//! fully worked-out encoder (x86-64) that demonstrates it end to end.

pub mod aarch64;
pub mod tricore;
pub mod x86_64;

use crate::{
    common::locals::{GlobalSlot, LocalSlot},
    compiler_stack::{PatchSite, PhysReg, Storage},
    mem_writer::MemWriter,
    module_info::ModuleInfo,
    opcode::{Cond, LoadExtend, MemArg, MemWidth, NumericOp},
};
use wasmc_core::{CompileError, TrapCode, UntypedValue, ValType};

pub type BResult<T> = Result<T, CompileError>;

/// A resolved addressing expression: base register plus displacement,
/// generic over the displacement width the instruction class needs
/// (§4.6 "Address modes and offsets").
#[derive(Debug, Clone, Copy)]
pub struct RegDisp {
    pub base: PhysReg,
    pub disp: i32,
}

/// What the backend should do with a value about to be produced: route it
/// straight into a register (default), or directly into the slot a
/// surrounding block/loop/local.set expects, fusing the materialization with
/// its destination instead of emitting an extra move (§4.5 `targetHint`).
#[derive(Debug, Clone, Copy)]
pub enum TargetHint {
    AnyRegister,
    Local(u32),
    Global(u32),
    Storage(Storage),
}

/// ISA-specific code generation, driven entirely by `Common` and
/// `Frontend`. No method here receives or returns an IR node: every
/// argument is either a concrete `StackElement`-derived value (register /
/// storage / constant) or a plain opcode, and every method appends bytes
/// directly to the `MemWriter` it's given.
pub trait Backend {
    /// Number of general-purpose scratch registers available to the
    /// allocator, after reserving ABI-fixed and frame/link-data-base
    /// registers.
    fn num_scratch_regs(&self) -> usize;

    // --- function lifecycle ---

    fn allocate_local(&mut self, ty: ValType, is_param: bool, index: u32) -> LocalSlot;

    /// Emits the function prologue: stack-frame allocation, stacktrace push
    /// (§6 glossary), and patches any forward calls recorded against this
    /// function's body before it existed.
    fn entered_function(
        &mut self,
        writer: &mut MemWriter,
        func_index: u32,
        fixed_stack_frame_size: u32,
        pending_forward_calls: &[PatchSite],
    ) -> BResult<()>;

    /// Emits the native-ABI C wrapper described in §6's calling convention:
    /// `fn(userArgs, linMemBase, trapCodeSlot, returnValues)`.
    fn emit_function_entry_point(
        &mut self,
        writer: &mut MemWriter,
        func_index: u32,
        params: &[ValType],
        results: &[ValType],
        wasm_body_offset: u32,
    ) -> BResult<u32>;

    /// Emits a Wasm-ABI-callable thunk for an imported function, placed in
    /// the table for `call_indirect` to reach (§4.7 "Element section").
    fn emit_wasm_to_native_adapter(
        &mut self,
        writer: &mut MemWriter,
        import_link_data_offset: u32,
        params: &[ValType],
        results: &[ValType],
    ) -> BResult<u32>;

    /// Emits the passive-mode memory-extension helper (§4.6).
    fn emit_extension_request_function(&mut self, writer: &mut MemWriter) -> BResult<u32>;

    // --- calls ---

    fn exec_direct_fnc_call(
        &mut self,
        writer: &mut MemWriter,
        target_offset: Option<u32>,
        pending_forward_calls: &mut Vec<PatchSite>,
    ) -> BResult<()>;

    fn exec_indirect_wasm_call(
        &mut self,
        writer: &mut MemWriter,
        table_index_reg: PhysReg,
        expected_sig_idx: u32,
    ) -> BResult<()>;

    fn exec_import_call(
        &mut self,
        writer: &mut MemWriter,
        link_data_offset: u32,
    ) -> BResult<()>;

    // --- linear memory ---

    fn execute_linear_memory_load(
        &mut self,
        writer: &mut MemWriter,
        addr_reg: PhysReg,
        mem_arg: MemArg,
        width: MemWidth,
        extend: LoadExtend,
        result_ty: ValType,
        dest: PhysReg,
    ) -> BResult<()>;

    fn execute_linear_memory_store(
        &mut self,
        writer: &mut MemWriter,
        addr_reg: PhysReg,
        mem_arg: MemArg,
        width: MemWidth,
        value: PhysReg,
    ) -> BResult<()>;

    fn execute_linear_memory_copy(&mut self, writer: &mut MemWriter) -> BResult<()>;

    fn execute_linear_memory_fill(&mut self, writer: &mut MemWriter) -> BResult<()>;

    // --- arithmetic / conversions ---

    /// Lowers a single `DEFERREDACTION` (§4.5 `emitDeferredAction`):
    /// `op`'s operands already live in `operands` (registers or an
    /// immediate-folded constant handled by `Common` before calling this),
    /// the result is written to `dest`.
    fn emit_deferred_action(
        &mut self,
        writer: &mut MemWriter,
        op: NumericOp,
        operands: &[PhysReg],
        dest: PhysReg,
    ) -> BResult<()>;

    fn emit_comparison(
        &mut self,
        writer: &mut MemWriter,
        cond: Cond,
        ty: ValType,
        lhs: PhysReg,
        rhs: PhysReg,
    ) -> BResult<()>;

    /// Emits a conditional (or, if `cond` is `None`, unconditional) branch.
    /// Driven by the last-emitted-comparison hint rather than re-emitting a
    /// compare (§4.6: "the second is driven by a *last-emitted-comparison*
    /// hint... so redundant compares are avoided").
    fn emit_branch(
        &mut self,
        writer: &mut MemWriter,
        target_offset: Option<u32>,
        cond: Option<Cond>,
        negate: bool,
    ) -> BResult<PatchSite>;

    fn patch_branch(&mut self, writer: &mut MemWriter, site: PatchSite, target_offset: u32) -> BResult<()>;

    fn emit_select(
        &mut self,
        writer: &mut MemWriter,
        truthy: PhysReg,
        falsy: PhysReg,
        cond_reg: PhysReg,
        dest: PhysReg,
    ) -> BResult<()>;

    // --- control ---

    fn execute_trap(&mut self, writer: &mut MemWriter, code: TrapCode) -> BResult<()>;

    fn execute_table_branch(
        &mut self,
        writer: &mut MemWriter,
        index_reg: PhysReg,
        targets: &[u32],
        default_target: u32,
    ) -> BResult<()>;

    fn execute_get_mem_size(&mut self, writer: &mut MemWriter, dest: PhysReg) -> BResult<()>;

    fn execute_mem_grow(&mut self, writer: &mut MemWriter, delta: PhysReg, dest: PhysReg) -> BResult<()>;

    fn emit_return_and_unwind_stack(&mut self, writer: &mut MemWriter, results: &[ValType]) -> BResult<()>;

    // --- register / stack movement (used by Common) ---

    fn move_reg_to_reg(&mut self, writer: &mut MemWriter, ty: ValType, src: PhysReg, dst: PhysReg) -> BResult<()>;

    fn load_const(&mut self, writer: &mut MemWriter, ty: ValType, value: UntypedValue, dst: PhysReg) -> BResult<()>;

    fn load_storage(&mut self, writer: &mut MemWriter, ty: ValType, src: Storage, dst: PhysReg) -> BResult<()>;

    fn store_to_storage(&mut self, writer: &mut MemWriter, ty: ValType, src: PhysReg, dst: Storage) -> BResult<()>;

    /// Evicts the value in `reg` to a freshly allocated stack slot,
    /// returning that slot (§4.5 "spill it via `Backend::spillFromStack` to
    /// ... a freshly allocated temp slot").
    fn spill_from_stack(&mut self, writer: &mut MemWriter, ty: ValType, reg: PhysReg) -> BResult<Storage>;

    fn spill_all_variables(&mut self, writer: &mut MemWriter, locals: &mut [LocalSlot]) -> BResult<()>;

    fn finalize_block(&mut self, writer: &mut MemWriter, pending: &[PatchSite], here: u32) -> BResult<()>;

    /// Resolves a storage location to an address expression, materializing
    /// an address scratch register if the displacement doesn't fit the
    /// instruction's encodable width (§4.6 "Address modes and offsets").
    fn resolve_address(&mut self, writer: &mut MemWriter, storage: Storage, scratch: PhysReg) -> RegDisp;

    fn canonicalize_nan(&mut self, writer: &mut MemWriter, ty: ValType, reg: PhysReg) -> BResult<()>;
}

/// Re-exported so `common`/`frontend` can name globals uniformly without an
/// extra `use` for a type that only appears in trait bounds.
pub type GlobalSlotRef<'a> = &'a GlobalSlot;

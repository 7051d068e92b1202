//! Backend-agnostic compilation orchestration (§4.5 `Common`).
//!
//! `Common` sits between `Frontend`'s per-opcode dispatch and a concrete
//! `Backend`: it owns condensation (collapsing the `CompilerStack`'s
//! expression forest into linear code), register allocation, and the
//! module-wide facts (globals) that outlive any one function body.

pub mod function_state;
pub mod locals;
pub mod regalloc;

use crate::{
    backend::{Backend, TargetHint},
    compiler_stack::{CompilerStack, PhysReg, Storage, StackElement},
    config::CompilerConfig,
    mem_writer::MemWriter,
    opcode::NumericOp,
};
use alloc::vec::Vec;
use locals::GlobalSlot;
use wasmc_core::{CompileError, CompileErrorKind, ValType};

pub use function_state::FunctionCompileState;

type Res<T> = Result<T, CompileError>;

fn underflow() -> CompileError {
    CompileErrorKind::Message("compiler stack underflow during condensation".into()).into()
}

/// Module-wide compilation state shared by every function body, plus the
/// condensation/regalloc logic that drives any `Backend`.
pub struct Common {
    pub config: CompilerConfig,
    pub globals: Vec<GlobalSlot>,
}

impl Common {
    pub fn new(config: CompilerConfig, globals: Vec<GlobalSlot>) -> Self {
        Self { config, globals }
    }

    /// Materializes the top of `stack` into a single concrete value,
    /// recursively condensing any `DeferredAction` operands it depends on
    /// (§4.5 `condenseValentBlockBelow`). Leaves the result pushed back on
    /// top of `stack`.
    pub fn condense_top<B: Backend>(
        &mut self,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
    ) -> Res<()> {
        let elem = stack.pop().ok_or_else(underflow)?;
        let materialized = self.condense_elem(elem, stack, backend, writer, func)?;
        let id = stack.push(materialized);
        if let StackElement::ScratchRegister { reg, .. } = stack.get(id) {
            func.regs.mark_used(*reg, id);
        }
        Ok(())
    }

    /// Condenses exactly `down_to_len` elements above the given stack
    /// length, used at block/loop ends to land every result value into a
    /// concrete register before the block's result slots are read by its
    /// continuation (§4.5 "the block's results are condensed and routed to
    /// `resultsStackOffset` before falling through").
    pub fn condense_above<B: Backend>(
        &mut self,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
        floor: usize,
    ) -> Res<()> {
        while stack.len() > floor {
            self.condense_top(stack, backend, writer, func)?;
        }
        Ok(())
    }

    fn condense_elem<B: Backend>(
        &mut self,
        elem: StackElement,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
    ) -> Res<StackElement> {
        match elem {
            StackElement::DeferredAction { op, .. } => {
                let arity = op.arity();
                let mut raw = Vec::with_capacity(arity);
                for _ in 0..arity {
                    raw.push(stack.pop().ok_or_else(underflow)?);
                }
                raw.reverse();

                let mut operand_regs = Vec::with_capacity(arity);
                for operand in raw {
                    let materialized = self.condense_elem(operand, stack, backend, writer, func)?;
                    let reg = self.lift_to_reg(materialized, stack, backend, writer, func)?;
                    operand_regs.push(reg);
                }

                let dest = self.alloc_scratch(stack, backend, writer, func)?;
                backend.emit_deferred_action(writer, op, &operand_regs, dest)?;
                if is_float(op.result_type()) {
                    backend.canonicalize_nan(writer, op.result_type(), dest)?;
                }
                Ok(StackElement::ScratchRegister { reg: dest, ty: op.result_type() })
            }
            other => Ok(other),
        }
    }

    /// Ensures `elem` lives in a register, materializing (and, if necessary,
    /// spilling something else to make room) as needed. Does not push
    /// anything onto `stack`; the caller owns placement of the result.
    fn lift_to_reg<B: Backend>(
        &mut self,
        elem: StackElement,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
    ) -> Res<PhysReg> {
        match elem {
            StackElement::ScratchRegister { reg, .. } => Ok(reg),
            StackElement::Constant { value, ty } => {
                let reg = self.alloc_scratch(stack, backend, writer, func)?;
                backend.load_const(writer, ty, value, reg)?;
                Ok(reg)
            }
            StackElement::TempResult { storage, ty } => {
                let reg = self.alloc_scratch(stack, backend, writer, func)?;
                backend.load_storage(writer, ty, storage, reg)?;
                Ok(reg)
            }
            StackElement::Local { idx } => {
                let slot = *func
                    .locals
                    .get(idx as usize)
                    .ok_or(CompileErrorKind::LocalIndexOutOfRange { index: idx })?;
                let reg = self.alloc_scratch(stack, backend, writer, func)?;
                backend.load_storage(writer, slot.ty, slot.storage, reg)?;
                Ok(reg)
            }
            StackElement::Global { idx } => {
                let slot = *self
                    .globals
                    .get(idx as usize)
                    .ok_or(CompileErrorKind::GlobalIndexOutOfRange { index: idx })?;
                let reg = self.alloc_scratch(stack, backend, writer, func)?;
                match slot.storage {
                    locals::GlobalStorage::Const(value) => backend.load_const(writer, slot.ty, value, reg)?,
                    locals::GlobalStorage::LinkData(offset) => {
                        backend.load_storage(writer, slot.ty, Storage::LinkData(offset), reg)?
                    }
                }
                Ok(reg)
            }
            StackElement::DeferredAction { .. } => {
                unreachable!("condense_elem always resolves DeferredAction before lift_to_reg sees it")
            }
            StackElement::Invalid | StackElement::Skip => {
                Err(CompileErrorKind::Message("attempted to lift a non-value stack element".into()).into())
            }
            StackElement::Block(_) | StackElement::Loop { .. } | StackElement::IfBlock { .. } => {
                Err(CompileErrorKind::Message("attempted to lift a control-flow frame as a value".into()).into())
            }
        }
    }

    /// Allocates a scratch register, spilling the oldest still-live holder
    /// if none is free (§9 "Last-occurrence index" drives spill-victim
    /// selection; this scans registers low to high for the first one whose
    /// owning stack slot can be safely evicted to a temp slot).
    fn alloc_scratch<B: Backend>(
        &mut self,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
    ) -> Res<PhysReg> {
        if let Some(reg) = func.regs.first_free() {
            return Ok(reg);
        }
        for i in 0..func.regs.num_regs() {
            let reg = PhysReg(i as u8);
            let Some(owner) = func.regs.last_occurrence(reg) else { continue };
            let StackElement::ScratchRegister { ty, .. } = *stack.get(owner) else {
                continue;
            };
            let slot = backend.spill_from_stack(writer, ty, reg)?;
            *stack.get_mut(owner) = StackElement::TempResult { storage: slot, ty };
            func.regs.mark_free(reg);
            return Ok(reg);
        }
        Err(CompileErrorKind::Message("register allocator exhausted: every scratch register is pinned".into()).into())
    }

    /// Pushes a `DEFERREDACTION` for a non-trapping arithmetic/comparison
    /// opcode (§4.5): the Wasm operand stack already holds its `op.arity()`
    /// operands as the immediately-preceding compiler stack elements, so no
    /// popping happens here — only `condense_elem` walks back into them.
    pub fn push_deferred(&mut self, stack: &mut CompilerStack, op: NumericOp) {
        stack.push(StackElement::DeferredAction { op, side_effect: op.can_trap() });
    }

    /// Side-effect barrier (§4.5): before emitting an opcode that traps,
    /// calls, or otherwise has an externally visible effect, any
    /// trap-capable `DeferredAction` still pending below the values it's
    /// about to consume must be condensed first, so traps fire in program
    /// order relative to the new side effect.
    pub fn flush_side_effect_barrier<B: Backend>(
        &mut self,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
        floor: usize,
    ) -> Res<()> {
        self.condense_above(stack, backend, writer, func, floor)
    }

    /// Materializes a value into a register or the location named by
    /// `hint`, used when emitting `local.set`/`global.set`/a block's
    /// results where the destination is already known (§4.5 `targetHint`
    /// fusion avoids an extra move when the hint and the natural
    /// materialization agree).
    pub fn condense_with_hint<B: Backend>(
        &mut self,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
        hint: TargetHint,
    ) -> Res<()> {
        self.condense_top(stack, backend, writer, func)?;
        let id = stack.top().ok_or_else(underflow)?;
        let elem = stack.get(id).clone();
        let reg = self.lift_to_reg(elem, stack, backend, writer, func)?;
        match hint {
            TargetHint::AnyRegister => {}
            TargetHint::Storage(dst) => {
                let ty = stack.get(id).ty().unwrap_or(ValType::I32);
                backend.store_to_storage(writer, ty, reg, dst)?;
            }
            TargetHint::Local(idx) => {
                let slot = *func
                    .locals
                    .get(idx as usize)
                    .ok_or(CompileErrorKind::LocalIndexOutOfRange { index: idx })?;
                backend.store_to_storage(writer, slot.ty, reg, slot.storage)?;
            }
            TargetHint::Global(idx) => {
                let slot = *self
                    .globals
                    .get(idx as usize)
                    .ok_or(CompileErrorKind::GlobalIndexOutOfRange { index: idx })?;
                if let locals::GlobalStorage::LinkData(offset) = slot.storage {
                    backend.store_to_storage(writer, slot.ty, reg, Storage::LinkData(offset))?;
                }
            }
        }
        Ok(())
    }

    /// Pops the top compiler-stack element and materializes it straight into
    /// a register, leaving nothing behind on `stack`. Used by `Frontend` for
    /// operations that have no `StackElement` representation of their own —
    /// memory loads/stores, calls, `select`'s three operands, `br`/`br_if`'s
    /// label values — wherever `condense_top`'s "leave it on the stack"
    /// behavior isn't what the caller wants.
    pub fn pop_to_reg<B: Backend>(
        &mut self,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
    ) -> Res<PhysReg> {
        let elem = stack.pop().ok_or_else(underflow)?;
        let materialized = self.condense_elem(elem, stack, backend, writer, func)?;
        self.lift_to_reg(materialized, stack, backend, writer, func)
    }

    /// Grabs a free scratch register for a transient value that will never
    /// become a `StackElement` of its own (a bounds-check limit, a zero
    /// constant fed into a comparison, ...). The caller must consume it
    /// before allocating again; nothing marks it used, so the allocator is
    /// free to hand it right back out.
    pub fn alloc_temp_reg<B: Backend>(
        &mut self,
        stack: &mut CompilerStack,
        backend: &mut B,
        writer: &mut MemWriter,
        func: &mut FunctionCompileState,
    ) -> Res<PhysReg> {
        self.alloc_scratch(stack, backend, writer, func)
    }

    /// Bumps the function's dynamic stack-frame size and, once per widened
    /// frame, checks it against the configured fence (§3 "further
    /// enlargements for spills are tracked and checked once per widened
    /// frame").
    pub fn note_frame_growth(&self, func: &mut FunctionCompileState, new_size: u32) -> Res<()> {
        if new_size <= func.stack_frame_size {
            return Ok(());
        }
        func.stack_frame_size = new_size;
        if new_size > func.checked_stack_frame_size {
            func.checked_stack_frame_size = new_size;
            if new_size > self.config.max_stack_frame_bytes() {
                return Err(CompileErrorKind::StackFrameTooLarge.into());
            }
        }
        Ok(())
    }
}

fn is_float(ty: ValType) -> bool {
    matches!(ty, ValType::F32 | ValType::F64)
}

//! Wasm's type system: a polymorphic value-type stack plus a stack of
//! control-flow frames (§4.2).

use crate::module_info::{ModuleInfo, SigIdx};
use alloc::vec::Vec;
use wasmc_core::{CompileError, CompileErrorKind, ValType};

type Res<T> = Result<T, CompileError>;

/// The control-frame opcode that opened a frame; needed to tell `loop`
/// (branch target = frame start, params act like results) apart from
/// `block`/`if` (branch target = frame end) when validating `br`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Block,
    Loop,
    If,
    /// The implicit outermost frame wrapping a function body.
    Function,
}

#[derive(Debug, Clone)]
pub struct ControlFrame {
    pub kind: FrameKind,
    pub sig_idx: SigIdx,
    /// Height of the value stack at frame entry (below the frame's own
    /// params); popping past this height is a validation error unless the
    /// frame is unreachable.
    pub height_at_entry: usize,
    pub unreachable: bool,
    pub has_else: bool,
}

impl ControlFrame {
    /// The types a branch *to* this frame must supply: for a `loop` that is
    /// the frame's parameters (the loop restarts with them), for every other
    /// frame kind it's the frame's results (§4.6 "loops receive params like
    /// blocks receive results").
    pub fn label_types<'a>(&self, module: &'a ModuleInfo) -> Res<Vec<ValType>> {
        let func_ty = module.signature(self.sig_idx)?;
        Ok(match self.kind {
            FrameKind::Loop => func_ty.params().to_vec(),
            _ => func_ty.results().to_vec(),
        })
    }
}

/// The Wasm operand-type stack plus its control-frame stack.
///
/// Every opcode boundary maintains the invariant from §3: the compiler
/// stack always conforms to this stack in depth and type, except inside a
/// formally-unreachable frame, where pops are infallible and the
/// polymorphic "any" type is returned instead of type-checking.
pub struct ValidationStack {
    values: Vec<ValType>,
    frames: Vec<ControlFrame>,
}

impl Default for ValidationStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationStack {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn push_number(&mut self, ty: ValType) {
        self.values.push(ty);
    }

    fn current_frame(&self) -> Option<&ControlFrame> {
        self.frames.last()
    }

    fn current_frame_mut(&mut self) -> Option<&mut ControlFrame> {
        self.frames.last_mut()
    }

    fn current_unreachable(&self) -> bool {
        self.current_frame().map(|f| f.unreachable).unwrap_or(false)
    }

    fn height_floor(&self) -> usize {
        self.current_frame().map(|f| f.height_at_entry).unwrap_or(0)
    }

    /// Pops one value of any type, honoring the polymorphic stack under
    /// unreachable code (§4.2: "pops are infallible and yield the
    /// polymorphic 'any' type").
    pub fn pop(&mut self) -> Res<Option<ValType>> {
        if self.values.len() > self.height_floor() {
            return Ok(self.values.pop());
        }
        if self.current_unreachable() {
            return Ok(None);
        }
        Err(CompileErrorKind::UnbalancedStackAtBlockEnd.into())
    }

    /// Pops one value and checks it against `expected`; under an
    /// unreachable frame with an empty polymorphic remainder this always
    /// succeeds.
    pub fn pop_expect(&mut self, expected: ValType) -> Res<()> {
        match self.pop()? {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(CompileErrorKind::TypeMismatch {
                expected: alloc::format!("{expected}"),
                found: alloc::format!("{actual}"),
            }
            .into()),
            None => Ok(()),
        }
    }

    pub fn enter(&mut self, kind: FrameKind, sig_idx: SigIdx, module: &ModuleInfo) -> Res<()> {
        let func_ty = module.signature(sig_idx)?;
        // Block/loop/if parameters are already on the stack (pushed by the
        // caller before entering); they stay there as the frame's initial
        // contents rather than being popped and re-pushed.
        let num_params = func_ty.params().len();
        if self.values.len() < num_params {
            return Err(CompileErrorKind::UnbalancedStackAtBlockEnd.into());
        }
        let height_at_entry = self.values.len() - num_params;
        self.frames.push(ControlFrame {
            kind,
            sig_idx,
            height_at_entry,
            unreachable: false,
            has_else: false,
        });
        Ok(())
    }

    /// `else`: checks the `if` frame's results are present, then resets the
    /// value stack back to the frame's parameters for the else arm.
    pub fn else_(&mut self, module: &ModuleInfo) -> Res<()> {
        let frame = self
            .frames
            .last_mut()
            .filter(|f| f.kind == FrameKind::If)
            .ok_or(CompileErrorKind::Message("else outside if".into()))?;
        frame.has_else = true;
        let sig_idx = frame.sig_idx;
        let height_at_entry = frame.height_at_entry;
        let func_ty = module.signature(sig_idx)?;
        let results = func_ty.results().to_vec();
        let unreachable = frame.unreachable;
        if !unreachable {
            for &ty in results.iter().rev() {
                self.pop_expect(ty)?;
            }
            if self.values.len() != height_at_entry {
                return Err(CompileErrorKind::UnbalancedStackAtBlockEnd.into());
            }
        }
        self.values.truncate(height_at_entry);
        let func_ty = module.signature(sig_idx)?;
        for &p in func_ty.params() {
            self.values.push(p);
        }
        self.current_frame_mut().unwrap().unreachable = false;
        Ok(())
    }

    /// `end`: checks the frame's results are present and pops the frame,
    /// leaving exactly its results on the value stack.
    pub fn end(&mut self, module: &ModuleInfo) -> Res<ControlFrame> {
        let frame = self
            .frames
            .last()
            .cloned()
            .ok_or(CompileErrorKind::Message("end outside any block".into()))?;
        let func_ty = module.signature(frame.sig_idx)?;
        let results = func_ty.results().to_vec();
        if frame.kind == FrameKind::If && !results.is_empty() && !frame.has_else {
            // An `if` with non-empty results must have an `else` arm,
            // because the "then"-missing arm would otherwise produce no
            // values at all.
            return Err(CompileErrorKind::TypeMismatch {
                expected: alloc::format!("{} result(s) from else arm", results.len()),
                found: "no else arm".into(),
            }
            .into());
        }
        if !frame.unreachable {
            for &ty in results.iter().rev() {
                self.pop_expect(ty)?;
            }
            if self.values.len() != frame.height_at_entry {
                return Err(CompileErrorKind::UnbalancedStackAtBlockEnd.into());
            }
        } else {
            self.values.truncate(frame.height_at_entry);
        }
        self.frames.pop();
        for &ty in &results {
            self.values.push(ty);
        }
        // Propagate the popped frame's reachability into its parent: ending
        // a reachable frame never makes its parent unreachable, but nothing
        // else changes parent state either; this is a no-op, kept explicit
        // for readers tracing the unreachable-propagation rule.
        Ok(frame)
    }

    /// `br $depth`: validates that the targeted frame's label types are
    /// present on top of the stack, without popping them (a branch is not
    /// itself a block exit).
    pub fn branch(&mut self, depth: u32, module: &ModuleInfo) -> Res<FrameKind> {
        let frame_idx = self
            .frames
            .len()
            .checked_sub(1 + depth as usize)
            .ok_or(CompileErrorKind::LabelIndexOutOfRange { index: depth })?;
        let frame = self.frames[frame_idx].clone();
        let label_types = frame.label_types(module)?;
        let saved = self.values.clone();
        let saved_unreachable = self.current_frame().map(|f| f.unreachable).unwrap_or(false);
        for &ty in label_types.iter().rev() {
            self.pop_expect(ty)?;
        }
        // Restore: `br` validates but does not consume the operand stack
        // (unlike `end`), since execution may continue past it if reached
        // conditionally (`br_if`) or not at all if this validation call is
        // for a `br_table` arm.
        self.values = saved;
        let _ = saved_unreachable;
        Ok(frame.kind)
    }

    /// Marks the current (innermost) frame unreachable and collapses the
    /// value stack to the polymorphic remainder (§4.2, used after
    /// `unreachable`/`br`/`return`).
    pub fn mark_current_block_unreachable(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.unreachable = true;
            self.values.truncate(frame.height_at_entry);
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.current_unreachable()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_at(&self, depth: u32) -> Option<&ControlFrame> {
        let idx = self.frames.len().checked_sub(1 + depth as usize)?;
        self.frames.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmc_core::val_type::FuncType;

    fn add_i32_i32_sig(module: &mut ModuleInfo) -> SigIdx {
        module
            .add_signature(FuncType::new([ValType::I32], [ValType::I32]))
            .unwrap()
    }

    #[test]
    fn simple_block_balances() {
        let mut module = ModuleInfo::new();
        let sig = add_i32_i32_sig(&mut module);
        let mut vs = ValidationStack::new();
        vs.push_number(ValType::I32); // block param
        vs.enter(FrameKind::Block, sig, &module).unwrap();
        let frame = vs.end(&module).unwrap();
        assert_eq!(frame.kind, FrameKind::Block);
    }

    #[test]
    fn unreachable_absorbs_any_pop() {
        let mut vs = ValidationStack::new();
        let mut module = ModuleInfo::new();
        module.finish_types();
        let empty = module.empty_block_sig();
        vs.enter(FrameKind::Block, empty, &module).unwrap();
        vs.mark_current_block_unreachable();
        // Popping past the (now truncated) stack under unreachable yields None, not an error.
        assert!(vs.pop().unwrap().is_none());
        assert!(vs.pop_expect(ValType::I64).is_ok());
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let mut vs = ValidationStack::new();
        vs.push_number(ValType::I64);
        assert!(vs.pop_expect(ValType::I32).is_err());
    }

    #[test]
    fn branch_validates_without_consuming() {
        let mut module = ModuleInfo::new();
        let sig = add_i32_i32_sig(&mut module);
        let mut vs = ValidationStack::new();
        vs.push_number(ValType::I32);
        vs.enter(FrameKind::Block, sig, &module).unwrap();
        vs.push_number(ValType::I32);
        let before = vs.values.len();
        vs.branch(0, &module).unwrap();
        assert_eq!(vs.values.len(), before);
    }
}

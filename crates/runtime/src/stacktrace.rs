//! Fixed-capacity call-stack ring buffer, recorded by the native prologue of
//! every compiled function and drained by [`crate::Runtime::print_stacktrace`]
//! after a trap.
//!
//! Grounded on `original_source/extensions/TraceBuffer.hpp`'s `TraceBuffer`:
//! that type is a growable trace-point log swapped out to a deque once
//! nearly full. A trap-time stacktrace has no equivalent of "swap out and
//! keep going" — capacity is fixed at compile time (`stacktraceEntryCount`,
//! §6) and entries before that point are simply overwritten, so this is
//! modeled as a ring rather than a growable log.

use alloc::vec::Vec;

/// One recorded call frame: the callee's function index and its return
/// address (a code offset into the artifact, not an absolute pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub func_index: u32,
    pub return_offset: u32,
}

/// A ring buffer over a fixed number of [`Frame`] slots. `push` never fails;
/// once full it silently overwrites the oldest entry, so the buffer always
/// reflects the deepest recent call chain rather than the first one seen.
pub struct StackTrace {
    slots: Vec<Frame>,
    next: usize,
    len: usize,
}

impl StackTrace {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: alloc::vec![Frame { func_index: 0, return_offset: 0 }; capacity],
            next: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn push(&mut self, frame: Frame) {
        if self.slots.is_empty() {
            return;
        }
        self.slots[self.next] = frame;
        self.next = (self.next + 1) % self.slots.len();
        self.len = (self.len + 1).min(self.slots.len());
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates recorded frames oldest-to-newest (call order, not pop order).
    pub fn iter_in_order(&self) -> impl Iterator<Item = Frame> + '_ {
        let cap = self.slots.len();
        let start = if self.len < cap { 0 } else { self.next };
        (0..self.len).map(move |i| self.slots[(start + i) % cap.max(1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_after_capacity() {
        let mut t = StackTrace::with_capacity(3);
        for i in 0..5u32 {
            t.push(Frame { func_index: i, return_offset: i * 4 });
        }
        assert_eq!(t.len(), 3);
        let got: Vec<u32> = t.iter_in_order().map(|f| f.func_index).collect();
        assert_eq!(got, alloc::vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_never_records() {
        let mut t = StackTrace::with_capacity(0);
        t.push(Frame { func_index: 1, return_offset: 1 });
        assert_eq!(t.len(), 0);
    }
}

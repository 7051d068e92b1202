use core::fmt;

/// Wasm-mandated trap reasons, plus the handful of host-cooperative ones
/// listed in spec §5/§7 (interruption, stack fence).
///
/// This is the flat code that travels through the trap protocol of §4.8:
/// the generated code never carries a `String`, only this small `Copy` enum,
/// written into the caller's `trapCodeSlot` as a `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TrapCode {
    /// `unreachable` instruction executed.
    Unreachable = 0,
    /// Integer division by zero.
    DivByZero = 1,
    /// Signed division overflow (`INT_MIN / -1`).
    DivOverflow = 2,
    /// `i32.trunc_f32_s` & co. on a NaN or out-of-range float.
    IntegerTruncationOverflow = 3,
    /// Linear-memory load/store address out of bounds.
    MemoryOutOfBounds = 4,
    /// `call_indirect` table index out of bounds.
    IndirectCallTableOutOfBounds = 5,
    /// `call_indirect` table slot is a null/unused entry.
    IndirectCallNullEntry = 6,
    /// `call_indirect` target has a different signature than requested.
    IndirectCallSignatureMismatch = 7,
    /// Call to an import that was compiled with `allow_unknown_imports` and
    /// never got linked.
    CalledFunctionNotLinked = 8,
    /// Host wrote a non-zero `statusFlags` byte (spec §5 cancellation).
    HostInterruption = 9,
    /// A function's stack frame widened past the configured software fence.
    StackOverflow = 10,
    /// `memory.grow`'s host callback could not satisfy a `memory.init`/bulk
    /// `memory.copy`/`memory.fill` bounds requirement even after extension.
    MemoryGrowFailed = 11,
}

impl TrapCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Unreachable,
            1 => Self::DivByZero,
            2 => Self::DivOverflow,
            3 => Self::IntegerTruncationOverflow,
            4 => Self::MemoryOutOfBounds,
            5 => Self::IndirectCallTableOutOfBounds,
            6 => Self::IndirectCallNullEntry,
            7 => Self::IndirectCallSignatureMismatch,
            8 => Self::CalledFunctionNotLinked,
            9 => Self::HostInterruption,
            10 => Self::StackOverflow,
            11 => Self::MemoryGrowFailed,
            _ => return None,
        })
    }
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Unreachable => "unreachable instruction executed",
            Self::DivByZero => "integer division by zero",
            Self::DivOverflow => "integer division overflow",
            Self::IntegerTruncationOverflow => "integer truncation overflow",
            Self::MemoryOutOfBounds => "out of bounds memory access",
            Self::IndirectCallTableOutOfBounds => "undefined element: indirect call index out of bounds",
            Self::IndirectCallNullEntry => "uninitialized element: indirect call to null entry",
            Self::IndirectCallSignatureMismatch => "indirect call type mismatch",
            Self::CalledFunctionNotLinked => "call to unlinked imported function",
            Self::HostInterruption => "execution interrupted by host",
            Self::StackOverflow => "call stack exhausted",
            Self::MemoryGrowFailed => "wasm `memory.grow` failed",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TrapCode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        for code in 0..=11u32 {
            let trap = TrapCode::from_code(code).expect("known code");
            assert_eq!(trap.code(), code);
        }
        assert!(TrapCode::from_code(12).is_none());
    }
}

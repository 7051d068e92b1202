//! Compiler configuration (builder style, mirroring the teacher's
//! `engine::config::Config` / `StoreLimitsBuilder` pattern).

/// Which native backend emits code for a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetIsa {
    X86_64,
    Aarch64,
    TriCore,
}

/// Resolves §9's "two distinct memory protection strategies" open question:
/// this implementation treats `Explicit` as the canonical, always-codegen'd
/// path, and represents `Passive` as a selectable flag rather than silently
/// picking one — but passive mode still lowers to the same explicit bounds
/// check, since the signal-handler landing pad is host/OS integration
/// outside this core (see SPEC_FULL.md §5 Open Question resolutions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsCheckMode {
    Explicit,
    Passive,
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub target: TargetIsa,
    /// Sign-extension opcodes (`i32.extend8_s` & co.) — always enabled,
    /// they're part of this implementation's extended MVP (§1).
    pub sign_extension: bool,
    /// `*.trunc_sat_*` non-trapping float-to-int conversions; gated behind
    /// a runtime-only flag per §1 ("via runtime-only flag").
    pub non_trapping_float_to_int: bool,
    /// `memory.copy`/`memory.fill` bulk-memory opcodes (§1).
    pub bulk_memory: bool,
    pub bounds_check_mode: BoundsCheckMode,
    /// Emit a debug map alongside the binary (§1: "a debug map is emitted
    /// but no stepping engine is specified here").
    pub emit_debug_map: bool,
    /// Override for `wasmc_core::limits::MAX_STACK_FRAME_BYTES`; `None`
    /// uses the implementation default.
    pub max_stack_frame_bytes: Option<u32>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            target: TargetIsa::X86_64,
            sign_extension: true,
            non_trapping_float_to_int: false,
            bulk_memory: true,
            bounds_check_mode: BoundsCheckMode::Explicit,
            emit_debug_map: false,
            max_stack_frame_bytes: None,
        }
    }
}

impl CompilerConfig {
    pub fn new(target: TargetIsa) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    pub fn non_trapping_float_to_int(mut self, enabled: bool) -> Self {
        self.non_trapping_float_to_int = enabled;
        self
    }

    pub fn bulk_memory(mut self, enabled: bool) -> Self {
        self.bulk_memory = enabled;
        self
    }

    pub fn bounds_check_mode(mut self, mode: BoundsCheckMode) -> Self {
        self.bounds_check_mode = mode;
        self
    }

    pub fn emit_debug_map(mut self, enabled: bool) -> Self {
        self.emit_debug_map = enabled;
        self
    }

    pub fn max_stack_frame_bytes(&self) -> u32 {
        self.max_stack_frame_bytes
            .unwrap_or(wasmc_core::limits::MAX_STACK_FRAME_BYTES)
    }
}

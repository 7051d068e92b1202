/// Host-tunable policy knobs for a [`crate::Runtime`] (§5 "Resource model").
///
/// Mirrors the builder shape of `wasmc_compiler::CompilerConfig` (itself
/// modeled on wasmi's `StoreLimitsBuilder`): construct with [`Self::new`] and
/// chain setters, or start from [`Default::default`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    /// When `true`, an unresolved static import compiles its call sites to
    /// `TrapCode::CalledFunctionNotLinked` instead of failing `init` (§7
    /// "Linking").
    allow_unknown_imports: bool,
    /// Upper bound on job-memory growth via `ExtendableMemory::realloc`;
    /// `None` means host-address-space-limited only.
    max_job_memory_bytes: Option<u32>,
    /// Software stack fence checked on every frame-widening probe (§5
    /// "Resources").
    stack_fence_bytes: u32,
}

impl RuntimeLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_unknown_imports(mut self, enabled: bool) -> Self {
        self.allow_unknown_imports = enabled;
        self
    }

    pub fn max_job_memory_bytes(mut self, max: Option<u32>) -> Self {
        self.max_job_memory_bytes = max;
        self
    }

    pub fn stack_fence_bytes(mut self, bytes: u32) -> Self {
        self.stack_fence_bytes = bytes;
        self
    }

    pub fn is_allow_unknown_imports(&self) -> bool {
        self.allow_unknown_imports
    }

    pub fn get_max_job_memory_bytes(&self) -> Option<u32> {
        self.max_job_memory_bytes
    }

    pub fn get_stack_fence_bytes(&self) -> u32 {
        self.stack_fence_bytes
    }
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            allow_unknown_imports: false,
            max_job_memory_bytes: None,
            stack_fence_bytes: 64 * 1024,
        }
    }
}

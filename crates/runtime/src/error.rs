use alloc::{boxed::Box, string::String};
use core::fmt::{self, Display};
use wasmc_core::TrapCode;

/// The load/link/call-time half of the flat error space described in spec
/// §7. Unlike [`wasmc_core::CompileError`], most of these are recoverable:
/// a failed `call_exported` leaves the [`crate::Runtime`] reusable for the
/// next call (the one exception being an `init`-time allocation failure).
#[derive(Debug)]
pub struct RuntimeError {
    kind: Box<RuntimeErrorKind>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self { kind: Box::new(kind) }
    }

    pub fn kind(&self) -> &RuntimeErrorKind {
        &self.kind
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.kind, f)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RuntimeError {}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<TrapCode> for RuntimeError {
    fn from(trap: TrapCode) -> Self {
        Self::new(RuntimeErrorKind::Trap(trap))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    // --- Linking (§7 "Linking") ---
    DynamicImportNotResolved { module: String, name: String },
    BaseOfJobMemoryNot8ByteAligned,

    // --- Loading (artifact format) ---
    UnsupportedArtifactVersion { found: u32 },
    CorruptArtifact { reason: &'static str },

    // --- Runtime (§7 "Runtime") ---
    RuntimeIsDisabled,
    ModuleNotInitializedCallStartFirst,
    StartFunctionAlreadyCalled,
    JobMemoryCannotGrow,
    FunctionNotFound { name: String },
    GlobalNotFound { name: String },
    GlobalIsImmutable { name: String },
    SignatureMismatch { expected: String, found: String },
    LinearMemoryAddressOutOfBounds,

    // --- Trap (§7 "Trap", Wasm-defined) ---
    Trap(TrapCode),

    Message(String),
}

impl Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DynamicImportNotResolved { module, name } => {
                write!(f, "dynamic import {module}.{name} was not resolved")
            }
            Self::BaseOfJobMemoryNot8ByteAligned => {
                write!(f, "base of job memory is not 8-byte aligned")
            }
            Self::UnsupportedArtifactVersion { found } => {
                write!(f, "unsupported artifact version {found}, expected {}", crate::binary_module::ARTIFACT_VERSION)
            }
            Self::CorruptArtifact { reason } => write!(f, "corrupt module artifact: {reason}"),
            Self::RuntimeIsDisabled => write!(f, "runtime is disabled"),
            Self::ModuleNotInitializedCallStartFirst => {
                write!(f, "module not initialized; call start() first")
            }
            Self::StartFunctionAlreadyCalled => write!(f, "start function has already been called"),
            Self::JobMemoryCannotGrow => write!(f, "job memory cannot grow"),
            Self::FunctionNotFound { name } => write!(f, "exported function {name} not found"),
            Self::GlobalNotFound { name } => write!(f, "exported global {name} not found"),
            Self::GlobalIsImmutable { name } => write!(f, "global {name} is immutable"),
            Self::SignatureMismatch { expected, found } => {
                write!(f, "signature mismatch: expected {expected}, found {found}")
            }
            Self::LinearMemoryAddressOutOfBounds => {
                write!(f, "linear memory address out of bounds")
            }
            Self::Trap(trap) => Display::fmt(trap, f),
            Self::Message(msg) => f.write_str(msg),
        }
    }
}

//! Implementation limits enforced by `ModuleInfo` during parsing (spec §4.3).
//!
//! These are hard caps, not configuration: exceeding one always aborts
//! compilation with the matching `CompileErrorKind` variant. They exist to
//! bound memory use of the compiler itself and to keep section-size fields
//! (which are plain `u32`s in the artifact, §6) from overflowing.

/// Maximum number of distinct function signatures (2^20).
pub const MAX_TYPES: u32 = 1 << 20;
/// Maximum number of functions, imported + defined (2^20).
pub const MAX_FUNCTIONS: u32 = 1 << 20;
/// Maximum number of imports of any kind (2^16).
pub const MAX_IMPORTS: u32 = 1 << 16;
/// Maximum number of globals, imported + defined (2^16).
pub const MAX_GLOBALS: u32 = 1 << 16;
/// Maximum number of table entries (2^20).
pub const MAX_TABLE_ENTRIES: u32 = 1 << 20;
/// Maximum number of `br_table` targets (2^20).
pub const MAX_BR_TABLE_LEN: u32 = 1 << 20;
/// Maximum number of parameters in a single signature.
pub const MAX_PARAMS: u32 = 128;
/// Maximum number of results in a single signature.
pub const MAX_RESULTS: u32 = 128;
/// Maximum number of direct (non-parameter) locals in a function (2^16).
pub const MAX_DIRECT_LOCALS: u32 = 1 << 16;
/// Maximum size, in bytes, of a single function's stack frame (8 MiB).
pub const MAX_STACK_FRAME_BYTES: u32 = 8 * 1024 * 1024;
/// Maximum length of any length-prefixed string (2^31 - 1).
pub const MAX_STRING_LEN: u32 = u32::MAX >> 1;

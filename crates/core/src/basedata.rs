//! Basedata layout: the fixed block of runtime state the native-ABI wrapper
//! and trap path read and write, addressed as negative offsets from the
//! linear-memory base (§6 "Basedata layout").
//!
//! Lives in `wasmc-core` rather than `wasmc-runtime` because both sides of
//! the AOT boundary need the same offsets: `wasmc-compiler`'s backends emit
//! `[linMemBase - offset]` accesses for the trap protocol, and
//! `wasmc-runtime` is the side that allocates and initializes the block.
//! Field order and widths are this implementation's own choice — the
//! contract is only that the offsets below are internally consistent and
//! that changing them bumps `ARTIFACT_VERSION`, mirroring
//! `original_source/src/core/common/basedataoffsets.hpp`'s
//! single-enum-of-truth approach.

/// Cumulative, from-the-end byte offsets for every fixed basedata field.
/// `linMemWasmSize`/`statusFlags` are genuinely `u32`; everything else is
/// pointer- or length-width and stored as `u64` regardless of host pointer
/// width, to keep the layout host-architecture-independent.
pub struct Basedata;

impl Basedata {
    pub const BINARY_MODULE_START_ADDRESS: u32 = 8;
    pub const TABLE_ADDRESS: u32 = Self::BINARY_MODULE_START_ADDRESS + 8;
    pub const LINK_STATUS_ADDRESS: u32 = Self::TABLE_ADDRESS + 8;
    pub const LIN_MEM_WASM_SIZE: u32 = Self::LINK_STATUS_ADDRESS + 4;
    pub const ACTUAL_LIN_MEM_BYTE_SIZE: u32 = Self::LIN_MEM_WASM_SIZE + 4;
    pub const CUSTOM_CTX: u32 = Self::ACTUAL_LIN_MEM_BYTE_SIZE + 8;
    pub const MEMORY_HELPER_PTR: u32 = Self::CUSTOM_CTX + 8;
    pub const RUNTIME_PTR: u32 = Self::MEMORY_HELPER_PTR + 8;
    pub const JOB_MEMORY_DATA_PTR_PTR: u32 = Self::RUNTIME_PTR + 8;
    /// Code address of the native entry-point wrapper's reentry label (the
    /// instruction right after its call into the Wasm body), saved at
    /// function-entry time so `execute_trap` can jump straight back to it.
    pub const TRAP_HANDLER_PTR: u32 = Self::JOB_MEMORY_DATA_PTR_PTR + 8;
    /// Native stack pointer saved at function-entry time, restored by
    /// `execute_trap` before jumping to `TRAP_HANDLER_PTR` so a trap deep in
    /// nested calls unwinds in one step instead of returning frame by frame.
    pub const TRAP_STACK_REENTRY: u32 = Self::TRAP_HANDLER_PTR + 8;
    pub const STATUS_FLAGS: u32 = Self::TRAP_STACK_REENTRY + 8;
    pub const STACK_FENCE: u32 = Self::STATUS_FLAGS + 4;
    pub const NATIVE_STACK_FENCE: u32 = Self::STACK_FENCE + 8;
    pub const LINKED_MEM_PTR: u32 = Self::NATIVE_STACK_FENCE + 8;
    pub const LINKED_MEM_LEN: u32 = Self::LINKED_MEM_PTR + 8;
    pub const TRACE_BUFFER_PTR: u32 = Self::LINKED_MEM_LEN + 4;
    pub const ARR_DYN_SIMPLE_FNC_CALLS_PTR: u32 = Self::TRACE_BUFFER_PTR + 8;
    pub const LAST_FRAME_REF_PTR: u32 = Self::ARR_DYN_SIMPLE_FNC_CALLS_PTR + 8;
    pub const LANDING_PAD_TARGET: u32 = Self::LAST_FRAME_REF_PTR + 8;
    pub const LANDING_PAD_RET: u32 = Self::LANDING_PAD_TARGET + 8;

    /// Bytes reserved for the fixed fields above, not counting link data or
    /// the per-module stacktrace ring buffer that follows them.
    pub const FIXED_LENGTH: u32 = Self::LANDING_PAD_RET + 8;

    /// Bytes per recorded stacktrace frame (return address + frame pointer).
    pub const STACKTRACE_ENTRY_BYTES: u32 = 16;

    /// Total job-memory length needed for basedata, given the module's
    /// link-data size and embedded stacktrace capacity (§4.8 step 2).
    pub fn length(link_data_length: u32, stacktrace_entry_count: u32) -> u32 {
        link_data_length + Self::FIXED_LENGTH + stacktrace_entry_count * Self::STACKTRACE_ENTRY_BYTES
    }

    pub fn stacktrace_array_base(count: u32) -> u32 {
        Self::FIXED_LENGTH + count * Self::STACKTRACE_ENTRY_BYTES
    }
}

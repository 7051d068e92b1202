//! The `Runtime`: owns job memory, links a [`BinaryModule`], initializes
//! globals/data/memory, and exposes typed function lookup and the trap
//! protocol (§4.8).
//!
//! Grounded on `original_source/src/core/runtime/Runtime.cpp`'s `init`/
//! `start` sequencing (basedata write-up, dynamic-import resolution loop,
//! sentinel-guarded start-function call) and `ExtendableMemory.cpp`'s
//! grow-on-demand ownership model.

use crate::basedata::{Basedata, BasedataView};
use crate::binary_module::{BinaryModule, NO_SIG};
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::limits::RuntimeLimits;
use crate::memory::{ExecutableCode, ExtendableMemory, MemoryGrower, VecGrower};
use crate::stacktrace::{Frame, StackTrace};
use crate::value::{pack_args, unpack_results, WasmValue};
use alloc::{boxed::Box, format, string::String, vec::Vec};
use core::ffi::c_void;
use wasmc_core::{TrapCode, ValType};

type Res<T> = Result<T, RuntimeError>;

/// A sentinel `trapCodeSlot` value meaning "no trap occurred"; every real
/// [`TrapCode`] fits in `0..=11`, so any larger value is unambiguous.
const NO_TRAP: u32 = u32::MAX;

/// `fn(userArgs, linMemBase, trapCodeSlot, returnValues)` (§6 "Exported-function
/// calling convention").
type ExportedFn = unsafe extern "C" fn(*const u8, *mut u8, *mut u32, *mut u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportLinkage {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportVersion {
    V1,
    V2,
}

/// A host-supplied resolution candidate for a dynamic import (§6 "Dynamic
/// symbol record"). `ptr` is the address of an `extern "C"` function whose
/// signature matches `params`/`results` under the Wasm ABI.
pub struct HostSymbol<'h> {
    pub module: &'h str,
    pub name: &'h str,
    pub params: &'h [ValType],
    pub results: &'h [ValType],
    pub ptr: usize,
    pub linkage: ImportLinkage,
    pub version: ImportVersion,
}

struct ExportedFunctionInfo {
    name: String,
    params: Vec<ValType>,
    results: Vec<ValType>,
    entry_point_offset: u32,
}

struct StartInfo {
    wrapper_offset: u32,
}

#[derive(Clone, Copy)]
struct TableSlot {
    code_ptr: u64,
    sig_idx: u32,
}

#[derive(PartialEq, Eq)]
enum StartState {
    NotCalled,
    Called,
}

/// A raw, embedder-facing handle to an exported function, for callers that
/// want to invoke the native-ABI entry point directly (e.g. the KVM-guest
/// auxiliary path) rather than through [`Runtime::call_exported`]'s typed
/// marshaling.
pub struct RawFunction {
    pub ptr: *const u8,
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

/// A raw handle into the module's function table. The artifact format does
/// not carry a `sigIdx -> (params, results)` map (only the opaque index
/// used for the in-compiler `call_indirect` signature-opacity check), so
/// unlike [`RawFunction`] this cannot validate a caller-supplied signature
/// against real types; `sig_idx` is returned for the caller to compare
/// against a value it already tracked when it populated the table.
pub struct RawTableFunction {
    pub ptr: *const u8,
    pub sig_idx: u32,
}

/// Owns one loaded, linked module instance.
///
/// # Pinning
/// `init` returns `Box<Runtime>`. Basedata's `runtimePtrOffset` captures
/// `&self` as a raw pointer so generated code's memory-extension trampoline
/// can call back into [`Runtime::grow_linear_memory`]; moving the instance
/// out of its box after `init` invalidates that pointer. Always keep the
/// `Box` and call through `&mut` on it.
pub struct Runtime {
    code: ExecutableCode,
    table: Vec<TableSlot>,
    link_status: Vec<u8>,
    memory: ExtendableMemory,
    /// Distance from job-memory start to `linear_memory_base`; fixed once
    /// `init` computes it from the artifact's link-data length and
    /// stacktrace capacity.
    basedata_len: u32,
    exported_functions: Vec<ExportedFunctionInfo>,
    start: Option<StartInfo>,
    start_state: StartState,
    stacktrace: StackTrace,
    ctx: *mut c_void,
    limits: RuntimeLimits,
    trap_code_slot: u32,
}

extern "C" fn memory_helper_trampoline(runtime_ptr: *mut c_void, requested_pages: u32) -> u8 {
    if runtime_ptr.is_null() {
        return 0;
    }
    // Safety: only ever called with the value this Runtime wrote into its
    // own basedata at `init` time, from code running on its behalf.
    let runtime = unsafe { &mut *(runtime_ptr as *mut Runtime) };
    u8::from(runtime.grow_linear_memory(requested_pages).is_ok())
}

impl Runtime {
    /// Loads, links and initializes a module (§4.8 steps 1-6). Does not run
    /// the start function; call [`Self::start`] afterward.
    pub fn init(binary: &BinaryModule, imports: &[HostSymbol], ctx: *mut c_void, limits: RuntimeLimits) -> Res<Box<Self>> {
        Self::init_with_grower(binary, imports, ctx, limits, VecGrower::new(limits.get_max_job_memory_bytes()))
    }

    pub fn init_with_grower(
        binary: &BinaryModule,
        imports: &[HostSymbol],
        ctx: *mut c_void,
        limits: RuntimeLimits,
        grower: impl MemoryGrower + 'static,
    ) -> Res<Box<Self>> {
        let basedata_len = Basedata::length(binary.link_data_length, binary.stacktrace_entry_count);
        let initial_pages = binary.memory_min_pages.unwrap_or(0);
        let linmem_bytes = u64::from(initial_pages) * 65536;
        let total = u64::from(basedata_len) + linmem_bytes;
        if total > u32::MAX as u64 {
            return Err(RuntimeErrorKind::JobMemoryCannotGrow.into());
        }
        let mut memory = ExtendableMemory::new(alloc::vec![0u8; total as usize], grower);

        let code = ExecutableCode::new(binary.code)?;

        let table = binary
            .table
            .iter()
            .map(|e| {
                if e.is_used() {
                    TableSlot {
                        // Safety: `e.offset` is a code offset the compiler
                        // itself emitted for this exact artifact.
                        code_ptr: unsafe { code.entry_point(e.offset) } as u64,
                        sig_idx: e.sig,
                    }
                } else {
                    TableSlot { code_ptr: 0, sig_idx: NO_SIG }
                }
            })
            .collect::<Vec<_>>();

        let mut link_status = alloc::vec![0u8; binary.dynamic_imports.len()];
        for (i, import) in binary.dynamic_imports.iter().enumerate() {
            let resolved = imports.iter().find(|s| {
                s.module == import.module && s.name == import.name && s.params == import.params.as_slice() && s.results == import.results.as_slice()
            });
            let ptr_bits = match resolved {
                Some(s) => {
                    link_status[i] = 1;
                    s.ptr as u64
                }
                None if limits.is_allow_unknown_imports() => 0,
                None => {
                    return Err(RuntimeErrorKind::DynamicImportNotResolved {
                        module: String::from(import.module),
                        name: String::from(import.name),
                    }
                    .into());
                }
            };
            write_link_data_u64(&mut memory, import.link_data_offset, ptr_bits)?;
        }

        for g in &binary.mutable_globals {
            write_link_data_u64(&mut memory, g.link_data_offset, g.init_bits)?;
        }

        for seg in &binary.data_segments {
            let start = u64::from(basedata_len) + u64::from(seg.offset);
            let end = start + seg.bytes.len() as u64;
            if end > u32::MAX as u64 {
                return Err(RuntimeErrorKind::LinearMemoryAddressOutOfBounds.into());
            }
            memory.resize(end as u32)?;
            memory.as_mut_slice()[start as usize..end as usize].copy_from_slice(seg.bytes);
        }

        let exported_functions = binary
            .exported_functions
            .iter()
            .map(|f| ExportedFunctionInfo {
                name: String::from(f.name),
                params: f.params.clone(),
                results: f.results.clone(),
                entry_point_offset: f.entry_point_offset,
            })
            .collect();

        let start = binary.start_function.as_ref().map(|s| StartInfo { wrapper_offset: s.wrapper_offset });

        let mut runtime = Box::new(Self {
            code,
            table,
            link_status,
            memory,
            basedata_len,
            exported_functions,
            start,
            start_state: StartState::NotCalled,
            stacktrace: StackTrace::with_capacity(binary.stacktrace_entry_count as usize),
            ctx,
            limits,
            trap_code_slot: NO_TRAP,
        });
        runtime.write_fixed_basedata();
        runtime.sync_growable_basedata();
        Ok(runtime)
    }

    fn basedata_view(&mut self) -> BasedataView {
        // Safety: `basedata_len` bytes always precede linear memory in the
        // job-memory buffer by construction.
        let base = unsafe { self.memory.base_ptr().add(self.basedata_len as usize) };
        unsafe { BasedataView::new(base) }
    }

    fn linear_memory_base(&mut self) -> *mut u8 {
        self.basedata_view().linear_memory_base()
    }

    /// Fields written once at `init` and never again: pointers to
    /// allocations that don't move (the table, the code region, `ctx`, the
    /// stacktrace ring and this `Runtime` itself).
    fn write_fixed_basedata(&mut self) {
        let code_base = self.code.base_ptr() as u64;
        let table_ptr = self.table.as_ptr() as u64;
        let link_status_ptr = self.link_status.as_ptr() as u64;
        let ctx = self.ctx as u64;
        let helper = memory_helper_trampoline as usize as u64;
        let self_ptr = self as *mut Self as u64;
        let stack_fence = u64::from(self.limits.get_stack_fence_bytes());
        let bd = self.basedata_view();
        unsafe {
            bd.write_u64(Basedata::BINARY_MODULE_START_ADDRESS, code_base);
            bd.write_u64(Basedata::TABLE_ADDRESS, table_ptr);
            bd.write_u64(Basedata::LINK_STATUS_ADDRESS, link_status_ptr);
            bd.write_u64(Basedata::CUSTOM_CTX, ctx);
            bd.write_u64(Basedata::MEMORY_HELPER_PTR, helper);
            bd.write_u64(Basedata::RUNTIME_PTR, self_ptr);
            bd.write_u64(Basedata::JOB_MEMORY_DATA_PTR_PTR, self_ptr);
            bd.write_u64(Basedata::STACK_FENCE, stack_fence);
            bd.write_u64(Basedata::TRACE_BUFFER_PTR, 0);
            bd.write_u64(Basedata::ARR_DYN_SIMPLE_FNC_CALLS_PTR, 0);
            bd.write_u64(Basedata::LAST_FRAME_REF_PTR, 0);
            bd.write_u64(Basedata::LANDING_PAD_TARGET, 0);
            bd.write_u64(Basedata::LANDING_PAD_RET, 0);
            bd.write_u64(Basedata::TRAP_HANDLER_PTR, 0);
            bd.write_u64(Basedata::TRAP_STACK_REENTRY, 0);
            bd.write_u32(Basedata::STATUS_FLAGS, 0);
        }
    }

    /// Fields that change whenever linear memory grows.
    fn sync_growable_basedata(&mut self) {
        let total_bytes = self.memory.len();
        let linmem_bytes = total_bytes - self.basedata_len;
        let pages = linmem_bytes / 65536;
        let linked_mem_ptr = self.memory.base_ptr() as u64;
        let bd = self.basedata_view();
        unsafe {
            bd.write_u32(Basedata::LIN_MEM_WASM_SIZE, pages);
            bd.write_u64(Basedata::ACTUAL_LIN_MEM_BYTE_SIZE, u64::from(linmem_bytes));
            bd.write_u64(Basedata::LINKED_MEM_PTR, linked_mem_ptr);
            bd.write_u32(Basedata::LINKED_MEM_LEN, linmem_bytes);
        }
    }

    /// Invoked by [`memory_helper_trampoline`] on behalf of generated
    /// `memory.grow` code. Currently unreachable in practice: this
    /// compiler only emits the Explicit bounds-check flavor, which traps
    /// instead of calling out to extend memory (§5 Open Questions).
    fn grow_linear_memory(&mut self, requested_pages: u32) -> Res<()> {
        let requested_bytes = u64::from(requested_pages) * 65536;
        let needed = u64::from(self.basedata_len) + requested_bytes;
        if needed > u32::MAX as u64 {
            return Err(RuntimeErrorKind::JobMemoryCannotGrow.into());
        }
        self.memory.resize(needed as u32)?;
        self.sync_growable_basedata();
        Ok(())
    }

    /// Runs the start function exactly once (§4.8 step 7). A module with no
    /// start function still transitions to "called" on the first call, so
    /// the idempotence check below applies uniformly.
    pub fn start(&mut self) -> Res<()> {
        if self.start_state == StartState::Called {
            return Err(RuntimeErrorKind::StartFunctionAlreadyCalled.into());
        }
        self.start_state = StartState::Called;
        if let Some(info) = &self.start {
            let offset = info.wrapper_offset;
            self.invoke_raw(offset, &[], &[], &[])?;
        }
        Ok(())
    }

    pub fn call_exported(&mut self, name: &str, args: &[WasmValue]) -> Res<Vec<WasmValue>> {
        if self.start_state != StartState::Called {
            return Err(RuntimeErrorKind::ModuleNotInitializedCallStartFirst.into());
        }
        let idx = self
            .exported_functions
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| RuntimeErrorKind::FunctionNotFound { name: String::from(name) })?;
        let (offset, params, results) = {
            let f = &self.exported_functions[idx];
            (f.entry_point_offset, f.params.clone(), f.results.clone())
        };
        self.invoke_raw(offset, &params, &results, args)
    }

    fn invoke_raw(&mut self, entry_point_offset: u32, params: &[ValType], results: &[ValType], args: &[WasmValue]) -> Res<Vec<WasmValue>> {
        let packed_args = pack_args(params, args)?;
        let mut user_args = Vec::with_capacity(packed_args.len() * 8);
        for slot in &packed_args {
            user_args.extend_from_slice(slot);
        }
        let mut return_values = alloc::vec![0u8; results.len() * 8];
        self.trap_code_slot = NO_TRAP;
        let lin_mem_base = self.linear_memory_base();
        // Safety: `entry_point_offset` was emitted by this exact artifact's
        // compiler for a function with this exact (params, results)
        // signature; `user_args`/`return_values` are sized to match.
        let entry: ExportedFn = unsafe { core::mem::transmute(self.code.entry_point(entry_point_offset)) };
        unsafe {
            entry(user_args.as_ptr(), lin_mem_base, &mut self.trap_code_slot as *mut u32, return_values.as_mut_ptr());
        }
        if self.trap_code_slot != NO_TRAP {
            let trap = TrapCode::from_code(self.trap_code_slot).unwrap_or(TrapCode::Unreachable);
            return Err(trap.into());
        }
        let slots: Vec<[u8; 8]> = return_values.chunks_exact(8).map(|c| c.try_into().unwrap()).collect();
        Ok(unpack_results(results, &slots))
    }

    pub fn get_raw_exported_function_by_name(&self, name: &str, expected: Option<(&[ValType], &[ValType])>) -> Res<RawFunction> {
        let f = self
            .exported_functions
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| RuntimeErrorKind::FunctionNotFound { name: String::from(name) })?;
        if let Some((params, results)) = expected {
            if params != f.params.as_slice() || results != f.results.as_slice() {
                return Err(RuntimeErrorKind::SignatureMismatch {
                    expected: format!("{params:?}->{results:?}"),
                    found: format!("{:?}->{:?}", f.params, f.results),
                }
                .into());
            }
        }
        Ok(RawFunction {
            // Safety: `f.entry_point_offset` was emitted for this artifact.
            ptr: unsafe { self.code.entry_point(f.entry_point_offset) },
            params: f.params.clone(),
            results: f.results.clone(),
        })
    }

    pub fn get_raw_function_by_exported_table_index(&self, index: u32) -> Res<RawTableFunction> {
        let slot = self
            .table
            .get(index as usize)
            .ok_or(RuntimeErrorKind::LinearMemoryAddressOutOfBounds)?;
        if slot.code_ptr == 0 {
            return Err(TrapCode::IndirectCallNullEntry.into());
        }
        Ok(RawTableFunction {
            ptr: slot.code_ptr as *const u8,
            sig_idx: slot.sig_idx,
        })
    }

    pub fn get_linear_memory_size_in_pages(&self) -> u32 {
        (self.memory.len() - self.basedata_len) / 65536
    }

    pub fn get_linear_memory_region(&self, offset: u32, size: u32) -> Res<&[u8]> {
        let start = self.basedata_len as u64 + offset as u64;
        let end = start + size as u64;
        if end > self.memory.len() as u64 {
            return Err(RuntimeErrorKind::LinearMemoryAddressOutOfBounds.into());
        }
        Ok(&self.memory.as_slice()[start as usize..end as usize])
    }

    /// Writes a non-zero `statusFlags` byte the next compiler-inserted
    /// cancellation probe will observe and trap on (§5 "Cancellation").
    pub fn request_interruption(&mut self, trap_code: TrapCode) {
        let code = trap_code.code();
        let bd = self.basedata_view();
        unsafe {
            bd.write_u32(Basedata::STATUS_FLAGS, code);
        }
    }

    pub fn record_frame(&mut self, frame: Frame) {
        self.stacktrace.push(frame);
    }

    pub fn print_stacktrace(&self) {
        for frame in self.stacktrace.iter_in_order() {
            log::error!("  at func[{}]+0x{:x}", frame.func_index, frame.return_offset);
        }
    }
}

fn write_link_data_u64(memory: &mut ExtendableMemory, offset: u32, value: u64) -> Res<()> {
    let end = offset as u64 + 8;
    if end > memory.len() as u64 {
        return Err(RuntimeErrorKind::LinearMemoryAddressOutOfBounds.into());
    }
    memory.as_mut_slice()[offset as usize..offset as usize + 8].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

//! Section parsing and per-function opcode translation (§4.7).
//!
//! `Frontend` is the only thing in this crate that reads Wasm bytecode: it
//! drives a [`BytecodeReader`] through the module's sections, and for each
//! function body walks [`ValidationStack`] (the type system) and
//! [`CompilerStack`] (the expression stack) together, opcode by opcode,
//! calling into [`Common`] and a [`Backend`] to lower each one directly —
//! there is no intermediate representation to build or tear down.

use crate::{
    backend::{Backend, TargetHint},
    bytecode_reader::BytecodeReader,
    common::{
        locals::{GlobalSlot, GlobalStorage},
        Common, FunctionCompileState,
    },
    compiler_stack::{CompilerStack, PatchSite, PhysReg, Storage, StackElement},
    config::CompilerConfig,
    mem_writer::MemWriter,
    module_info::{
        DataSegment, ElementSegment, Export, ExportKind, GlobalDef, GlobalInit, GlobalType, Import,
        ImportKind, ModuleInfo, SigIdx, TableInfo, MemoryInfo,
    },
    opcode::{Cond, LoadExtend, MemArg, MemWidth, NumericOp},
    validation_stack::{FrameKind, ValidationStack},
};
use alloc::{format, vec, vec::Vec};
use wasmc_core::{limits, val_type::FuncType, CompileError, CompileErrorKind, TrapCode, UntypedValue, ValType};

type Res<T> = Result<T, CompileError>;

/// `ValType::from_byte` only knows the five types this implementation
/// represents; a `v128` byte is a distinct, named Non-goal (§1 SIMD) rather
/// than a generic malformed-encoding error, so it gets its own kind here
/// instead of collapsing into `InvalidValType`.
fn parse_val_type(byte: u8) -> Result<ValType, CompileErrorKind> {
    match ValType::from_byte(byte) {
        Some(ty) => Ok(ty),
        None if byte == 0x7B => Err(CompileErrorKind::SimdNotSupported),
        None => Err(CompileErrorKind::InvalidValType(byte)),
    }
}

mod section_id {
    pub const CUSTOM: u8 = 0;
    pub const TYPE: u8 = 1;
    pub const IMPORT: u8 = 2;
    pub const FUNCTION: u8 = 3;
    pub const TABLE: u8 = 4;
    pub const MEMORY: u8 = 5;
    pub const GLOBAL: u8 = 6;
    pub const EXPORT: u8 = 7;
    pub const START: u8 = 8;
    pub const ELEMENT: u8 = 9;
    pub const CODE: u8 = 10;
    pub const DATA: u8 = 11;
    pub const DATA_COUNT: u8 = 12;
}

/// Canonical section order (§4.7: "duplicate or out-of-order sections are
/// rejected"); `DataCount` sorts between `Element` and `Code`.
fn section_rank(id: u8) -> Res<u8> {
    Ok(match id {
        section_id::TYPE => 0,
        section_id::IMPORT => 1,
        section_id::FUNCTION => 2,
        section_id::TABLE => 3,
        section_id::MEMORY => 4,
        section_id::GLOBAL => 5,
        section_id::EXPORT => 6,
        section_id::START => 7,
        section_id::ELEMENT => 8,
        section_id::DATA_COUNT => 9,
        section_id::CODE => 10,
        section_id::DATA => 11,
        _ => return Err(CompileErrorKind::InvalidSectionId(id).into()),
    })
}

fn section_name(id: u8) -> &'static str {
    match id {
        section_id::CUSTOM => "custom",
        section_id::TYPE => "type",
        section_id::IMPORT => "import",
        section_id::FUNCTION => "function",
        section_id::TABLE => "table",
        section_id::MEMORY => "memory",
        section_id::GLOBAL => "global",
        section_id::EXPORT => "export",
        section_id::START => "start",
        section_id::ELEMENT => "element",
        section_id::CODE => "code",
        section_id::DATA => "data",
        section_id::DATA_COUNT => "datacount",
        _ => "unknown",
    }
}

/// A successfully compiled function body (§6 "Exported functions" /
/// "Table"): the offsets a module-level artifact writer needs, independent
/// of which `Backend` produced them.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub sig_idx: SigIdx,
    /// Offset of the function's Wasm-ABI body (what `call`/`call_indirect`
    /// within this module jump to).
    pub body_offset: u32,
}

/// Everything a module-level artifact writer (`artifact::write`) needs to
/// lay out the binary described by §6.
pub struct CompiledModule {
    pub module: ModuleInfo,
    pub code: Vec<u8>,
    pub functions: Vec<CompiledFunction>,
    /// Per-import native-ABI adapter offset (§4.7 "an imported function
    /// placed in the table gets a Wasm-ABI adapter emitted once").
    pub import_adapter_offsets: Vec<u32>,
    /// Per-import link-data offset (function pointer cell, 8 bytes each).
    pub import_link_offsets: Vec<u32>,
    /// Per-global link-data offset, parallel to `module.globals`. Only
    /// meaningful for mutable globals (immutable globals with a constant
    /// initializer never touch link data); unused for immutable entries.
    pub global_link_offsets: Vec<u32>,
    /// Table slots: `(wasm_abi_callable_offset, canonical_sig_idx)`, `None`
    /// for an element never written.
    pub table: Vec<Option<(u32, SigIdx)>>,
    /// Per-export native-ABI entry-point wrapper offset, parallel to
    /// `module.exports`.
    pub export_entry_points: Vec<Option<u32>>,
    /// Native-ABI entry-point wrapper offset for the start function, if any.
    pub start_entry_point: Option<u32>,
    pub link_data_length: u32,
}

/// Drives a single compilation from raw Wasm bytes to a [`CompiledModule`].
pub struct Frontend {
    config: CompilerConfig,
}

impl Frontend {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn compile<B: Backend>(&self, wasm: &[u8], mut backend: B) -> Res<CompiledModule> {
        let mut module = ModuleInfo::new();
        let mut r = BytecodeReader::new(wasm);
        parse_header(&mut r)?;

        let mut last_section: Option<u8> = None;
        let mut code_bodies: Vec<Vec<u8>> = Vec::new();
        let mut ret_sig_for: Vec<SigIdx> = Vec::new();

        while r.has_next_byte() {
            let id = r.read_byte()?;
            if id == section_id::CUSTOM {
                let size = r.read_var_u32()? as usize;
                r.step(size)?;
                continue;
            }
            check_order(&mut last_section, id)?;
            let size = r.read_var_u32()? as usize;
            let start = r.get_offset();
            match id {
                section_id::TYPE => parse_type_section(&mut r, &mut module, &mut ret_sig_for)?,
                section_id::IMPORT => parse_import_section(&mut r, &mut module)?,
                section_id::FUNCTION => parse_function_section(&mut r, &mut module)?,
                section_id::TABLE => parse_table_section(&mut r, &mut module)?,
                section_id::MEMORY => parse_memory_section(&mut r, &mut module)?,
                section_id::GLOBAL => parse_global_section(&mut r, &mut module)?,
                section_id::EXPORT => parse_export_section(&mut r, &mut module)?,
                section_id::START => {
                    let idx = r.read_var_u32()?;
                    let ty = module.func_type(idx)?;
                    if !ty.params().is_empty() || !ty.results().is_empty() {
                        return Err(CompileErrorKind::StartFunctionWrongSignature.into());
                    }
                    module.start = Some(idx);
                }
                section_id::ELEMENT => parse_element_section(&mut r, &mut module)?,
                section_id::DATA_COUNT => {
                    module.data_count = Some(r.read_var_u32()?);
                }
                section_id::CODE => {
                    code_bodies = parse_code_section(&mut r, &mut module)?;
                }
                section_id::DATA => parse_data_section(&mut r, &mut module)?,
                _ => return Err(CompileErrorKind::InvalidSectionId(id).into()),
            }
            let consumed = r.get_offset() - start;
            if consumed != size {
                return Err(CompileErrorKind::InvalidSectionSize {
                    section: section_name(id),
                    expected: size,
                    actual: consumed,
                }
                .into());
            }
        }

        module.finish_types();
        if let Some(t) = module.table {
            module.check_table_size(t.min)?;
        }

        log::debug!(
            "parsed module: {} imports, {} functions, {} globals",
            module.imports.len(),
            module.functions.len(),
            module.globals.len()
        );

        self.lower(module, code_bodies, ret_sig_for, &mut backend)
    }

    fn lower<B: Backend>(
        &self,
        mut module: ModuleInfo,
        code_bodies: Vec<Vec<u8>>,
        ret_sig_for: Vec<SigIdx>,
        backend: &mut B,
    ) -> Res<CompiledModule> {
        let num_imported = module.num_imported_funcs();
        let total_funcs = module.total_funcs();

        let mut import_link_offsets = vec![0u32; module.imports.len()];
        let mut link_cursor = 0u32;
        for (i, _import) in module.imports.iter().enumerate() {
            import_link_offsets[i] = link_cursor;
            link_cursor += 8;
        }

        let mut globals = Vec::with_capacity(module.globals.len());
        let mut global_link_offsets = vec![0u32; module.globals.len()];
        for (i, g) in module.globals.iter().enumerate() {
            debug_assert!(!g.imported, "imports are rejected at parse time; no imported globals exist");
            match g.init {
                Some(GlobalInit::Const(value)) if !g.ty.mutable => {
                    globals.push(GlobalSlot {
                        ty: g.ty.val_type,
                        mutable: false,
                        storage: GlobalStorage::Const(value),
                    });
                }
                _ => {
                    let offset = link_cursor;
                    link_cursor += g.ty.val_type.size();
                    global_link_offsets[i] = offset;
                    globals.push(GlobalSlot {
                        ty: g.ty.val_type,
                        mutable: g.ty.mutable,
                        storage: GlobalStorage::LinkData(offset),
                    });
                }
            }
        }
        let link_data_length = link_cursor;

        let mut common = Common::new(self.config.clone(), globals);
        let mut code = MemWriter::new();

        // Every import is a function (imported tables/memories/globals are
        // rejected at parse time), so func-index-space 0..num_imported lines
        // up exactly with `module.imports`.
        let mut import_adapter_offsets = vec![0u32; module.imports.len()];
        let mut body_offsets: Vec<Option<u32>> = vec![None; total_funcs as usize];
        for (i, import) in module.imports.iter().enumerate() {
            let ImportKind::Func { sig_idx } = import.kind else {
                unreachable!("non-func imports are rejected during import-section parsing");
            };
            let ty = module.signature(sig_idx)?.clone();
            let offset =
                backend.emit_wasm_to_native_adapter(&mut code, import_link_offsets[i], ty.params(), ty.results())?;
            import_adapter_offsets[i] = offset;
            body_offsets[i] = Some(offset);
        }

        let mut forward_calls: Vec<Vec<PatchSite>> = (0..total_funcs).map(|_| Vec::new()).collect();
        let mut functions_out = Vec::with_capacity(code_bodies.len());
        for (local_idx, body_bytes) in code_bodies.iter().enumerate() {
            let func_index = num_imported + local_idx as u32;
            let sig_idx = module.functions[local_idx];
            let ret_sig = ret_sig_for[sig_idx as usize];
            let decl_locals = module.function_locals[local_idx].clone();
            let pending = core::mem::take(&mut forward_calls[func_index as usize]);
            let body_offset = translate_function(
                &module,
                &mut common,
                backend,
                &mut code,
                func_index,
                sig_idx,
                ret_sig,
                &decl_locals,
                body_bytes,
                pending,
                &body_offsets,
                &mut forward_calls,
            )?;
            body_offsets[func_index as usize] = Some(body_offset);
            functions_out.push(CompiledFunction { sig_idx, body_offset });
        }

        // Element-section table wrappers (§4.7 "Element section"): local
        // functions are called at their Wasm-ABI body offset directly;
        // imports go through the adapter emitted above.
        let table_len = module.table.map(|t| t.min).unwrap_or(0) as usize;
        let mut table: Vec<Option<(u32, SigIdx)>> = vec![None; table_len];
        for seg in &module.elements {
            for (i, &func_idx) in seg.func_indices.iter().enumerate() {
                let slot = seg.offset as i64 + i as i64;
                if slot < 0 || slot as usize >= table_len {
                    return Err(CompileErrorKind::TableIndexOutOfRange { index: slot.max(0) as u32 }.into());
                }
                let sig_idx = module.canonical_sig(module.func_sig_idx(func_idx)?);
                let wrapper = if module.is_imported_func(func_idx) {
                    import_adapter_offsets[func_idx as usize]
                } else {
                    body_offsets[func_idx as usize]
                        .expect("every defined function body is compiled before elements are laid out")
                };
                table[slot as usize] = Some((wrapper, sig_idx));
            }
        }

        // Native-ABI entry points, emitted lazily: once per function that's
        // actually reachable from the host (exports, start).
        let mut entry_points: Vec<Option<u32>> = vec![None; total_funcs as usize];
        let mut ensure_entry_point = |backend: &mut B, code: &mut MemWriter, func_idx: u32| -> Res<u32> {
            if let Some(off) = entry_points[func_idx as usize] {
                return Ok(off);
            }
            let ty = module.func_type(func_idx)?.clone();
            let body = body_offsets[func_idx as usize]
                .expect("export/start can only reference a function whose body already exists");
            let off = backend.emit_function_entry_point(code, func_idx, ty.params(), ty.results(), body)?;
            entry_points[func_idx as usize] = Some(off);
            Ok(off)
        };

        let mut export_entry_points = Vec::with_capacity(module.exports.len());
        for export in &module.exports {
            if export.kind == ExportKind::Func {
                export_entry_points.push(Some(ensure_entry_point(backend, &mut code, export.index)?));
            } else {
                export_entry_points.push(None);
            }
        }

        let start_entry_point = match module.start {
            Some(idx) => Some(ensure_entry_point(backend, &mut code, idx)?),
            None => None,
        };

        Ok(CompiledModule {
            module,
            code: code.into_vec(),
            functions: functions_out,
            import_adapter_offsets,
            import_link_offsets,
            global_link_offsets,
            table,
            export_entry_points,
            start_entry_point,
            link_data_length,
        })
    }
}

/// Convenience entry point matching `lib.rs`'s `pub use frontend::compile`.
pub fn compile<B: Backend>(wasm: &[u8], backend: B, config: CompilerConfig) -> Res<CompiledModule> {
    Frontend::new(config).compile(wasm, backend)
}

fn parse_header(r: &mut BytecodeReader) -> Res<()> {
    let magic = r.read_bytes(4)?;
    if magic != b"\0asm" {
        return Err(CompileErrorKind::Message("not a Wasm binary: bad magic".into()).into());
    }
    let version = r.read_le_u32()?;
    if version != 1 {
        return Err(CompileErrorKind::Message(format!("unsupported Wasm version {version}")).into());
    }
    Ok(())
}

fn check_order(last: &mut Option<u8>, id: u8) -> Res<()> {
    let rank = section_rank(id)?;
    if let Some(prev) = *last {
        if rank <= section_rank(prev)? {
            return Err(CompileErrorKind::DuplicateOrOutOfOrderSection { section: section_name(id) }.into());
        }
    }
    *last = Some(id);
    Ok(())
}

fn parse_type_section(r: &mut BytecodeReader, module: &mut ModuleInfo, ret_sig_for: &mut Vec<SigIdx>) -> Res<()> {
    let count = r.read_var_u32()?;
    let mut raw = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let form = r.read_byte()?;
        if form != 0x60 {
            return Err(CompileErrorKind::Message(format!("unsupported type form 0x{form:02x}")).into());
        }
        let nparams = r.read_var_u32()?;
        let mut params = Vec::with_capacity(nparams as usize);
        for _ in 0..nparams {
            let b = r.read_byte()?;
            params.push(parse_val_type(b)?);
        }
        let nresults = r.read_var_u32()?;
        let mut results = Vec::with_capacity(nresults as usize);
        for _ in 0..nresults {
            let b = r.read_byte()?;
            results.push(parse_val_type(b)?);
        }
        raw.push((params, results));
    }
    // Register every declared type first, then a matching zero-param
    // "return signature" per type, *before* `finish_types` appends its five
    // synthetic block-type signatures — `empty_block_sig`/`value_block_sig`
    // assume those are the last five entries, so nothing may be added
    // after them.
    for (params, results) in &raw {
        module.add_signature(FuncType::new(params.clone(), results.clone()))?;
    }
    for (_, results) in &raw {
        let ret_sig = module.add_signature(FuncType::new(Vec::new(), results.clone()))?;
        ret_sig_for.push(ret_sig);
    }
    Ok(())
}

fn parse_import_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<()> {
    let count = r.read_var_u32()?;
    for _ in 0..count {
        let mod_name = r.read_name()?;
        let name = r.read_name()?;
        let kind = r.read_byte()?;
        match kind {
            0x00 => {
                let sig_idx = r.read_var_u32()?;
                let _ = module.signature(sig_idx)?;
                module.imports.push(Import { module: mod_name, name, kind: ImportKind::Func { sig_idx } });
            }
            0x01 => return Err(CompileErrorKind::ImportedTableNotSupported.into()),
            0x02 => return Err(CompileErrorKind::ImportedMemoryNotSupported.into()),
            0x03 => return Err(CompileErrorKind::ImportedGlobalNotSupported.into()),
            other => return Err(CompileErrorKind::Message(format!("invalid import kind {other}")).into()),
        }
    }
    module.check_import_count()
}

fn parse_function_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<()> {
    let count = r.read_var_u32()?;
    for _ in 0..count {
        let sig_idx = r.read_var_u32()?;
        let _ = module.signature(sig_idx)?;
        module.functions.push(sig_idx);
    }
    module.check_func_count()
}

fn parse_table_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<()> {
    let count = r.read_var_u32()?;
    if count > 1 {
        return Err(CompileErrorKind::MultipleTablesNotSupported.into());
    }
    for _ in 0..count {
        let elem_ty = r.read_byte()?;
        if elem_ty != 0x70 {
            return Err(CompileErrorKind::ReferenceTypesNotSupported.into());
        }
        let (min, max) = read_limits(r)?;
        module.table = Some(TableInfo { min, max });
    }
    Ok(())
}

fn parse_memory_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<()> {
    let count = r.read_var_u32()?;
    if count > 1 {
        return Err(CompileErrorKind::MultipleMemoriesNotSupported.into());
    }
    for _ in 0..count {
        let (min, max) = read_limits(r)?;
        module.memory = Some(MemoryInfo { min_pages: min, max_pages: max });
    }
    Ok(())
}

fn read_limits(r: &mut BytecodeReader) -> Res<(u32, Option<u32>)> {
    let flag = r.read_byte()?;
    let min = r.read_var_u32()?;
    let max = if flag == 1 { Some(r.read_var_u32()?) } else { None };
    Ok((min, max))
}

fn parse_global_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<()> {
    let count = r.read_var_u32()?;
    for _ in 0..count {
        let b = r.read_byte()?;
        let val_type = parse_val_type(b)?;
        let mutable = match r.read_byte()? {
            0 => false,
            1 => true,
            other => return Err(CompileErrorKind::Message(format!("invalid mutability byte {other}")).into()),
        };
        let init = parse_global_init(r)?;
        module.globals.push(GlobalDef { ty: GlobalType { val_type, mutable }, init: Some(init), imported: false });
    }
    module.check_global_count()
}

fn parse_global_init(r: &mut BytecodeReader) -> Res<GlobalInit> {
    let op = r.read_byte()?;
    let init = match op {
        0x41 => GlobalInit::Const(UntypedValue::i32(r.read_var_i32()?)),
        0x42 => GlobalInit::Const(UntypedValue::i64(r.read_var_i64()?)),
        0x43 => GlobalInit::Const(UntypedValue::f32(r.read_le_f32()?)),
        0x44 => GlobalInit::Const(UntypedValue::f64(r.read_le_f64()?)),
        0x23 => GlobalInit::ImportedGlobal(r.read_var_u32()?),
        other => return Err(CompileErrorKind::Message(format!("unsupported global initializer opcode 0x{other:02x}")).into()),
    };
    let end = r.read_byte()?;
    if end != 0x0B {
        return Err(CompileErrorKind::Message("global initializer missing end".into()).into());
    }
    Ok(init)
}

/// The only offset expression active element/data segments may use (§4.7).
fn read_i32_const_expr(r: &mut BytecodeReader) -> Res<i32> {
    let op = r.read_byte()?;
    if op != 0x41 {
        return Err(CompileErrorKind::Message("active segment offset must be i32.const".into()).into());
    }
    let value = r.read_var_i32()?;
    let end = r.read_byte()?;
    if end != 0x0B {
        return Err(CompileErrorKind::Message("segment offset expression missing end".into()).into());
    }
    Ok(value)
}

fn parse_export_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<()> {
    let count = r.read_var_u32()?;
    for _ in 0..count {
        let name = r.read_name()?;
        let kind_byte = r.read_byte()?;
        let index = r.read_var_u32()?;
        let kind = match kind_byte {
            0 => ExportKind::Func,
            1 => ExportKind::Table,
            2 => ExportKind::Memory,
            3 => ExportKind::Global,
            other => return Err(CompileErrorKind::Message(format!("invalid export kind {other}")).into()),
        };
        module.exports.push(Export { name, kind, index });
    }
    Ok(())
}

fn parse_element_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<()> {
    let count = r.read_var_u32()?;
    for _ in 0..count {
        let flag = r.read_var_u32()?;
        if flag != 0 {
            return Err(CompileErrorKind::ElementSegmentNotTableZero.into());
        }
        module.check_table_index(0)?;
        let offset = read_i32_const_expr(r)?;
        let n = r.read_var_u32()?;
        let mut indices = Vec::with_capacity(n as usize);
        for _ in 0..n {
            indices.push(r.read_var_u32()?);
        }
        module.elements.push(ElementSegment { offset, func_indices: indices });
    }
    Ok(())
}

fn parse_data_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<()> {
    let count = r.read_var_u32()?;
    for _ in 0..count {
        let flag = r.read_var_u32()?;
        if flag != 0 {
            return Err(CompileErrorKind::PassiveDataNotSupported.into());
        }
        let offset = read_i32_const_expr(r)?;
        let len = r.read_var_u32()? as usize;
        let bytes = r.read_bytes(len)?.to_vec();
        module.data.push(DataSegment { offset, bytes });
    }
    Ok(())
}

fn parse_code_section(r: &mut BytecodeReader, module: &mut ModuleInfo) -> Res<Vec<Vec<u8>>> {
    let count = r.read_var_u32()? as usize;
    if count != module.functions.len() {
        return Err(CompileErrorKind::Message("code section entry count doesn't match function section".into()).into());
    }
    let mut bodies = Vec::with_capacity(count);
    for _ in 0..count {
        let body_size = r.read_var_u32()? as usize;
        let body_start = r.get_offset();
        let local_groups = r.read_var_u32()?;
        let mut locals = Vec::new();
        for _ in 0..local_groups {
            let n = r.read_var_u32()?;
            let b = r.read_byte()?;
            let ty = parse_val_type(b)?;
            if locals.len() as u32 + n > limits::MAX_DIRECT_LOCALS {
                return Err(CompileErrorKind::TooManyLocals.into());
            }
            for _ in 0..n {
                locals.push(ty);
            }
        }
        let consumed = r.get_offset() - body_start;
        if consumed > body_size {
            return Err(CompileErrorKind::InvalidSectionSize { section: "code", expected: body_size, actual: consumed }.into());
        }
        let expr_bytes = r.read_bytes(body_size - consumed)?.to_vec();
        module.function_locals.push(locals);
        bodies.push(expr_bytes);
    }
    Ok(bodies)
}

fn numeric_op_for_byte(b: u8) -> Option<NumericOp> {
    use NumericOp::*;
    Some(match b {
        0x45 => I32Eqz, 0x46 => I32Eq, 0x47 => I32Ne, 0x48 => I32LtS, 0x49 => I32LtU,
        0x4A => I32GtS, 0x4B => I32GtU, 0x4C => I32LeS, 0x4D => I32LeU, 0x4E => I32GeS, 0x4F => I32GeU,
        0x50 => I64Eqz, 0x51 => I64Eq, 0x52 => I64Ne, 0x53 => I64LtS, 0x54 => I64LtU,
        0x55 => I64GtS, 0x56 => I64GtU, 0x57 => I64LeS, 0x58 => I64LeU, 0x59 => I64GeS, 0x5A => I64GeU,
        0x5B => F32Eq, 0x5C => F32Ne, 0x5D => F32Lt, 0x5E => F32Gt, 0x5F => F32Le, 0x60 => F32Ge,
        0x61 => F64Eq, 0x62 => F64Ne, 0x63 => F64Lt, 0x64 => F64Gt, 0x65 => F64Le, 0x66 => F64Ge,
        0x67 => I32Clz, 0x68 => I32Ctz, 0x69 => I32Popcnt,
        0x6A => I32Add, 0x6B => I32Sub, 0x6C => I32Mul, 0x6D => I32DivS, 0x6E => I32DivU,
        0x6F => I32RemS, 0x70 => I32RemU, 0x71 => I32And, 0x72 => I32Or, 0x73 => I32Xor,
        0x74 => I32Shl, 0x75 => I32ShrS, 0x76 => I32ShrU, 0x77 => I32Rotl, 0x78 => I32Rotr,
        0x79 => I64Clz, 0x7A => I64Ctz, 0x7B => I64Popcnt,
        0x7C => I64Add, 0x7D => I64Sub, 0x7E => I64Mul, 0x7F => I64DivS, 0x80 => I64DivU,
        0x81 => I64RemS, 0x82 => I64RemU, 0x83 => I64And, 0x84 => I64Or, 0x85 => I64Xor,
        0x86 => I64Shl, 0x87 => I64ShrS, 0x88 => I64ShrU, 0x89 => I64Rotl, 0x8A => I64Rotr,
        0x8B => F32Abs, 0x8C => F32Neg, 0x8D => F32Ceil, 0x8E => F32Floor, 0x8F => F32Trunc,
        0x90 => F32Nearest, 0x91 => F32Sqrt, 0x92 => F32Add, 0x93 => F32Sub, 0x94 => F32Mul,
        0x95 => F32Div, 0x96 => F32Min, 0x97 => F32Max, 0x98 => F32Copysign,
        0x99 => F64Abs, 0x9A => F64Neg, 0x9B => F64Ceil, 0x9C => F64Floor, 0x9D => F64Trunc,
        0x9E => F64Nearest, 0x9F => F64Sqrt, 0xA0 => F64Add, 0xA1 => F64Sub, 0xA2 => F64Mul,
        0xA3 => F64Div, 0xA4 => F64Min, 0xA5 => F64Max, 0xA6 => F64Copysign,
        0xA7 => I32WrapI64,
        0xA8 => I32TruncF32S, 0xA9 => I32TruncF32U, 0xAA => I32TruncF64S, 0xAB => I32TruncF64U,
        0xAC => I64ExtendI32S, 0xAD => I64ExtendI32U,
        0xAE => I64TruncF32S, 0xAF => I64TruncF32U, 0xB0 => I64TruncF64S, 0xB1 => I64TruncF64U,
        0xB2 => F32ConvertI32S, 0xB3 => F32ConvertI32U, 0xB4 => F32ConvertI64S, 0xB5 => F32ConvertI64U,
        0xB6 => F32DemoteF64,
        0xB7 => F64ConvertI32S, 0xB8 => F64ConvertI32U, 0xB9 => F64ConvertI64S, 0xBA => F64ConvertI64U,
        0xBB => F64PromoteF32,
        0xBC => I32ReinterpretF32, 0xBD => I64ReinterpretF64, 0xBE => F32ReinterpretI32, 0xBF => F64ReinterpretI64,
        0xC0 => I32Extend8S, 0xC1 => I32Extend16S, 0xC2 => I64Extend8S, 0xC3 => I64Extend16S, 0xC4 => I64Extend32S,
        _ => return None,
    })
}

fn trunc_sat_op(sub: u32) -> Res<NumericOp> {
    use NumericOp::*;
    Ok(match sub {
        0 => I32TruncSatF32S,
        1 => I32TruncSatF32U,
        2 => I32TruncSatF64S,
        3 => I32TruncSatF64U,
        4 => I64TruncSatF32S,
        5 => I64TruncSatF32U,
        6 => I64TruncSatF64S,
        7 => I64TruncSatF64U,
        _ => return Err(CompileErrorKind::Message(format!("invalid 0xFC sub-opcode {sub}")).into()),
    })
}

fn read_blocktype(r: &mut BytecodeReader, module: &ModuleInfo) -> Res<SigIdx> {
    let v = r.read_sleb128(33, "blocktype")?;
    if v >= 0 {
        return Ok(v as u32);
    }
    Ok(match v {
        -64 => module.empty_block_sig(),
        -1 => module.value_block_sig(ValType::I32),
        -2 => module.value_block_sig(ValType::I64),
        -3 => module.value_block_sig(ValType::F32),
        -4 => module.value_block_sig(ValType::F64),
        _ => return Err(CompileErrorKind::Message("invalid block type".into()).into()),
    })
}

fn read_memarg(r: &mut BytecodeReader) -> Res<MemArg> {
    let align = r.read_var_u32()?;
    let offset = r.read_var_u32()?;
    Ok(MemArg { offset, align })
}

/// Codegen context for one open `block`/`loop`/`if` (§4.4's `BLOCK`/`LOOP`/
/// `IFBLOCK`, tracked here as a plain `Vec` parallel to `ValidationStack`'s
/// own frame stack rather than as `CompilerStack` marker elements).
struct BlockCtx {
    kind: FrameKind,
    label_types: Vec<ValType>,
    result_slots: Vec<Storage>,
    /// Native code offset of the loop's first instruction; only meaningful
    /// for `Loop`.
    start_offset: u32,
    pending_branches: Vec<PatchSite>,
    else_site: Option<PatchSite>,
    has_else: bool,
    /// Whether codegen was already suppressed when this frame was entered;
    /// restored as the codegen-dead flag when the frame closes.
    entered_dead: bool,
}

#[allow(clippy::too_many_arguments)]
fn translate_function<B: Backend>(
    module: &ModuleInfo,
    common: &mut Common,
    backend: &mut B,
    code: &mut MemWriter,
    func_index: u32,
    sig_idx: SigIdx,
    ret_sig: SigIdx,
    decl_locals: &[ValType],
    body: &[u8],
    pending_forward_calls: Vec<PatchSite>,
    body_offsets: &[Option<u32>],
    forward_calls: &mut [Vec<PatchSite>],
) -> Res<u32> {
    let func_ty = module.signature(sig_idx)?.clone();
    let mut locals = Vec::with_capacity(func_ty.params().len() + decl_locals.len());
    for (i, &ty) in func_ty.params().iter().enumerate() {
        locals.push(backend.allocate_local(ty, true, i as u32));
    }
    for (i, &ty) in decl_locals.iter().enumerate() {
        locals.push(backend.allocate_local(ty, false, (func_ty.params().len() + i) as u32));
    }
    let num_params = func_ty.params().len() as u32;
    let mut func = FunctionCompileState::new(func_index, sig_idx, locals, num_params, backend.num_scratch_regs());

    // A generous, fixed-size reservation for locals, spills and
    // block-result slots alike, rather than a two-pass frame-size
    // computation — see DESIGN.md for the tradeoff this accepts.
    const FIXED_FRAME_BYTES: u32 = 16 * 1024;
    common.note_frame_growth(&mut func, FIXED_FRAME_BYTES)?;

    let body_offset = code.len() as u32;
    backend.entered_function(code, func_index, FIXED_FRAME_BYTES, &pending_forward_calls)?;

    let mut vs = ValidationStack::new();
    vs.enter(FrameKind::Function, ret_sig, module)?;

    let mut stack = CompilerStack::new();
    let mut control_stack: Vec<BlockCtx> = Vec::new();
    let mut func_dead = false;
    let mut label_cursor: i32 = -12000;

    let mut r = BytecodeReader::new(body);
    loop {
        if !r.has_next_byte() {
            return Err(CompileErrorKind::Message("function body missing final end".into()).into());
        }
        let op = r.read_byte()?;
        match op {
            0x00 => {
                // unreachable
                if !func_dead {
                    backend.execute_trap(code, TrapCode::Unreachable)?;
                }
                vs.mark_current_block_unreachable();
                func_dead = true;
            }
            0x01 => {} // nop
            0x02 | 0x03 | 0x04 => {
                let block_sig = read_blocktype(&mut r, module)?;
                let kind = match op {
                    0x02 => FrameKind::Block,
                    0x03 => FrameKind::Loop,
                    _ => FrameKind::If,
                };
                let label_types = if kind == FrameKind::Loop {
                    module.signature(block_sig)?.params().to_vec()
                } else {
                    module.signature(block_sig)?.results().to_vec()
                };
                let result_slots = allocate_label_slots(common, &mut func, &mut label_cursor, &label_types)?;

                let mut else_site = None;
                if kind == FrameKind::If {
                    vs.pop_expect(ValType::I32)?;
                    if !func_dead {
                        let cond_reg = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                        let zero = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                        backend.load_const(code, ValType::I32, UntypedValue::i32(0), zero)?;
                        backend.emit_comparison(code, Cond::Eq, ValType::I32, cond_reg, zero)?;
                        else_site = Some(backend.emit_branch(code, None, Some(Cond::Eq), false)?);
                    }
                }
                vs.enter(kind, block_sig, module)?;

                let start_offset = if kind == FrameKind::Loop { code.len() as u32 } else { 0 };
                if kind == FrameKind::Loop && !func_dead {
                    store_current_top(common, &mut stack, backend, code, &mut func, &label_types, &result_slots)?;
                    for (ty, slot) in label_types.iter().zip(result_slots.iter()) {
                        stack.push(StackElement::TempResult { storage: *slot, ty: *ty });
                    }
                }

                control_stack.push(BlockCtx {
                    kind,
                    label_types,
                    result_slots,
                    start_offset,
                    pending_branches: Vec::new(),
                    else_site,
                    has_else: false,
                    entered_dead: func_dead,
                });
            }
            0x05 => {
                // else
                vs.else_(module)?;
                let ctx = control_stack.last_mut().ok_or_else(|| CompileErrorKind::Message("else outside if".into()))?;
                ctx.has_else = true;
                if !func_dead {
                    // Pops the then-arm's result values back down to the
                    // compiler stack height the if-block was entered at
                    // (its params, still sitting underneath, are untouched).
                    store_current_top(common, &mut stack, backend, code, &mut func, &ctx.label_types, &ctx.result_slots)?;
                    let site = backend.emit_branch(code, None, None, false)?;
                    ctx.pending_branches.push(site);
                    if let Some(site) = ctx.else_site {
                        backend.patch_branch(code, site, code.len() as u32)?;
                    }
                }
                func_dead = ctx.entered_dead;
            }
            0x0B => {
                // end
                let frame = vs.end(module)?;
                let ctx = control_stack.pop();
                match ctx {
                    None => {
                        // function end
                        if !func_dead {
                            let nres = func_ty.results().len();
                            let floor = stack.len().saturating_sub(nres);
                            common.condense_above(&mut stack, backend, code, &mut func, floor)?;
                            backend.emit_return_and_unwind_stack(code, func_ty.results())?;
                        }
                        return Ok(body_offset);
                    }
                    Some(ctx) => {
                        if frame.kind == FrameKind::If && !ctx.has_else {
                            if let Some(site) = ctx.else_site {
                                backend.patch_branch(code, site, code.len() as u32)?;
                            }
                        }
                        if !func_dead {
                            store_current_top(common, &mut stack, backend, code, &mut func, &ctx.label_types, &ctx.result_slots)?;
                        }
                        let here = code.len() as u32;
                        backend.finalize_block(code, &ctx.pending_branches, here)?;
                        for (ty, slot) in ctx.label_types.iter().zip(ctx.result_slots.iter()) {
                            stack.push(StackElement::TempResult { storage: *slot, ty: *ty });
                        }
                        func_dead = ctx.entered_dead;
                    }
                }
            }
            0x0C | 0x0D => {
                // br / br_if
                let depth = r.read_var_u32()?;
                let is_conditional = op == 0x0D;
                if is_conditional {
                    vs.pop_expect(ValType::I32)?;
                }
                vs.branch(depth, module)?;
                if !is_conditional {
                    vs.mark_current_block_unreachable();
                }
                if !func_dead {
                    let idx = control_stack.len().checked_sub(1 + depth as usize)
                        .ok_or(CompileErrorKind::LabelIndexOutOfRange { index: depth })?;
                    let n = control_stack[idx].label_types.len();

                    if is_conditional {
                        let c = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                        let zero = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                        backend.load_const(code, ValType::I32, UntypedValue::i32(0), zero)?;
                        backend.emit_comparison(code, Cond::Ne, ValType::I32, c, zero)?;
                    }

                    let mut regs = Vec::with_capacity(n);
                    for _ in 0..n {
                        regs.push(common.pop_to_reg(&mut stack, backend, code, &mut func)?);
                    }
                    regs.reverse();

                    let skip_site = if is_conditional {
                        Some(backend.emit_branch(code, None, Some(Cond::Eq), false)?)
                    } else {
                        None
                    };

                    {
                        let ctx = &control_stack[idx];
                        for (k, &reg) in regs.iter().enumerate() {
                            backend.store_to_storage(code, ctx.label_types[k], reg, ctx.result_slots[k])?;
                        }
                    }
                    let target = if control_stack[idx].kind == FrameKind::Loop {
                        Some(control_stack[idx].start_offset)
                    } else {
                        None
                    };
                    let site = backend.emit_branch(code, target, None, false)?;
                    if control_stack[idx].kind != FrameKind::Loop {
                        control_stack[idx].pending_branches.push(site);
                    }

                    if let Some(skip_site) = skip_site {
                        backend.patch_branch(code, skip_site, code.len() as u32)?;
                        // fallthrough (br_if not taken): the values are
                        // unchanged, so hand the same registers back.
                        for (k, &reg) in regs.iter().enumerate() {
                            let ty = control_stack[idx].label_types[k];
                            let id = stack.push(StackElement::ScratchRegister { reg, ty });
                            func.regs.mark_used(reg, id);
                        }
                    }
                }
            }
            0x0E => {
                // br_table
                let n_targets = r.read_var_u32()?;
                if n_targets > limits::MAX_BR_TABLE_LEN {
                    return Err(CompileErrorKind::BrTableTooLong.into());
                }
                let mut depths = Vec::with_capacity(n_targets as usize + 1);
                for _ in 0..n_targets {
                    depths.push(r.read_var_u32()?);
                }
                let default_depth = r.read_var_u32()?;
                depths.push(default_depth);

                vs.pop_expect(ValType::I32)?;
                for &d in &depths {
                    vs.branch(d, module)?;
                }
                vs.mark_current_block_unreachable();

                if !func_dead {
                    let default_idx = control_stack.len().checked_sub(1 + default_depth as usize)
                        .ok_or(CompileErrorKind::LabelIndexOutOfRange { index: default_depth })?;
                    let n = control_stack[default_idx].label_types.len();

                    let idx_reg = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    let mut regs = Vec::with_capacity(n);
                    for _ in 0..n {
                        regs.push(common.pop_to_reg(&mut stack, backend, code, &mut func)?);
                    }
                    regs.reverse();

                    for (arm, &depth) in depths.iter().enumerate() {
                        let is_default = arm == depths.len() - 1;
                        let idx = control_stack.len().checked_sub(1 + depth as usize)
                            .ok_or(CompileErrorKind::LabelIndexOutOfRange { index: depth })?;

                        let skip_site = if is_default {
                            None
                        } else {
                            let arm_const = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                            backend.load_const(code, ValType::I32, UntypedValue::i32(arm as i32), arm_const)?;
                            backend.emit_comparison(code, Cond::Ne, ValType::I32, idx_reg, arm_const)?;
                            Some(backend.emit_branch(code, None, Some(Cond::Ne), false)?)
                        };

                        {
                            let ctx = &control_stack[idx];
                            for (k, &reg) in regs.iter().enumerate() {
                                backend.store_to_storage(code, ctx.label_types[k], reg, ctx.result_slots[k])?;
                            }
                        }
                        let target = if control_stack[idx].kind == FrameKind::Loop {
                            Some(control_stack[idx].start_offset)
                        } else {
                            None
                        };
                        let site = backend.emit_branch(code, target, None, false)?;
                        if control_stack[idx].kind != FrameKind::Loop {
                            control_stack[idx].pending_branches.push(site);
                        }
                        if let Some(skip_site) = skip_site {
                            backend.patch_branch(code, skip_site, code.len() as u32)?;
                        }
                    }
                }
            }
            0x0F => {
                // return
                vs.branch(vs.depth() as u32 - 1, module)?;
                vs.mark_current_block_unreachable();
                if !func_dead {
                    let nres = func_ty.results().len();
                    let floor = stack.len().saturating_sub(nres);
                    common.condense_above(&mut stack, backend, code, &mut func, floor)?;
                    for _ in 0..nres {
                        stack.pop();
                    }
                    backend.emit_return_and_unwind_stack(code, func_ty.results())?;
                }
                func_dead = true;
            }
            0x10 => {
                // call
                let callee = r.read_var_u32()?;
                let callee_ty = module.func_type(callee)?.clone();
                for &p in callee_ty.params().iter().rev() {
                    vs.pop_expect(p)?;
                }
                for &rty in callee_ty.results() {
                    vs.push_number(rty);
                }
                if !func_dead {
                    let floor = stack.len().saturating_sub(callee_ty.params().len());
                    common.flush_side_effect_barrier(&mut stack, backend, code, &mut func, floor)?;
                    for _ in 0..callee_ty.params().len() {
                        stack.pop();
                    }
                    let target = body_offsets.get(callee as usize).copied().flatten();
                    let mut patches = Vec::new();
                    backend.exec_direct_fnc_call(code, target, &mut patches)?;
                    if target.is_none() {
                        forward_calls[callee as usize].extend(patches);
                    }
                    for &rty in callee_ty.results() {
                        let reg = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                        let id = stack.push(StackElement::ScratchRegister { reg, ty: rty });
                        func.regs.mark_used(reg, id);
                    }
                }
            }
            0x11 => {
                // call_indirect
                let type_idx = r.read_var_u32()?;
                let table_byte = r.read_byte()?;
                if table_byte != 0 {
                    return Err(CompileErrorKind::Message("call_indirect table index must be 0".into()).into());
                }
                module.check_table_index(0)?;
                let callee_ty = module.signature(type_idx)?.clone();
                vs.pop_expect(ValType::I32)?;
                for &p in callee_ty.params().iter().rev() {
                    vs.pop_expect(p)?;
                }
                for &rty in callee_ty.results() {
                    vs.push_number(rty);
                }
                if !func_dead {
                    let table_reg = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    let floor = stack.len().saturating_sub(callee_ty.params().len());
                    common.flush_side_effect_barrier(&mut stack, backend, code, &mut func, floor)?;
                    for _ in 0..callee_ty.params().len() {
                        stack.pop();
                    }
                    backend.exec_indirect_wasm_call(code, table_reg, module.canonical_sig(type_idx))?;
                    for &rty in callee_ty.results() {
                        let reg = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                        let id = stack.push(StackElement::ScratchRegister { reg, ty: rty });
                        func.regs.mark_used(reg, id);
                    }
                }
            }
            0x1A => {
                // drop
                let _ = vs.pop()?;
                if !func_dead {
                    discard_top(&mut stack, &mut func);
                }
            }
            0x1B => {
                // select
                vs.pop_expect(ValType::I32)?;
                let t2 = vs.pop()?.unwrap_or(ValType::I32);
                vs.pop_expect(t2)?;
                vs.push_number(t2);
                if !func_dead {
                    let cond_reg = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    let falsy = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    let truthy = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    let dest = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                    backend.emit_select(code, truthy, falsy, cond_reg, dest)?;
                    let id = stack.push(StackElement::ScratchRegister { reg: dest, ty: t2 });
                    func.regs.mark_used(dest, id);
                }
            }
            0x20 | 0x21 | 0x22 => {
                // local.get / local.set / local.tee
                let idx = r.read_var_u32()?;
                let ty = func
                    .locals
                    .get(idx as usize)
                    .map(|l| l.ty)
                    .ok_or(CompileErrorKind::LocalIndexOutOfRange { index: idx })?;
                match op {
                    0x20 => {
                        vs.push_number(ty);
                        if !func_dead {
                            stack.push(StackElement::Local { idx });
                        }
                    }
                    0x21 => {
                        vs.pop_expect(ty)?;
                        if !func_dead {
                            common.condense_with_hint(&mut stack, backend, code, &mut func, TargetHint::Local(idx))?;
                            stack.pop();
                        }
                    }
                    _ => {
                        vs.pop_expect(ty)?;
                        vs.push_number(ty);
                        if !func_dead {
                            common.condense_with_hint(&mut stack, backend, code, &mut func, TargetHint::Local(idx))?;
                        }
                    }
                }
            }
            0x23 | 0x24 => {
                // global.get / global.set
                let idx = r.read_var_u32()?;
                let slot = *common
                    .globals
                    .get(idx as usize)
                    .ok_or(CompileErrorKind::GlobalIndexOutOfRange { index: idx })?;
                if op == 0x23 {
                    vs.push_number(slot.ty);
                    if !func_dead {
                        stack.push(StackElement::Global { idx });
                    }
                } else {
                    if !slot.mutable {
                        return Err(CompileErrorKind::GlobalIsImmutable { index: idx }.into());
                    }
                    vs.pop_expect(slot.ty)?;
                    if !func_dead {
                        common.condense_with_hint(&mut stack, backend, code, &mut func, TargetHint::Global(idx))?;
                        stack.pop();
                    }
                }
            }
            0x28..=0x35 => {
                // *.load*
                let mem_arg = read_memarg(&mut r)?;
                let (result_ty, width, extend) = load_shape(op);
                vs.pop_expect(ValType::I32)?;
                vs.push_number(result_ty);
                if !func_dead {
                    let floor = stack.len().saturating_sub(1);
                    common.flush_side_effect_barrier(&mut stack, backend, code, &mut func, floor)?;
                    let addr_reg = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    emit_bounds_check(common, &mut stack, backend, code, &mut func, addr_reg, mem_arg, width_bytes(width))?;
                    let dest = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                    backend.execute_linear_memory_load(code, addr_reg, mem_arg, width, extend, result_ty, dest)?;
                    let id = stack.push(StackElement::ScratchRegister { reg: dest, ty: result_ty });
                    func.regs.mark_used(dest, id);
                }
            }
            0x36..=0x3E => {
                // *.store*
                let mem_arg = read_memarg(&mut r)?;
                let (value_ty, width) = store_shape(op);
                vs.pop_expect(value_ty)?;
                vs.pop_expect(ValType::I32)?;
                if !func_dead {
                    let floor = stack.len().saturating_sub(2);
                    common.flush_side_effect_barrier(&mut stack, backend, code, &mut func, floor)?;
                    let value_reg = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    let addr_reg = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    emit_bounds_check(common, &mut stack, backend, code, &mut func, addr_reg, mem_arg, width_bytes(width))?;
                    backend.execute_linear_memory_store(code, addr_reg, mem_arg, width, value_reg)?;
                }
            }
            0x3F => {
                let reserved = r.read_byte()?;
                if reserved != 0 {
                    return Err(CompileErrorKind::Message("memory.size reserved byte must be 0".into()).into());
                }
                vs.push_number(ValType::I32);
                if !func_dead {
                    let dest = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                    backend.execute_get_mem_size(code, dest)?;
                    let id = stack.push(StackElement::ScratchRegister { reg: dest, ty: ValType::I32 });
                    func.regs.mark_used(dest, id);
                }
            }
            0x40 => {
                let reserved = r.read_byte()?;
                if reserved != 0 {
                    return Err(CompileErrorKind::Message("memory.grow reserved byte must be 0".into()).into());
                }
                vs.pop_expect(ValType::I32)?;
                vs.push_number(ValType::I32);
                if !func_dead {
                    let delta = common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                    let dest = common.alloc_temp_reg(&mut stack, backend, code, &mut func)?;
                    backend.execute_mem_grow(code, delta, dest)?;
                    let id = stack.push(StackElement::ScratchRegister { reg: dest, ty: ValType::I32 });
                    func.regs.mark_used(dest, id);
                }
            }
            0x41 => {
                let v = r.read_var_i32()?;
                vs.push_number(ValType::I32);
                if !func_dead {
                    stack.push(StackElement::Constant { value: UntypedValue::i32(v), ty: ValType::I32 });
                }
            }
            0x42 => {
                let v = r.read_var_i64()?;
                vs.push_number(ValType::I64);
                if !func_dead {
                    stack.push(StackElement::Constant { value: UntypedValue::i64(v), ty: ValType::I64 });
                }
            }
            0x43 => {
                let v = r.read_le_f32()?;
                vs.push_number(ValType::F32);
                if !func_dead {
                    stack.push(StackElement::Constant { value: UntypedValue::f32(v), ty: ValType::F32 });
                }
            }
            0x44 => {
                let v = r.read_le_f64()?;
                vs.push_number(ValType::F64);
                if !func_dead {
                    stack.push(StackElement::Constant { value: UntypedValue::f64(v), ty: ValType::F64 });
                }
            }
            0xFC => {
                let sub = r.read_var_u32()?;
                match sub {
                    0..=7 => {
                        if !common_config_non_trapping(common) {
                            return Err(CompileErrorKind::Message(
                                "non-trapping float-to-int conversions are disabled".into(),
                            )
                            .into());
                        }
                        let nop = trunc_sat_op(sub)?;
                        vs.pop_expect(nop.operand_type())?;
                        vs.push_number(nop.result_type());
                        if !func_dead {
                            common.push_deferred(&mut stack, nop);
                        }
                    }
                    8 | 9 => return Err(CompileErrorKind::PassiveDataNotSupported.into()),
                    10 => {
                        if !common.config.bulk_memory {
                            return Err(CompileErrorKind::Message("bulk memory support disabled".into()).into());
                        }
                        let dst_mem = r.read_byte()?;
                        let src_mem = r.read_byte()?;
                        if dst_mem != 0 || src_mem != 0 {
                            return Err(CompileErrorKind::Message("memory.copy requires memory index 0".into()).into());
                        }
                        vs.pop_expect(ValType::I32)?;
                        vs.pop_expect(ValType::I32)?;
                        vs.pop_expect(ValType::I32)?;
                        if !func_dead {
                            for _ in 0..3 {
                                common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                            }
                            backend.execute_linear_memory_copy(code)?;
                        }
                    }
                    11 => {
                        if !common.config.bulk_memory {
                            return Err(CompileErrorKind::Message("bulk memory support disabled".into()).into());
                        }
                        let mem = r.read_byte()?;
                        if mem != 0 {
                            return Err(CompileErrorKind::Message("memory.fill requires memory index 0".into()).into());
                        }
                        vs.pop_expect(ValType::I32)?;
                        vs.pop_expect(ValType::I32)?;
                        vs.pop_expect(ValType::I32)?;
                        if !func_dead {
                            for _ in 0..3 {
                                common.pop_to_reg(&mut stack, backend, code, &mut func)?;
                            }
                            backend.execute_linear_memory_fill(code)?;
                        }
                    }
                    12..=14 => return Err(CompileErrorKind::ReferenceTypesNotSupported.into()),
                    _ => return Err(CompileErrorKind::Message(format!("unsupported 0xFC sub-opcode {sub}")).into()),
                }
            }
            _ => {
                if let Some(nop) = numeric_op_for_byte(op) {
                    vs.pop_expect(nop.operand_type())?;
                    if nop.arity() == 2 {
                        vs.pop_expect(nop.operand_type())?;
                    }
                    vs.push_number(nop.result_type());
                    if !func_dead {
                        common.push_deferred(&mut stack, nop);
                    }
                } else {
                    return Err(CompileErrorKind::Message(format!("unsupported opcode 0x{op:02x}")).into());
                }
            }
        }
    }
}

fn common_config_non_trapping(common: &Common) -> bool {
    common.config.non_trapping_float_to_int
}

fn allocate_label_slots(
    common: &Common,
    func: &mut FunctionCompileState,
    label_cursor: &mut i32,
    types: &[ValType],
) -> Res<Vec<Storage>> {
    let mut slots = Vec::with_capacity(types.len());
    for ty in types {
        *label_cursor -= ty.size() as i32;
        slots.push(Storage::StackSlot(*label_cursor));
    }
    common.note_frame_growth(func, (-*label_cursor) as u32)?;
    Ok(slots)
}

fn store_current_top<B: Backend>(
    common: &mut Common,
    stack: &mut CompilerStack,
    backend: &mut B,
    writer: &mut MemWriter,
    func: &mut FunctionCompileState,
    label_types: &[ValType],
    result_slots: &[Storage],
) -> Res<()> {
    let n = label_types.len();
    let mut regs = Vec::with_capacity(n);
    for _ in 0..n {
        regs.push(common.pop_to_reg(stack, backend, writer, func)?);
    }
    regs.reverse();
    for k in 0..n {
        backend.store_to_storage(writer, label_types[k], regs[k], result_slots[k])?;
    }
    Ok(())
}

fn discard_top(stack: &mut CompilerStack, func: &mut FunctionCompileState) {
    if let Some(elem) = stack.pop() {
        if let StackElement::ScratchRegister { reg, .. } = elem {
            func.regs.mark_free(reg);
        }
    }
}

fn emit_bounds_check<B: Backend>(
    common: &mut Common,
    stack: &mut CompilerStack,
    backend: &mut B,
    writer: &mut MemWriter,
    func: &mut FunctionCompileState,
    addr_reg: PhysReg,
    mem_arg: MemArg,
    width: u32,
) -> Res<()> {
    let limit32 = common.alloc_temp_reg(stack, backend, writer, func)?;
    backend.execute_get_mem_size(writer, limit32)?;
    let page_size = common.alloc_temp_reg(stack, backend, writer, func)?;
    backend.load_const(writer, ValType::I32, UntypedValue::i32(65536), page_size)?;
    backend.emit_deferred_action(writer, NumericOp::I32Mul, &[limit32, page_size], limit32)?;
    let limit = common.alloc_temp_reg(stack, backend, writer, func)?;
    backend.emit_deferred_action(writer, NumericOp::I64ExtendI32U, &[limit32], limit)?;

    // `addr + offset + width` must be checked without 32-bit wraparound:
    // `mem_arg.offset` is a full u32 with no implicit cap (§8 "Memory
    // bounds"), so a crafted (address, offset) pair can wrap a 32-bit add
    // back into range while the real effective address (computed
    // separately, in 64-bit, by the load/store emitters) lands outside it.
    let addr64 = common.alloc_temp_reg(stack, backend, writer, func)?;
    backend.emit_deferred_action(writer, NumericOp::I64ExtendI32U, &[addr_reg], addr64)?;
    let needed = common.alloc_temp_reg(stack, backend, writer, func)?;
    let extra = mem_arg.offset as i64 + width as i64;
    backend.load_const(writer, ValType::I64, UntypedValue::i64(extra), needed)?;
    backend.emit_deferred_action(writer, NumericOp::I64Add, &[addr64, needed], needed)?;

    backend.emit_comparison(writer, Cond::LeU, ValType::I64, needed, limit)?;
    let ok_site = backend.emit_branch(writer, None, Some(Cond::LeU), false)?;
    backend.execute_trap(writer, TrapCode::MemoryOutOfBounds)?;
    let here = writer.len() as u32;
    backend.patch_branch(writer, ok_site, here)?;
    Ok(())
}

fn width_bytes(w: MemWidth) -> u32 {
    match w {
        MemWidth::Byte => 1,
        MemWidth::Half => 2,
        MemWidth::Word => 4,
        MemWidth::Double => 8,
    }
}

fn load_shape(op: u8) -> (ValType, MemWidth, LoadExtend) {
    match op {
        0x28 => (ValType::I32, MemWidth::Word, LoadExtend::None),
        0x29 => (ValType::I64, MemWidth::Double, LoadExtend::None),
        0x2A => (ValType::F32, MemWidth::Word, LoadExtend::None),
        0x2B => (ValType::F64, MemWidth::Double, LoadExtend::None),
        0x2C => (ValType::I32, MemWidth::Byte, LoadExtend::SignExtend),
        0x2D => (ValType::I32, MemWidth::Byte, LoadExtend::ZeroExtend),
        0x2E => (ValType::I32, MemWidth::Half, LoadExtend::SignExtend),
        0x2F => (ValType::I32, MemWidth::Half, LoadExtend::ZeroExtend),
        0x30 => (ValType::I64, MemWidth::Byte, LoadExtend::SignExtend),
        0x31 => (ValType::I64, MemWidth::Byte, LoadExtend::ZeroExtend),
        0x32 => (ValType::I64, MemWidth::Half, LoadExtend::SignExtend),
        0x33 => (ValType::I64, MemWidth::Half, LoadExtend::ZeroExtend),
        0x34 => (ValType::I64, MemWidth::Word, LoadExtend::SignExtend),
        0x35 => (ValType::I64, MemWidth::Word, LoadExtend::ZeroExtend),
        _ => unreachable!("load_shape called with a non-load opcode"),
    }
}

fn store_shape(op: u8) -> (ValType, MemWidth) {
    match op {
        0x36 => (ValType::I32, MemWidth::Word),
        0x37 => (ValType::I64, MemWidth::Double),
        0x38 => (ValType::F32, MemWidth::Word),
        0x39 => (ValType::F64, MemWidth::Double),
        0x3A => (ValType::I32, MemWidth::Byte),
        0x3B => (ValType::I32, MemWidth::Half),
        0x3C => (ValType::I64, MemWidth::Byte),
        0x3D => (ValType::I64, MemWidth::Half),
        0x3E => (ValType::I64, MemWidth::Word),
        _ => unreachable!("store_shape called with a non-store opcode"),
    }
}


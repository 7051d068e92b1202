//! Parsed-module facts: types, imports, globals, locals, tables, data
//! segments, and per-function metadata (§4.3).

use alloc::{string::String, vec::Vec};
use wasmc_core::{limits, val_type::FuncType, CompileError, CompileErrorKind, ValType};

/// Index of a function signature inside [`ModuleInfo::signatures`].
///
/// Five synthetic signatures (`()->()`, `()->i32`, `()->i64`, `()->f32`,
/// `()->f64`) are appended after parsing to back the Wasm block-type
/// shorthand (§4.3); see [`ModuleInfo::finish_types`].
pub type SigIdx = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub val_type: ValType,
    pub mutable: bool,
}

#[derive(Debug, Clone)]
pub enum ImportKind {
    Func { sig_idx: SigIdx },
    Global(GlobalType),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

/// A global's compile-time-known initializer.
///
/// Wasm 1.0 only allows `t.const` or `global.get $imported` as a global
/// initializer expression; both are representable without a constant
/// expression evaluator.
#[derive(Debug, Clone, Copy)]
pub enum GlobalInit {
    Const(wasmc_core::UntypedValue),
    ImportedGlobal(u32),
}

#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub ty: GlobalType,
    /// `None` for imported globals (resolved at link time instead).
    pub init: Option<GlobalInit>,
    pub imported: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableInfo {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryInfo {
    pub min_pages: u32,
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Global,
    Table,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// Active element segment targeting table 0 with a constant `i32` offset
/// (§4.7: "Active, table-index-0 only, with constant i32 offset").
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub offset: i32,
    pub func_indices: Vec<u32>,
}

/// Active data segment with a constant `i32` offset.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub offset: i32,
    pub bytes: Vec<u8>,
}

/// Static, per-function facts known before the function body is compiled:
/// its signature and its *declared* local slots (parameters first, then
/// declared locals in declaration order, run-length grouped as Wasm encodes
/// them). Dynamic per-compile state (register assignments, stack frame
/// size, last-block reference) lives in `common::FunctionCompileState`,
/// which is constructed once per function body from this and mutated while
/// the body is translated.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub sig_idx: SigIdx,
    /// One entry per *declared* local (not counting parameters), in order.
    pub locals: Vec<ValType>,
}

#[derive(Default)]
pub struct ModuleInfo {
    signatures: Vec<FuncType>,
    /// `forward[i] == i` for a canonical signature; otherwise the index of
    /// the canonical signature it was folded into (§4.3: "duplicates
    /// collapsed via a `FORWARD` tag... indirect-call signature equality is
    /// a plain index compare").
    forward: Vec<SigIdx>,
    pub imports: Vec<Import>,
    /// Signature index per *defined* (non-imported) function, in order.
    pub functions: Vec<SigIdx>,
    /// Declared locals per defined function, parallel to `functions`.
    pub function_locals: Vec<Vec<ValType>>,
    pub globals: Vec<GlobalDef>,
    pub table: Option<TableInfo>,
    pub memory: Option<MemoryInfo>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    pub data_count: Option<u32>,
}

type Res<T> = Result<T, CompileError>;

impl ModuleInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_imported_funcs(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Func { .. }))
            .count() as u32
    }

    pub fn num_imported_globals(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Global(_)))
            .count() as u32
    }

    /// Total number of functions: imports first, then defined functions, in
    /// that order — this is the Wasm function-index-space ordering used by
    /// `call`, exports, the start section, and element segments.
    pub fn total_funcs(&self) -> u32 {
        self.num_imported_funcs() + self.functions.len() as u32
    }

    pub fn is_imported_func(&self, func_idx: u32) -> bool {
        func_idx < self.num_imported_funcs()
    }

    /// Resolves a function-index-space index to its signature index.
    pub fn func_sig_idx(&self, func_idx: u32) -> Res<SigIdx> {
        let num_imported = self.num_imported_funcs();
        if func_idx < num_imported {
            let mut seen = 0u32;
            for import in &self.imports {
                if let ImportKind::Func { sig_idx } = import.kind {
                    if seen == func_idx {
                        return Ok(sig_idx);
                    }
                    seen += 1;
                }
            }
            unreachable!("num_imported_funcs is consistent with the imports vec");
        }
        let local_idx = (func_idx - num_imported) as usize;
        self.functions
            .get(local_idx)
            .copied()
            .ok_or(CompileErrorKind::FuncIndexOutOfRange { index: func_idx }.into())
    }

    pub fn func_type(&self, func_idx: u32) -> Res<&FuncType> {
        let sig_idx = self.func_sig_idx(func_idx)?;
        self.signature(sig_idx)
    }

    /// Adds a new signature, folding it into an existing structurally-equal
    /// one if present. Returns the index the caller should record (possibly
    /// itself the canonical index already).
    pub fn add_signature(&mut self, ty: FuncType) -> Res<SigIdx> {
        if ty.params().len() as u32 > limits::MAX_PARAMS {
            return Err(CompileErrorKind::TooManyParams.into());
        }
        if ty.results().len() as u32 > limits::MAX_RESULTS {
            return Err(CompileErrorKind::TooManyResults.into());
        }
        if self.signatures.len() as u32 >= limits::MAX_TYPES {
            return Err(CompileErrorKind::TooManyTypes.into());
        }
        if let Some(existing) = self.signatures.iter().position(|existing| existing == &ty) {
            let canonical = existing as SigIdx;
            let new_idx = self.signatures.len() as SigIdx;
            self.signatures.push(ty);
            self.forward.push(canonical);
            return Ok(canonical);
        }
        let idx = self.signatures.len() as SigIdx;
        self.signatures.push(ty);
        self.forward.push(idx);
        Ok(idx)
    }

    /// Resolves a signature index through the `FORWARD` chain to the
    /// canonical index backing its storage.
    pub fn canonical_sig(&self, idx: SigIdx) -> SigIdx {
        self.forward.get(idx as usize).copied().unwrap_or(idx)
    }

    pub fn signature(&self, idx: SigIdx) -> Res<&FuncType> {
        let canonical = self.canonical_sig(idx);
        self.signatures
            .get(canonical as usize)
            .ok_or(CompileErrorKind::TypeIndexOutOfRange { index: idx }.into())
    }

    /// Appends the five synthetic block-type signatures used by the
    /// single-byte block type encoding (`0x40` plus one value type), called
    /// once after the Type section has been fully parsed.
    pub fn finish_types(&mut self) {
        let synthetic = [
            FuncType::new([], []),
            FuncType::new([], [ValType::I32]),
            FuncType::new([], [ValType::I64]),
            FuncType::new([], [ValType::F32]),
            FuncType::new([], [ValType::F64]),
        ];
        for ty in synthetic {
            let _ = self.add_signature(ty);
        }
    }

    /// The `()->()` synthetic signature index, used for bare `block`/`loop`/`if`.
    pub fn empty_block_sig(&self) -> SigIdx {
        (self.signatures.len() - 5) as SigIdx
    }

    pub fn value_block_sig(&self, ty: ValType) -> SigIdx {
        let base = self.signatures.len() - 5;
        let offset = match ty {
            ValType::I32 => 1,
            ValType::I64 => 2,
            ValType::F32 => 3,
            ValType::F64 => 4,
            ValType::FuncRef => unreachable!("no funcref-valued blocks in Wasm 1.0"),
        };
        (base + offset) as SigIdx
    }

    pub fn global_type(&self, idx: u32) -> Res<GlobalType> {
        self.globals
            .get(idx as usize)
            .map(|g| g.ty)
            .ok_or(CompileErrorKind::GlobalIndexOutOfRange { index: idx }.into())
    }

    pub fn check_table_index(&self, idx: u32) -> Res<()> {
        if idx == 0 && self.table.is_some() {
            Ok(())
        } else {
            Err(CompileErrorKind::TableIndexOutOfRange { index: idx }.into())
        }
    }

    pub fn check_global_count(&self) -> Res<()> {
        if self.globals.len() as u32 > limits::MAX_GLOBALS {
            return Err(CompileErrorKind::TooManyGlobals.into());
        }
        Ok(())
    }

    pub fn check_import_count(&self) -> Res<()> {
        if self.imports.len() as u32 > limits::MAX_IMPORTS {
            return Err(CompileErrorKind::TooManyImports.into());
        }
        Ok(())
    }

    pub fn check_func_count(&self) -> Res<()> {
        if self.total_funcs() > limits::MAX_FUNCTIONS {
            return Err(CompileErrorKind::TooManyFunctions.into());
        }
        Ok(())
    }

    pub fn check_table_size(&self, size: u32) -> Res<()> {
        if size > limits::MAX_TABLE_ENTRIES {
            return Err(CompileErrorKind::TooManyTableEntries.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structurally_equal_signatures_fold() {
        let mut info = ModuleInfo::new();
        let a = info
            .add_signature(FuncType::new([ValType::I32], [ValType::I32]))
            .unwrap();
        let b = info
            .add_signature(FuncType::new([ValType::I32], [ValType::I32]))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(info.canonical_sig(a), info.canonical_sig(b));
    }

    #[test]
    fn distinct_signatures_do_not_fold() {
        let mut info = ModuleInfo::new();
        let a = info
            .add_signature(FuncType::new([ValType::I32], [ValType::I32]))
            .unwrap();
        let b = info
            .add_signature(FuncType::new([ValType::I64], [ValType::I32]))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn synthetic_block_signatures() {
        let mut info = ModuleInfo::new();
        info.finish_types();
        let empty = info.empty_block_sig();
        assert_eq!(info.signature(empty).unwrap().params().len(), 0);
        assert_eq!(info.signature(empty).unwrap().results().len(), 0);
        let i32_sig = info.value_block_sig(ValType::I32);
        assert_eq!(info.signature(i32_sig).unwrap().results(), [ValType::I32]);
    }
}

//! Reader for the binary module artifact produced by
//! `wasmc_compiler::artifact::write` (§6 "External interfaces").
//!
//! Every section is length-prefixed and every variable-length field inside
//! a section carries its own length immediately before the padded bytes, so
//! parsing never has to scan for zero-padding to find a boundary.

use crate::error::{RuntimeError, RuntimeErrorKind};
use alloc::vec::Vec;
use wasmc_core::ValType;

/// Bump whenever `wasmc_compiler::artifact::ARTIFACT_VERSION` changes in an
/// incompatible way; kept independently so this crate never needs to depend
/// on `wasmc-compiler` just to read one constant.
pub const ARTIFACT_VERSION: u32 = 3;

pub const NO_OFFSET: u32 = u32::MAX;
pub const NO_SIG: u32 = u32::MAX;
pub const NO_FUNC_INDEX: u32 = u32::MAX;

type Res<T> = Result<T, RuntimeError>;

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn corrupt(reason: &'static str) -> RuntimeError {
        RuntimeErrorKind::CorruptArtifact { reason }.into()
    }

    fn bytes(&mut self, n: usize) -> Res<&'a [u8]> {
        let end = self.offset.checked_add(n).ok_or_else(|| Self::corrupt("length overflow"))?;
        let slice = self.bytes.get(self.offset..end).ok_or_else(|| Self::corrupt("unexpected end of artifact"))?;
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Res<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Res<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Res<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn align_to(&mut self, align: usize) -> Res<()> {
        let pad = (align - (self.offset % align)) % align;
        self.bytes(pad)?;
        Ok(())
    }

    /// Reads a `len`-prefixed byte string, then consumes the padding up to
    /// the next 4-byte boundary.
    fn padded_bytes(&mut self) -> Res<&'a [u8]> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        self.align_to(4)?;
        Ok(bytes)
    }

    fn padded_str(&mut self) -> Res<&'a str> {
        let bytes = self.padded_bytes()?;
        core::str::from_utf8(bytes).map_err(|_| Self::corrupt("name is not valid utf-8"))
    }

    /// Reads a `(params ++ ":" ++ results)` signature string and splits it
    /// into typed param/result vectors.
    fn signature(&mut self) -> Res<(Vec<ValType>, Vec<ValType>)> {
        let raw = self.padded_str()?;
        let mut parts = raw.splitn(2, ':');
        let params_str = parts.next().ok_or_else(|| Self::corrupt("signature missing ':'"))?;
        let results_str = parts.next().ok_or_else(|| Self::corrupt("signature missing ':'"))?;
        let parse = |s: &str| -> Res<Vec<ValType>> {
            s.bytes().map(|b| val_type_from_code(b).ok_or_else(|| Self::corrupt("invalid signature code"))).collect()
        };
        Ok((parse(params_str)?, parse(results_str)?))
    }

    /// Runs `body` over exactly the bytes of one length-prefixed section,
    /// then seeks past it regardless of how much `body` actually consumed.
    fn section<T>(&mut self, body: impl FnOnce(&mut Cursor<'a>) -> Res<T>) -> Res<T> {
        let len = self.u32()? as usize;
        let start = self.offset;
        let end = start.checked_add(len).ok_or_else(|| Self::corrupt("section length overflow"))?;
        if end > self.bytes.len() {
            return Err(Self::corrupt("section runs past end of artifact"));
        }
        let mut inner = Cursor { bytes: &self.bytes[..end], offset: start };
        let result = body(&mut inner)?;
        self.offset = end;
        Ok(result)
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.offset..]
    }
}

fn val_type_from_code(b: u8) -> Option<ValType> {
    Some(match b {
        b'i' => ValType::I32,
        b'l' => ValType::I64,
        b'f' => ValType::F32,
        b'd' => ValType::F64,
        b'r' => ValType::FuncRef,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct TableEntry {
    pub offset: u32,
    pub sig: u32,
}

impl TableEntry {
    pub fn is_used(&self) -> bool {
        self.offset != NO_OFFSET
    }
}

pub struct ExportedFunction<'a> {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
    pub name: &'a str,
    /// `None` when the function is reachable only through the table (its
    /// only `CompiledFunction` body offset sits behind a wrapper, not a
    /// native-ABI entry point exported under its own name).
    pub func_index: Option<u32>,
    /// Code offset of the native-ABI wrapper `call_exported` jumps to.
    pub entry_point_offset: u32,
}

pub struct ExportedGlobal<'a> {
    pub init_bits: u64,
    pub mutable: bool,
    pub val_type: ValType,
    pub name: &'a str,
}

pub struct DynamicImport<'a> {
    pub module: &'a str,
    pub name: &'a str,
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
    pub link_data_offset: u32,
}

pub struct MutableGlobalInit {
    pub init_bits: u64,
    pub link_data_offset: u32,
    pub val_type: ValType,
}

pub struct StartFunction {
    pub wrapper_offset: u32,
}

pub struct DataSegment<'a> {
    pub bytes: &'a [u8],
    pub offset: u32,
}

/// A parsed, still-borrowed view over one `artifact::write` output buffer.
/// Nothing here allocates beyond the small per-entry `Vec<ValType>`
/// signature vectors; names and data-segment bytes borrow straight from
/// `raw`.
pub struct BinaryModule<'a> {
    pub version: u32,
    pub stacktrace_entry_count: u32,
    pub landing_pad_offset: u32,
    pub link_data_length: u32,
    pub table_wrappers: Vec<u32>,
    pub table: Vec<TableEntry>,
    pub link_status: &'a [u8],
    pub exported_functions: Vec<ExportedFunction<'a>>,
    pub exported_globals: Vec<ExportedGlobal<'a>>,
    pub memory_min_pages: Option<u32>,
    pub dynamic_imports: Vec<DynamicImport<'a>>,
    pub mutable_globals: Vec<MutableGlobalInit>,
    pub start_function: Option<StartFunction>,
    pub data_segments: Vec<DataSegment<'a>>,
    pub code: &'a [u8],
}

impl<'a> BinaryModule<'a> {
    pub fn parse(raw: &'a [u8]) -> Res<Self> {
        let mut c = Cursor::new(raw);

        let (version, stacktrace_entry_count, landing_pad_offset, link_data_length) = c.section(|c| {
            Ok((c.u32()?, c.u32()?, c.u32()?, c.u32()?))
        })?;
        if version != ARTIFACT_VERSION {
            return Err(RuntimeErrorKind::UnsupportedArtifactVersion { found: version }.into());
        }

        let table_wrappers = c.section(|c| {
            let mut v = Vec::new();
            while !c.remaining().is_empty() {
                v.push(c.u32()?);
            }
            Ok(v)
        })?;

        let table = c.section(|c| {
            let mut v = Vec::new();
            while !c.remaining().is_empty() {
                v.push(TableEntry { offset: c.u32()?, sig: c.u32()? });
            }
            Ok(v)
        })?;

        let link_status = c.section(|c| Ok(c.remaining()))?;

        let exported_functions = c.section(|c| {
            let mut v = Vec::new();
            while !c.remaining().is_empty() {
                let (params, results) = c.signature()?;
                let name = c.padded_str()?;
                let raw_index = c.u32()?;
                let entry_point_offset = c.u32()?;
                v.push(ExportedFunction {
                    params,
                    results,
                    name,
                    func_index: if raw_index == NO_FUNC_INDEX { None } else { Some(raw_index) },
                    entry_point_offset,
                });
            }
            Ok(v)
        })?;

        let exported_globals = c.section(|c| {
            let mut v = Vec::new();
            while !c.remaining().is_empty() {
                let init_bits = c.u64()?;
                let mutable = c.u8()? != 0;
                let val_type = val_type_from_code(c.u8()?).ok_or_else(|| Cursor::corrupt("invalid global type code"))?;
                c.u8()?;
                c.u8()?;
                let name = c.padded_str()?;
                v.push(ExportedGlobal { init_bits, mutable, val_type, name });
            }
            Ok(v)
        })?;

        let memory_min_pages = match c.u32()? {
            NO_OFFSET => None,
            pages => Some(pages),
        };

        let dynamic_imports = c.section(|c| {
            let mut v = Vec::new();
            while !c.remaining().is_empty() {
                let module = c.padded_str()?;
                let name = c.padded_str()?;
                let (params, results) = c.signature()?;
                let link_data_offset = c.u32()?;
                v.push(DynamicImport { module, name, params, results, link_data_offset });
            }
            Ok(v)
        })?;

        let mutable_globals = c.section(|c| {
            let mut v = Vec::new();
            while !c.remaining().is_empty() {
                let init_bits = c.u64()?;
                let link_data_offset = c.u32()?;
                let val_type = val_type_from_code(c.u8()?).ok_or_else(|| Cursor::corrupt("invalid global type code"))?;
                c.u8()?;
                c.u8()?;
                c.u8()?;
                v.push(MutableGlobalInit { init_bits, link_data_offset, val_type });
            }
            Ok(v)
        })?;

        let start_function = c.section(|c| {
            if c.remaining().is_empty() {
                return Ok(None);
            }
            let (_params, _results) = c.signature()?;
            let wrapper_offset = c.u32()?;
            Ok(Some(StartFunction { wrapper_offset }))
        })?;

        c.section(|_c| Ok(()))?; // function names: unused, debug maps are never emitted

        let data_segments = c.section(|c| {
            let mut v = Vec::new();
            while !c.remaining().is_empty() {
                let bytes = c.padded_bytes()?;
                let offset = c.u32()?;
                v.push(DataSegment { bytes, offset });
            }
            Ok(v)
        })?;

        let code = c.remaining();

        Ok(Self {
            version,
            stacktrace_entry_count,
            landing_pad_offset,
            link_data_length,
            table_wrappers,
            table,
            link_status,
            exported_functions,
            exported_globals,
            memory_min_pages,
            dynamic_imports,
            mutable_globals,
            start_function,
            data_segments,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_padded(buf: &mut Vec<u8>, bytes: &[u8]) {
        buf.extend_from_slice(bytes);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    /// Hand-builds the smallest legal artifact (no exports, no imports, no
    /// memory, no data) and checks every section comes back empty.
    #[test]
    fn parses_empty_module() {
        let mut out = Vec::new();

        // module metadata
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&ARTIFACT_VERSION.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&NO_OFFSET.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        for _ in 0..7 {
            out.extend_from_slice(&0u32.to_le_bytes()); // empty section
        }
        // memory (no prefix)
        out.extend_from_slice(&NO_OFFSET.to_le_bytes());
        for _ in 0..4 {
            out.extend_from_slice(&0u32.to_le_bytes());
        }

        let m = BinaryModule::parse(&out).expect("parses");
        assert_eq!(m.version, ARTIFACT_VERSION);
        assert!(m.table.is_empty());
        assert!(m.exported_functions.is_empty());
        assert_eq!(m.memory_min_pages, None);
        assert!(m.start_function.is_none());
        assert!(m.code.is_empty());

        let _ = push_padded;
    }

    #[test]
    fn rejects_wrong_version() {
        let mut out = Vec::new();
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&(ARTIFACT_VERSION + 1).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&NO_OFFSET.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        assert!(BinaryModule::parse(&out).is_err());
    }
}

use core::fmt;

/// The four Wasm 1.0 number types, plus `funcref` for table element checks.
///
/// `spec.md` §3 StackElement carries exactly this type tag on every
/// concrete value; `ValType` is that tag lifted out into its own type so it
/// can be reused by `ValidationStack`, `LocalDef`/`GlobalDef`, and signature
/// records without duplicating the match arms everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    FuncRef,
}

impl ValType {
    /// Size in bytes of the value's natural storage: 4 for i32/f32, 8 otherwise.
    ///
    /// §3 invariant: "A local of size 4 may be register-allocated; a local
    /// of size 8 is always on the stack."
    pub const fn size(self) -> u32 {
        match self {
            ValType::I32 | ValType::F32 => 4,
            ValType::I64 | ValType::F64 | ValType::FuncRef => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ValType::F32 | ValType::F64)
    }

    pub const fn is_64(self) -> bool {
        matches!(self, ValType::I64 | ValType::F64)
    }

    /// Parses the single-byte Wasm binary encoding of a value type.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x7F => Some(ValType::I32),
            0x7E => Some(ValType::I64),
            0x7D => Some(ValType::F32),
            0x7C => Some(ValType::F64),
            0x70 => Some(ValType::FuncRef),
            _ => None,
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::FuncRef => "funcref",
        };
        f.write_str(name)
    }
}

/// A block/function signature: `Vec<ValType> -> Vec<ValType>`.
///
/// `ModuleInfo` (§4.3) stores these once and collapses structural duplicates
/// via a `FORWARD` indirection; `FuncType` itself is just the (params,
/// results) pair, equality is plain `Vec` equality (structural).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    params: alloc::vec::Vec<ValType>,
    results: alloc::vec::Vec<ValType>,
}

impl FuncType {
    pub fn new<P, R>(params: P, results: R) -> Self
    where
        P: IntoIterator<Item = ValType>,
        R: IntoIterator<Item = ValType>,
    {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    pub fn results(&self) -> &[ValType] {
        &self.results
    }
}

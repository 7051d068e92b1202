//! Host-facing typed values for `call_exported`'s argument/return marshaling
//! (§6 "Calling convention"). `wasmc_core::UntypedValue` stays the
//! bit-pattern currency everywhere on the fast path; `WasmValue` only exists
//! at the public API boundary where a caller hands in or reads back typed
//! Rust values.

use crate::error::{RuntimeError, RuntimeErrorKind};
use alloc::string::String;
use wasmc_core::{untyped, UntypedValue, ValType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WasmValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// A table index into the module's single function table, or `None`
    /// for the null funcref (§1 Non-goals: reference types beyond funcref).
    FuncRef(Option<u32>),
}

impl WasmValue {
    pub fn val_type(self) -> ValType {
        match self {
            Self::I32(_) => ValType::I32,
            Self::I64(_) => ValType::I64,
            Self::F32(_) => ValType::F32,
            Self::F64(_) => ValType::F64,
            Self::FuncRef(_) => ValType::FuncRef,
        }
    }

    pub fn to_untyped(self) -> UntypedValue {
        match self {
            Self::I32(v) => UntypedValue::i32(v),
            Self::I64(v) => UntypedValue::i64(v),
            Self::F32(v) => UntypedValue::f32(v),
            Self::F64(v) => UntypedValue::f64(v),
            Self::FuncRef(v) => UntypedValue::i64(v.map(i64::from).unwrap_or(-1)),
        }
    }

    pub fn from_untyped(ty: ValType, value: UntypedValue) -> Self {
        match ty {
            ValType::I32 => Self::I32(value.as_i32()),
            ValType::I64 => Self::I64(value.as_i64()),
            ValType::F32 => Self::F32(value.as_f32()),
            ValType::F64 => Self::F64(value.as_f64()),
            ValType::FuncRef => {
                let raw = value.as_i64();
                Self::FuncRef(if raw < 0 { None } else { Some(raw as u32) })
            }
        }
    }

    pub fn to_slot(self) -> [u8; 8] {
        untyped::encode_slot(self.to_untyped())
    }

    pub fn from_slot(ty: ValType, slot: [u8; 8]) -> Self {
        Self::from_untyped(ty, untyped::decode_slot(ty, slot))
    }
}

fn type_name(ty: ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::FuncRef => "funcref",
    }
}

/// Checks `args` against `params` one-by-one and packs each into its 8-byte
/// calling-convention slot, failing fast on the first mismatch rather than
/// collecting every error (call sites only ever report one).
pub fn pack_args(params: &[ValType], args: &[WasmValue]) -> Result<alloc::vec::Vec<[u8; 8]>, RuntimeError> {
    if params.len() != args.len() {
        return Err(signature_mismatch(params, args.iter().map(|a| a.val_type())));
    }
    for (&expected, arg) in params.iter().zip(args) {
        if expected != arg.val_type() {
            return Err(signature_mismatch(params, args.iter().map(|a| a.val_type())));
        }
    }
    Ok(args.iter().map(|a| a.to_slot()).collect())
}

pub fn unpack_results(results: &[ValType], slots: &[[u8; 8]]) -> alloc::vec::Vec<WasmValue> {
    results.iter().zip(slots).map(|(&ty, &slot)| WasmValue::from_slot(ty, slot)).collect()
}

fn signature_mismatch(expected: &[ValType], found: impl Iterator<Item = ValType>) -> RuntimeError {
    let fmt_sig = |types: &mut dyn Iterator<Item = ValType>| -> String {
        let mut s = String::new();
        for (i, ty) in types.enumerate() {
            if i > 0 {
                s.push(',');
            }
            s.push_str(type_name(ty));
        }
        s
    };
    RuntimeErrorKind::SignatureMismatch {
        expected: fmt_sig(&mut expected.iter().copied()),
        found: fmt_sig(&mut found.into_iter()),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_roundtrips_through_slot() {
        let v = WasmValue::I32(-42);
        let back = WasmValue::from_slot(ValType::I32, v.to_slot());
        assert_eq!(v, back);
    }

    #[test]
    fn null_funcref_roundtrips() {
        let v = WasmValue::FuncRef(None);
        assert_eq!(WasmValue::from_slot(ValType::FuncRef, v.to_slot()), v);
        let v = WasmValue::FuncRef(Some(7));
        assert_eq!(WasmValue::from_slot(ValType::FuncRef, v.to_slot()), v);
    }

    #[test]
    fn pack_args_rejects_arity_mismatch() {
        let params = [ValType::I32, ValType::I32];
        let args = [WasmValue::I32(1)];
        assert!(pack_args(&params, &args).is_err());
    }

    #[test]
    fn pack_args_rejects_type_mismatch() {
        let params = [ValType::I32];
        let args = [WasmValue::F64(1.0)];
        assert!(pack_args(&params, &args).is_err());
    }
}

//! End-to-end compile tests against hand-encoded Wasm binaries.
//!
//! No `wat` dependency here: every module below is written out byte-by-byte
//! per the standard Wasm 1.0 binary encoding, matching SPEC_FULL.md's note
//! that the core crates' tests avoid a text-format parser dependency.

use wasmc_compiler::backend::x86_64::X86_64;
use wasmc_compiler::{compile, CompileErrorKind, CompilerConfig, TargetIsa};

const WASM_MAGIC_AND_VERSION: &[u8] = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

/// `(func (export "add") (param i32 i32) (result i32) local.get 0 local.get 1 i32.add)`
fn add_module() -> Vec<u8> {
    let mut wasm = WASM_MAGIC_AND_VERSION.to_vec();
    // type section: (i32, i32) -> i32
    wasm.extend_from_slice(&[0x01, 0x06, 0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f]);
    // function section: one function, sig 0
    wasm.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
    // export section: "add" -> func 0
    wasm.extend_from_slice(&[0x07, 0x07, 0x01, 0x03, b'a', b'd', b'd', 0x00, 0x00]);
    // code section: local.get 0; local.get 1; i32.add; end
    wasm.extend_from_slice(&[0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b]);
    wasm
}

/// `(func (export "boom") unreachable)`
fn trap_module() -> Vec<u8> {
    let mut wasm = WASM_MAGIC_AND_VERSION.to_vec();
    wasm.extend_from_slice(&[0x01, 0x03, 0x60, 0x00, 0x00]);
    wasm.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
    wasm.extend_from_slice(&[0x07, 0x08, 0x01, 0x04, b'b', b'o', b'o', b'm', 0x00, 0x00]);
    wasm.extend_from_slice(&[0x0a, 0x05, 0x01, 0x03, 0x00, 0x00, 0x0b]);
    wasm
}

#[test]
fn compiles_simple_export_and_writes_an_artifact() {
    let wasm = add_module();
    let config = CompilerConfig::new(TargetIsa::X86_64);
    let compiled = compile(&wasm, X86_64::new(), config).expect("add module should compile");

    assert_eq!(compiled.module.exports.len(), 1);
    assert!(!compiled.code.is_empty());

    let artifact = wasmc_compiler::artifact::write(&compiled);
    assert!(artifact.len() > WASM_MAGIC_AND_VERSION.len());
}

#[test]
fn compiles_unreachable_export() {
    let wasm = trap_module();
    let config = CompilerConfig::new(TargetIsa::X86_64);
    let compiled = compile(&wasm, X86_64::new(), config).expect("trap module should compile");
    assert_eq!(compiled.module.exports.len(), 1);
}

#[test]
fn rejects_bad_magic() {
    let mut wasm = add_module();
    wasm[0] = 0xff;
    let config = CompilerConfig::new(TargetIsa::X86_64);
    let err = compile(&wasm, X86_64::new(), config).unwrap_err();
    assert!(matches!(
        err.kind(),
        CompileErrorKind::UnexpectedEnd | CompileErrorKind::Message(_) | CompileErrorKind::InvalidSectionId(_)
    ));
}

#[test]
fn rejects_simd_as_not_supported() {
    // type section declaring a v128 param, which this implementation never
    // accepts (§1 Non-goals: SIMD).
    let mut wasm = WASM_MAGIC_AND_VERSION.to_vec();
    wasm.extend_from_slice(&[0x01, 0x05, 0x60, 0x01, 0x7b, 0x00]);
    wasm.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
    wasm.extend_from_slice(&[0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b]);

    let config = CompilerConfig::new(TargetIsa::X86_64);
    let err = compile(&wasm, X86_64::new(), config).unwrap_err();
    assert_eq!(err.kind(), &CompileErrorKind::SimdNotSupported);
}

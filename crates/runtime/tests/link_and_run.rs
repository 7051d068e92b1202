//! Links and executes artifacts produced by `wasmc-compiler`, end to end.

use std::ffi::c_void;

use wasmc_compiler::backend::x86_64::X86_64;
use wasmc_compiler::{compile, CompilerConfig, TargetIsa};
use wasmc_runtime::{BinaryModule, HostSymbol, Runtime, RuntimeLimits, TrapCode, WasmValue};

const WASM_MAGIC_AND_VERSION: &[u8] = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

fn add_module() -> Vec<u8> {
    let mut wasm = WASM_MAGIC_AND_VERSION.to_vec();
    wasm.extend_from_slice(&[0x01, 0x06, 0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f]);
    wasm.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
    wasm.extend_from_slice(&[0x07, 0x07, 0x01, 0x03, b'a', b'd', b'd', 0x00, 0x00]);
    wasm.extend_from_slice(&[0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b]);
    wasm
}

fn trap_module() -> Vec<u8> {
    let mut wasm = WASM_MAGIC_AND_VERSION.to_vec();
    wasm.extend_from_slice(&[0x01, 0x03, 0x60, 0x00, 0x00]);
    wasm.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
    wasm.extend_from_slice(&[0x07, 0x08, 0x01, 0x04, b'b', b'o', b'o', b'm', 0x00, 0x00]);
    wasm.extend_from_slice(&[0x0a, 0x05, 0x01, 0x03, 0x00, 0x00, 0x0b]);
    wasm
}

fn build_artifact(wasm: &[u8]) -> Vec<u8> {
    let config = CompilerConfig::new(TargetIsa::X86_64);
    let compiled = compile(wasm, X86_64::new(), config).expect("module should compile");
    wasmc_compiler::artifact::write(&compiled)
}

#[test]
fn links_and_invokes_an_export() {
    let artifact = build_artifact(&add_module());
    let binary = BinaryModule::parse(&artifact).expect("artifact should parse");

    let imports: Vec<HostSymbol> = Vec::new();
    let limits = RuntimeLimits::new();
    let mut runtime =
        Runtime::init(&binary, &imports, core::ptr::null_mut::<c_void>(), limits).expect("module should link");
    runtime.start().expect("start should succeed");

    let results = runtime
        .call_exported("add", &[WasmValue::I32(17), WasmValue::I32(25)])
        .expect("add should run");
    assert_eq!(results, vec![WasmValue::I32(42)]);
}

#[test]
fn second_start_call_fails() {
    let artifact = build_artifact(&add_module());
    let binary = BinaryModule::parse(&artifact).unwrap();
    let mut runtime = Runtime::init(&binary, &[], core::ptr::null_mut::<c_void>(), RuntimeLimits::new()).unwrap();

    runtime.start().expect("first start succeeds");
    assert!(runtime.start().is_err(), "second start must fail regardless of a start function being present");
}

#[test]
fn unreachable_instruction_traps() {
    let artifact = build_artifact(&trap_module());
    let binary = BinaryModule::parse(&artifact).unwrap();
    let mut runtime = Runtime::init(&binary, &[], core::ptr::null_mut::<c_void>(), RuntimeLimits::new()).unwrap();
    runtime.start().unwrap();

    let err = runtime.call_exported("boom", &[]).unwrap_err();
    assert_eq!(err.kind(), &wasmc_runtime::RuntimeErrorKind::Trap(TrapCode::Unreachable));
}

#[test]
fn call_exported_before_start_is_rejected() {
    let artifact = build_artifact(&add_module());
    let binary = BinaryModule::parse(&artifact).unwrap();
    let mut runtime = Runtime::init(&binary, &[], core::ptr::null_mut::<c_void>(), RuntimeLimits::new()).unwrap();

    let err = runtime.call_exported("add", &[WasmValue::I32(1), WasmValue::I32(2)]).unwrap_err();
    assert_eq!(
        err.kind(),
        &wasmc_runtime::RuntimeErrorKind::ModuleNotInitializedCallStartFirst
    );
}

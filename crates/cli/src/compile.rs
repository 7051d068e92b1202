use wasmc_compiler::backend::{aarch64::AArch64, tricore::TriCore, x86_64::X86_64};
use wasmc_compiler::{CompileError, CompilerConfig};

use crate::args::{Cli, TargetArg};

/// Compiles `wasm` per the CLI's flags and returns the serialized artifact.
pub fn compile_to_artifact(cli: &Cli, wasm: &[u8]) -> Result<Vec<u8>, CompileError> {
    let mut config = CompilerConfig::new(cli.target.into());
    config = config.bulk_memory(!cli.no_bulk_memory);
    config = config.non_trapping_float_to_int(cli.non_trapping_float_to_int);

    let compiled = match cli.target {
        TargetArg::X86_64 => wasmc_compiler::compile(wasm, X86_64::new(), config)?,
        TargetArg::Aarch64 => wasmc_compiler::compile(wasm, AArch64::default(), config)?,
        TargetArg::Tricore => wasmc_compiler::compile(wasm, TriCore::default(), config)?,
    };
    Ok(wasmc_compiler::artifact::write(&compiled))
}

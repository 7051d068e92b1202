//! `wasmc`: compiles a `.wasm`/`.wat` module to the binary artifact format
//! described in spec §6, and optionally runs it (§6 "CLI surface").

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

mod args;
mod compile;
mod exitcode;
mod run;
mod values;

use args::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.init();

    match execute(&cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err((err, code)) => {
            eprintln!("error: {err:#}");
            ExitCode::from(code as u8)
        }
    }
}

fn execute(cli: &Cli) -> Result<i32, (anyhow::Error, i32)> {
    let wasm = wat::parse_file(&cli.input).map_err(|e| (e.into(), exitcode::VALIDATION))?;

    let artifact = compile::compile_to_artifact(cli, &wasm).map_err(|e| {
        let code = exitcode::for_compile_error(e.kind());
        (anyhow::Error::new(e), code)
    })?;

    let output = output_path(cli);
    std::fs::write(&output, &artifact)
        .with_context(|| format!("writing artifact to {}", output.display()))
        .map_err(|e| (e, exitcode::GENERIC))?;
    log::info!("wrote {} bytes to {}", artifact.len(), output.display());

    if cli.run || cli.invoke.is_some() {
        run::run_artifact(cli, &artifact).map_err(|e| {
            let code = e
                .downcast_ref::<wasmc_runtime::RuntimeError>()
                .map(|re| exitcode::for_runtime_error(re.kind()))
                .unwrap_or(exitcode::RUNTIME);
            (e, code)
        })?;
    }

    Ok(exitcode::OK)
}

fn output_path(cli: &Cli) -> PathBuf {
    cli.output.clone().unwrap_or_else(|| cli.input.with_extension("bin"))
}

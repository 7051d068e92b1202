use std::ffi::c_void;

use anyhow::{Context, Result};
use wasmc_runtime::{BinaryModule, HostSymbol, Runtime, RuntimeLimits};

use crate::args::Cli;
use crate::values::{format_value, parse_value};

/// Loads a freshly-compiled artifact, runs its start function, and
/// optionally invokes one export.
pub fn run_artifact(cli: &Cli, artifact: &[u8]) -> Result<()> {
    let binary = BinaryModule::parse(artifact).context("parsing compiled artifact")?;
    let imports: Vec<HostSymbol> = Vec::new();
    let limits = RuntimeLimits::new();

    let mut runtime = Runtime::init(&binary, &imports, core::ptr::null_mut::<c_void>(), limits).context("linking module")?;
    runtime.start().context("running start function")?;

    let Some(name) = &cli.invoke else {
        return Ok(());
    };

    let args = cli
        .invoke_args
        .iter()
        .map(|a| parse_value(a))
        .collect::<Result<Vec<_>>>()
        .context("parsing --invoke arguments")?;

    let results = runtime.call_exported(name, &args).with_context(|| format!("invoking `{name}`"))?;
    for value in results {
        println!("{}", format_value(value));
    }
    Ok(())
}

//! Command-line surface (§6 "CLI surface"): the compiler is library-first,
//! so this is intentionally small — compile a module, optionally run it.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    X86_64,
    Aarch64,
    Tricore,
}

impl From<TargetArg> for wasmc_compiler::TargetIsa {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::X86_64 => wasmc_compiler::TargetIsa::X86_64,
            TargetArg::Aarch64 => wasmc_compiler::TargetIsa::Aarch64,
            TargetArg::Tricore => wasmc_compiler::TargetIsa::TriCore,
        }
    }
}

/// Compiles a `.wasm`/`.wat` module to a binary artifact, and optionally
/// invokes one of its exports.
#[derive(Parser)]
#[command(name = "wasmc", version, about)]
pub struct Cli {
    /// Path to the input module (`.wasm` or `.wat`).
    pub input: PathBuf,

    /// Where to write the compiled artifact. Defaults to the input path
    /// with its extension replaced by `.bin`.
    #[clap(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Native backend to compile for.
    #[clap(long = "target", value_enum, default_value_t = TargetArg::X86_64)]
    pub target: TargetArg,

    /// Disable bulk-memory opcodes (`memory.copy`/`memory.fill`).
    #[clap(long = "no-bulk-memory")]
    pub no_bulk_memory: bool,

    /// Enable non-trapping float-to-int truncation (`*.trunc_sat_*`).
    #[clap(long = "non-trapping-float-to-int")]
    pub non_trapping_float_to_int: bool,

    /// After compiling, load and run the artifact.
    #[clap(long = "run")]
    pub run: bool,

    /// Exported function to invoke. Implies `--run`. Defaults to the
    /// module's start function only.
    #[clap(long = "invoke", value_name = "NAME")]
    pub invoke: Option<String>,

    /// Arguments passed to `--invoke`, parsed per Wasm value syntax
    /// (`i32:1`, `i64:-2`, `f32:1.5`, `f64:2.5`).
    #[clap(value_name = "ARGS", trailing_var_arg = true)]
    pub invoke_args: Vec<String>,

    /// Print informational messages beyond warnings or errors.
    #[clap(short = 'v', long = "verbose")]
    pub verbose: bool,
}

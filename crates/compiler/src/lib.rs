//! A single-pass, streaming ahead-of-time compiler for WebAssembly 1.0.
//!
//! There is no intermediate representation: the [`frontend::Frontend`] drives
//! a [`bytecode_reader::BytecodeReader`] through the module's sections,
//! maintains a [`validation_stack::ValidationStack`] (the Wasm type system)
//! alongside a [`compiler_stack::CompilerStack`] (a mixed stack of concrete
//! values, deferred arithmetic, and control-flow frames), and calls into
//! [`common::Common`] and a pluggable [`backend::Backend`] to lower each
//! opcode directly into native instructions.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

pub mod artifact;
pub mod backend;
pub mod bytecode_reader;
pub mod common;
pub mod compiler_stack;
pub mod config;
pub mod frontend;
pub mod mem_writer;
pub mod module_info;
pub mod opcode;
pub mod validation_stack;

pub use crate::{
    backend::Backend,
    config::{CompilerConfig, TargetIsa},
    frontend::{compile, Frontend},
};

pub use wasmc_core::{CompileError, CompileErrorKind};

pub type CompileResult<T> = Result<T, CompileError>;

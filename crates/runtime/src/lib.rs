//! Loader, linker and native-code execution host for modules produced by
//! `wasmc-compiler` (§4.8 "Runtime").
//!
//! [`binary_module::BinaryModule`] parses the artifact `artifact::write`
//! produced; [`runtime::Runtime`] turns a parsed artifact plus host-supplied
//! imports into a linked, callable instance.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

pub mod basedata;
pub mod binary_module;
pub mod error;
pub mod limits;
pub mod memory;
#[cfg(feature = "std")]
pub mod runtime;
pub mod stacktrace;
pub mod value;

pub use crate::{
    binary_module::BinaryModule,
    error::{RuntimeError, RuntimeErrorKind},
    limits::RuntimeLimits,
    memory::{ExtendableMemory, MemoryGrower, VecGrower},
    stacktrace::{Frame, StackTrace},
    value::WasmValue,
};

#[cfg(feature = "std")]
pub use crate::runtime::{HostSymbol, ImportLinkage, ImportVersion, RawFunction, RawTableFunction, Runtime};

pub use wasmc_core::{TrapCode, ValType};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

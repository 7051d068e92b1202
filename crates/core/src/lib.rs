//! Shared primitives used by both the `wasmc-compiler` and `wasmc-runtime` crates.
//!
//! Nothing in here knows about native code generation or section layout; it
//! only fixes the vocabulary (value types, trap codes, error kinds,
//! implementation limits) that both sides of the AOT boundary must agree on.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

pub mod basedata;
pub mod error;
pub mod limits;
pub mod trap;
pub mod untyped;
pub mod val_type;

pub use crate::{
    basedata::Basedata,
    error::{CompileError, CompileErrorKind},
    trap::TrapCode,
    untyped::UntypedValue,
    val_type::ValType,
};

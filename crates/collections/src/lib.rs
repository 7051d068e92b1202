//! Fast arena allocators used as the backbone for `ModuleInfo`'s signature
//! table and the compiler stack's node sequence.
//!
//! Mirrors the design of a typical Wasm engine's arena crate: entities are
//! appended and indexed by a small `Copy` index type, and individual entries
//! are never deallocated (the whole arena is dropped at once, when the
//! `Compiler` that owns it is dropped).

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std as alloc;

mod arena;
mod stack_arena;

pub use self::{arena::Arena, arena::ArenaIndex, stack_arena::StackArena, stack_arena::StackNodeId};

use crate::compiler_stack::Storage;
use wasmc_core::{UntypedValue, ValType};

/// A function's local, tracked from declaration to its current authoritative
/// location (§3 `LocalDef`). `storage`'s variant *is* the
/// `currentStorageType` field from the spec — folding the tag into the
/// enum removes a whole class of "tag says register but storage says
/// stack slot" bugs.
#[derive(Debug, Clone, Copy)]
pub struct LocalSlot {
    pub ty: ValType,
    pub storage: Storage,
}

/// Either an imported global (resolved at link time, always accessed
/// through link data) or a compile-time-constant global, inlined directly
/// wherever it's read (mutable globals still need a link-data cell to
/// remain observable to the host and across calls, so "constant" here only
/// applies to *immutable, defined* globals).
#[derive(Debug, Clone, Copy)]
pub enum GlobalStorage {
    Const(UntypedValue),
    LinkData(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct GlobalSlot {
    pub ty: ValType,
    pub mutable: bool,
    pub storage: GlobalStorage,
}

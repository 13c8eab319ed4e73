//! Relocation records for patchable layout constants.
//!
//! Oracle address answers come in two flavors: compile-time constants
//! baked into a `MovImm`, and values that must be resolved later (for
//! ahead-of-time compilation or relocatable VM metadata). The latter
//! are emitted as `MovPatchable` and surfaced as relocation records on
//! the finished program; the code cache patches them before the code
//! runs.

use opal_runtime::layout::ClassId;

/// What value a patch site receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// The heap base subtracted before card indexing.
    HeapBase,
    /// Address of card byte zero.
    CardTableBase,
    /// A class pointer stored into object headers.
    ClassPointer(ClassId),
    /// The shared allocation cursor (non-TLH configurations).
    SharedAllocCursor,
}

/// One patch request: the instruction at `inst` loads `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationRecord {
    pub inst: usize,
    pub kind: RelocKind,
}

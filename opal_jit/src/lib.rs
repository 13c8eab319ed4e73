//! Inline fast-path code generation for the Opal JIT back end.
//!
//! For three hot runtime operations (object/array allocation, monitor
//! enter/exit, and GC write barriers on reference stores) this crate
//! emits a short mainline instruction sequence that handles the common
//! case without a runtime call, and splices in an outlined cold
//! sequence that falls back to a runtime helper when it does not hold.
//!
//! ```text
//! mainline:                      outlined (emitted after mainline):
//!   ...                          entry:
//!   cmp/test                       stash args in thread scratch slots
//!   jcc entry  ──────────────▶     call helper
//!   fast-path body                 jmp restart
//!   restart: ◀──────────────────────┘
//!   ...
//! ```
//!
//! Register state across the splice is reconciled through an explicit
//! dependency set attached to the restart (merge) label; a register
//! live on either incoming edge that is missing from the set is a
//! fatal compile-time defect, caught at [`CodeGenerator`] finalize.
//!
//! [`CodeGenerator`]: codegen::CodeGenerator

pub mod backend;
pub mod codegen;
pub mod config;
pub mod deps;
pub mod emit;
pub mod error;
pub mod inst;
pub mod refmap;
pub mod reloc;
pub mod stream;

pub use codegen::{CodeGenerator, EmitOutcome, FastPathOp};
pub use config::CodegenConfig;
pub use emit::alloc::{AllocationKind, AllocationRequest, ArrayLength};
pub use emit::barrier::{ReferenceStoreRequest, StoreValue};
pub use emit::monitor::MonitorRequest;
pub use error::{CodegenError, ConfigError};
pub use inst::{Cond, Inst, Label, Vreg, Width};
pub use refmap::RefMap;
pub use reloc::{RelocKind, RelocationRecord};
pub use stream::Program;

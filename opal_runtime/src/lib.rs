//! Object-model facts consumed by the Opal JIT fast-path emitters.
//!
//! This crate is the "layout oracle" side of the compiler: it answers
//! pure queries about the managed object model (header layout, lock-word
//! bit fields, array length encodings, thread context block offsets,
//! heap geometry, GC barrier policy) and defines the runtime helper
//! catalogue that slow paths call into. It emits no code and mutates no
//! VM state; everything here is fixed for the duration of one
//! compilation.

pub mod cardtable;
pub mod heap;
pub mod helpers;
pub mod layout;
pub mod lockword;
pub mod thread;

pub use cardtable::CardTable;
pub use heap::{AddressQuery, BarrierMode, HeapGeometry};
pub use helpers::{HelperArgs, RuntimeHelper};
pub use layout::{ArrayShape, ClassId, ClassInfo, LayoutError, ObjectLayout};
pub use lockword::LockWordLayout;
pub use thread::{ThreadLayout, VmThread};

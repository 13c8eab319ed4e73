//! x64 target support.

pub mod registers;

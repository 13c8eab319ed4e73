//! Target-specific register definitions and conventions.

pub mod x64;

//! The per-thread context block addressed by generated code.
//!
//! Every fast path addresses thread-local state through a dedicated
//! thread register plus a fixed byte offset. The offsets are derived
//! from the `#[repr(C)]` struct itself with `mem::offset_of!`, so the
//! struct definition is the single source of truth for the layout the
//! emitters bake into code.

use std::mem;

// =============================================================================
// VmThread
// =============================================================================

/// The thread context block.
///
/// The first two fields are the thread-local heap (TLH) bump cursor and
/// limit; they belong exclusively to the owning thread, so the fast
/// allocation path updates them without atomics.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct VmThread {
    /// Next free address in the thread-local heap cache.
    pub alloc_ptr: u64,
    /// One past the last usable address of the cache.
    pub alloc_limit: u64,
    /// The value compared against lock-word owner bits. 256-aligned so
    /// it occupies only the owner field.
    pub thread_id: u64,
    /// Diagnostics counter: monitors currently held by this thread.
    /// Adjusted on every successful fast-path acquire/release; helper
    /// paths do their own accounting.
    pub owned_monitor_count: u64,
    /// First fixed scratch slot of the helper-call ABI.
    pub helper_arg0: u64,
    /// Second fixed scratch slot of the helper-call ABI.
    pub helper_arg1: u64,
    /// Nonzero while the collector's concurrent mark phase is running;
    /// gates the inline card mark.
    pub concurrent_mark_active: u64,
    /// Thread-local copy of the new-space lower bound.
    pub nursery_base: u64,
    /// Thread-local copy of the new-space upper bound.
    pub nursery_top: u64,
}

impl VmThread {
    pub fn new(thread_id: u64) -> Self {
        VmThread {
            alloc_ptr: 0,
            alloc_limit: 0,
            thread_id,
            owned_monitor_count: 0,
            helper_arg0: 0,
            helper_arg1: 0,
            concurrent_mark_active: 0,
            nursery_base: 0,
            nursery_top: 0,
        }
    }
}

// =============================================================================
// ThreadLayout
// =============================================================================

/// Byte offsets of the `VmThread` fields, as baked into generated code.
#[derive(Debug, Clone, Copy)]
pub struct ThreadLayout {
    pub alloc_ptr: i32,
    pub alloc_limit: i32,
    pub thread_id: i32,
    pub owned_monitor_count: i32,
    pub helper_arg0: i32,
    pub helper_arg1: i32,
    pub concurrent_mark_active: i32,
    pub nursery_base: i32,
    pub nursery_top: i32,
}

impl ThreadLayout {
    pub const fn new() -> Self {
        ThreadLayout {
            alloc_ptr: mem::offset_of!(VmThread, alloc_ptr) as i32,
            alloc_limit: mem::offset_of!(VmThread, alloc_limit) as i32,
            thread_id: mem::offset_of!(VmThread, thread_id) as i32,
            owned_monitor_count: mem::offset_of!(VmThread, owned_monitor_count) as i32,
            helper_arg0: mem::offset_of!(VmThread, helper_arg0) as i32,
            helper_arg1: mem::offset_of!(VmThread, helper_arg1) as i32,
            concurrent_mark_active: mem::offset_of!(VmThread, concurrent_mark_active) as i32,
            nursery_base: mem::offset_of!(VmThread, nursery_base) as i32,
            nursery_top: mem::offset_of!(VmThread, nursery_top) as i32,
        }
    }
}

impl Default for ThreadLayout {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

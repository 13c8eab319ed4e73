//! The runtime helper catalogue.
//!
//! Every slow path ends in a call to one of these helpers. The calling
//! convention is a hard wire contract: arguments travel in the fixed
//! thread-local scratch slots (`VmThread::helper_arg0/1`), not in
//! ordinary argument registers, so a helper call can be spliced into a
//! fast path without disturbing the surrounding register allocation.
//! Results, when any, come back in the conventional return register.

// =============================================================================
// RuntimeHelper
// =============================================================================

/// Identifiers of the slow-path runtime routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeHelper {
    /// arg0 = class pointer. May trigger a GC; returns a valid object
    /// or raises out-of-memory at the VM level.
    AllocateObject,
    /// arg0 = class pointer, arg1 = element count.
    AllocateArray,
    /// arg0 = object. May block.
    MonitorEnter,
    /// arg0 = object. Runs the de-reservation protocol on contention.
    MonitorEnterReserved,
    /// arg0 = object. Raises illegal-monitor-state for underflow.
    MonitorExit,
    /// arg0 = destination object, arg1 = stored value.
    WriteBarrierStore,
    /// arg0 = first slot, arg1 = slot count.
    WriteBarrierBatch,
}

/// How many scratch-slot arguments a helper consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperArgs {
    One,
    Two,
}

impl HelperArgs {
    #[inline]
    pub const fn count(self) -> usize {
        match self {
            HelperArgs::One => 1,
            HelperArgs::Two => 2,
        }
    }
}

impl RuntimeHelper {
    /// Scratch-slot argument arity. Fixed per helper; the emitters must
    /// fill exactly these slots before the call.
    pub fn args(self) -> HelperArgs {
        match self {
            RuntimeHelper::MonitorEnter
            | RuntimeHelper::MonitorEnterReserved
            | RuntimeHelper::MonitorExit
            | RuntimeHelper::AllocateObject => HelperArgs::One,
            RuntimeHelper::AllocateArray
            | RuntimeHelper::WriteBarrierStore
            | RuntimeHelper::WriteBarrierBatch => HelperArgs::Two,
        }
    }

    /// Whether the helper produces a value.
    pub fn returns_value(self) -> bool {
        matches!(
            self,
            RuntimeHelper::AllocateObject | RuntimeHelper::AllocateArray
        )
    }

    /// Whether a GC can move references while this helper runs; calls
    /// to such helpers need reference-map metadata.
    pub fn may_gc(self) -> bool {
        matches!(
            self,
            RuntimeHelper::AllocateObject
                | RuntimeHelper::AllocateArray
                | RuntimeHelper::MonitorEnter
                | RuntimeHelper::MonitorEnterReserved
        )
    }
}

//! Code-generation error taxonomy.
//!
//! Two kinds of failure exist at compile time: configuration rejected
//! up front (`ConfigError`), and internal-consistency defects surfaced
//! during emission or finalize (`CodegenError`). Runtime "fast path
//! inapplicable" conditions are never errors; they are branches to the
//! slow path.

use crate::inst::{Label, Vreg};

// =============================================================================
// ConfigError
// =============================================================================

/// Invalid per-compilation configuration, rejected at
/// `CodeGenerator::new` before any emission happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Pre-zeroed memory is a property of the thread-local cache; the
    /// shared-cursor CAS shape cannot promise it.
    PrezeroRequiresTlh,
    /// Lock reservation is disabled under real-time size-class
    /// allocation policies.
    ReservationWithRealtime,
    /// A real-time size-class limit of zero would reject everything.
    ZeroSizeClassLimit,
    /// The shared-cursor shape was requested but the heap geometry has
    /// no shared cursor address.
    MissingSharedCursor,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::PrezeroRequiresTlh => {
                write!(f, "pre-zeroed allocation requires the thread-local heap shape")
            }
            ConfigError::ReservationWithRealtime => {
                write!(f, "lock reservation cannot be combined with real-time size classes")
            }
            ConfigError::ZeroSizeClassLimit => {
                write!(f, "real-time size-class limit must be nonzero")
            }
            ConfigError::MissingSharedCursor => {
                write!(f, "shared-cursor allocation requested but no cursor address supplied")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// CodegenError
// =============================================================================

/// Fatal defects detected while emitting or finalizing a fast path.
///
/// Each of these aborts code generation for the node; the caller's
/// universal recovery is the helper-only shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// An allocation shape the inline path does not support, e.g. more
    /// than one variable dimension.
    UnsupportedAllocation(&'static str),
    /// The same virtual register was added to a merge dependency set
    /// with two different fixed physical assignments.
    ConflictingDependency { vreg: Vreg },
    /// A register live across the splice is missing from the merge
    /// label's dependency set. Left undetected this would let register
    /// allocation silently assign conflicting locations.
    MissingMergeDependency { label: Label, vreg: Vreg },
    /// A merge dependency is pinned to a physical register that a
    /// helper call in the outlined sequence clobbers.
    ClobberedMergeDependency { label: Label, vreg: Vreg },
    /// `finalize` was called with an outlined region still open.
    OutlinedStillOpen,
    /// Outlined regions do not nest.
    NestedOutlined,
    /// A label was bound more than once.
    DuplicateLabel(Label),
    /// A branch targets a label that was never bound.
    UnboundLabel(Label),
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::UnsupportedAllocation(what) => {
                write!(f, "unsupported inline allocation: {}", what)
            }
            CodegenError::ConflictingDependency { vreg } => {
                write!(f, "conflicting fixed assignments for {} in merge dependency set", vreg)
            }
            CodegenError::MissingMergeDependency { label, vreg } => {
                write!(f, "{} is live across the splice at {} but missing from its dependency set", vreg, label)
            }
            CodegenError::ClobberedMergeDependency { label, vreg } => {
                write!(f, "{} at {} is pinned to a register its helper call clobbers", vreg, label)
            }
            CodegenError::OutlinedStillOpen => {
                write!(f, "finalize with an outlined region still open")
            }
            CodegenError::NestedOutlined => write!(f, "outlined regions do not nest"),
            CodegenError::DuplicateLabel(label) => write!(f, "{} bound twice", label),
            CodegenError::UnboundLabel(label) => write!(f, "branch to unbound {}", label),
        }
    }
}

impl std::error::Error for CodegenError {}

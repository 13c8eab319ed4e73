//! Merge-label register dependency sets.
//!
//! When an outlined cold sequence rejoins the mainline, two instruction
//! streams meet at one label. Register allocation treats the splice as
//! reachable from a single place only because every virtual register
//! live on either incoming edge is listed, exactly once, in the merge
//! label's dependency set with a physical constraint consistent on both
//! edges. Building that set is the emitters' job; this module makes it
//! an explicit, testable structure instead of a side channel.

use crate::backend::x64::registers::Gpr;
use crate::error::CodegenError;
use crate::inst::Vreg;
use smallvec::SmallVec;

// =============================================================================
// Constraint
// =============================================================================

/// Physical placement requirement for one register at a merge point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Any physical register, as long as both edges agree.
    Any,
    /// Pinned to a specific physical register (helper ABI, thread
    /// register conventions).
    Fixed(Gpr),
}

// =============================================================================
// DependencySet
// =============================================================================

/// Ordered, deduplicated `(vreg, constraint)` list for one merge label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencySet {
    entries: SmallVec<[(Vreg, Constraint); 8]>,
}

impl DependencySet {
    pub fn new() -> Self {
        DependencySet::default()
    }

    /// Add a dependency. Re-adding the same register is allowed and
    /// tightens `Any` to a fixed constraint when one side demands it;
    /// two different fixed constraints for one register are a fatal
    /// internal-consistency defect.
    pub fn add(&mut self, vreg: Vreg, constraint: Constraint) -> Result<(), CodegenError> {
        for (existing, slot) in self.entries.iter_mut() {
            if *existing != vreg {
                continue;
            }
            match (*slot, constraint) {
                (Constraint::Any, c) => *slot = c,
                (_, Constraint::Any) => {}
                (Constraint::Fixed(a), Constraint::Fixed(b)) if a == b => {}
                _ => return Err(CodegenError::ConflictingDependency { vreg }),
            }
            return Ok(());
        }
        self.entries.push((vreg, constraint));
        Ok(())
    }

    #[inline]
    pub fn contains(&self, vreg: Vreg) -> bool {
        self.entries.iter().any(|(v, _)| *v == vreg)
    }

    #[inline]
    pub fn constraint(&self, vreg: Vreg) -> Option<Constraint> {
        self.entries
            .iter()
            .find(|(v, _)| *v == vreg)
            .map(|(_, c)| *c)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Vreg, Constraint)> + '_ {
        self.entries.iter().copied()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Live-reference maps for helper call sites.
//!
//! Every instruction that may be the last one executed before a runtime
//! helper can observe or move live references carries a map of which
//! virtual registers hold object references at that point; the
//! collector's stack scan consumes it. Sorted and deduplicated so maps
//! compare structurally.

use crate::inst::Vreg;
use smallvec::SmallVec;

/// The set of reference-holding virtual registers at one call site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefMap {
    vregs: SmallVec<[Vreg; 4]>,
}

impl RefMap {
    pub fn new() -> Self {
        RefMap::default()
    }

    /// Add a reference-holding register. Idempotent.
    pub fn add(&mut self, vreg: Vreg) {
        if let Err(pos) = self.vregs.binary_search(&vreg) {
            self.vregs.insert(pos, vreg);
        }
    }

    #[inline]
    pub fn contains(&self, vreg: Vreg) -> bool {
        self.vregs.binary_search(&vreg).is_ok()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vregs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vregs.is_empty()
    }

    /// Registers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Vreg> + '_ {
        self.vregs.iter().copied()
    }
}

impl FromIterator<Vreg> for RefMap {
    fn from_iter<T: IntoIterator<Item = Vreg>>(iter: T) -> Self {
        let mut map = RefMap::new();
        for vreg in iter {
            map.add(vreg);
        }
        map
    }
}

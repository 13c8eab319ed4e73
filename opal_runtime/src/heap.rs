//! Heap geometry and GC barrier policy, fixed per compilation.

use crate::cardtable;

// =============================================================================
// AddressQuery
// =============================================================================

/// An address-valued oracle answer.
///
/// Layout constants come in two flavors: known at compile time, or
/// resolved later through a relocation record attached to the
/// instruction that loads them (ahead-of-time compilation defers final
/// address resolution). The emitters branch their emission strategy on
/// this distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressQuery {
    /// Bake the value into the instruction stream.
    Const(u64),
    /// Emit a patchable load and record a relocation request.
    NeedsPatch,
}

// =============================================================================
// BarrierMode
// =============================================================================

/// Which write-barrier shape the active collector requires.
///
/// Exactly one mode is active for a whole compiled method; it is not a
/// per-call-site choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierMode {
    /// No barrier; the plain store is complete.
    None,
    /// Every reference store calls the barrier helper.
    Always,
    /// Generational: only old-space objects not yet remembered need the
    /// helper.
    OldCheck,
    /// Unconditional inline card dirty.
    CardMark,
    /// Old-space check gating an inline card dirty plus remembered-set
    /// bookkeeping.
    CardMarkAndOldCheck,
    /// Inline card dirty, unless the concurrent mark phase is active,
    /// in which case the helper does the dirtying and the mark-phase
    /// bookkeeping together.
    CardMarkIncremental,
}

impl BarrierMode {
    /// Modes whose inline portion writes the card table.
    #[inline]
    pub fn marks_cards(self) -> bool {
        matches!(
            self,
            BarrierMode::CardMark
                | BarrierMode::CardMarkAndOldCheck
                | BarrierMode::CardMarkIncremental
        )
    }
}

// =============================================================================
// HeapGeometry
// =============================================================================

/// Heap facts the emitters fold into generated code.
#[derive(Debug, Clone)]
pub struct HeapGeometry {
    /// Base address subtracted before the card-shift.
    pub heap_base: AddressQuery,
    /// Address of card byte zero.
    pub card_table_base: AddressQuery,
    /// Log2 of the card size.
    pub card_shift: u32,
    /// Whether the thread-local heap hands out pre-zeroed memory, in
    /// which case explicit zero-initialization is elided.
    pub tlh_prezeroed: bool,
    /// Address of the shared bump cursor, for configurations without
    /// thread-local caching. The limit word lives directly after it.
    pub shared_cursor: Option<AddressQuery>,
}

impl HeapGeometry {
    pub fn standard() -> Self {
        HeapGeometry {
            heap_base: AddressQuery::NeedsPatch,
            card_table_base: AddressQuery::NeedsPatch,
            card_shift: cardtable::CARD_SHIFT,
            tlh_prezeroed: false,
            shared_cursor: None,
        }
    }
}

//! Lock word bit layout and transition arithmetic.
//!
//! The lock word is one machine word in the object header encoding the
//! monitor state:
//!
//! ```text
//! 63                                8 7    4 3      2     1        0
//! ┌──────────────────────────────────┬──────┬────────┬─────┬──────────┐
//! │ owning thread id (256-aligned)   │count │reserved│ flc │ inflated │
//! └──────────────────────────────────┴──────┴────────┴─────┴──────────┘
//! ```
//!
//! - `inflated` set: the word is a pointer-like token for a heavyweight
//!   monitor; no fast path applies.
//! - `flc` (flat lock contention): a contending thread requested a
//!   wakeup; the release fast path must not simply store zero.
//! - `reserved`: the lock is reserved for the owning thread; with a
//!   recursion count of zero the lock is *reserved but not held* and
//!   can be re-acquired without an atomic operation.
//! - `count`: recursion count. In the plain policy, count 0 means held
//!   once; in the reservation policy count 0 means reserved-not-held
//!   and count N means held N times.
//!
//! All the operations here are pure word arithmetic so the emitters'
//! masking decisions can be tested without running generated code.

// =============================================================================
// LockWordLayout
// =============================================================================

/// Bit layout of the lock word, plus the derived comparison masks the
/// fast paths use.
#[derive(Debug, Clone, Copy)]
pub struct LockWordLayout {
    _private: (),
}

impl LockWordLayout {
    /// The inflated (heavyweight monitor) bit.
    pub const INFLATED: u64 = 0x1;
    /// The flat-lock-contention bit.
    pub const FLC: u64 = 0x2;
    /// The reservation bit.
    pub const RESERVED: u64 = 0x4;
    /// Position of the recursion count field.
    pub const RECURSION_OFFSET: u32 = 4;
    /// Mask of the recursion count field.
    pub const RECURSION_MASK: u64 = 0xF0;
    /// One recursion increment.
    pub const RECURSION_INC: u64 = 1 << Self::RECURSION_OFFSET;
    /// All non-owner bits.
    pub const LOW_BITS: u64 = 0xFF;

    pub const fn new() -> Self {
        LockWordLayout { _private: () }
    }

    /// Thread ids live in the owner field, so they must be clear in the
    /// low bits.
    #[inline]
    pub const fn valid_thread_id(self, tid: u64) -> bool {
        tid != 0 && tid & Self::LOW_BITS == 0
    }

    /// Word for "held once, non-recursively, by `tid`" (plain policy).
    #[inline]
    pub const fn owned_word(self, tid: u64) -> u64 {
        tid
    }

    /// Word for "reserved for `tid`, not currently held".
    #[inline]
    pub const fn reserved_unheld_word(self, tid: u64) -> u64 {
        tid | Self::RESERVED
    }

    /// Word for "reserved for `tid` and held once".
    #[inline]
    pub const fn reserved_held_word(self, tid: u64) -> u64 {
        tid | Self::RESERVED | Self::RECURSION_INC
    }

    #[inline]
    pub const fn owner_of(self, word: u64) -> u64 {
        word & !Self::LOW_BITS
    }

    #[inline]
    pub const fn recursion_count(self, word: u64) -> u64 {
        (word & Self::RECURSION_MASK) >> Self::RECURSION_OFFSET
    }

    #[inline]
    pub const fn is_inflated(self, word: u64) -> bool {
        word & Self::INFLATED != 0
    }

    #[inline]
    pub const fn is_reserved(self, word: u64) -> bool {
        word & Self::RESERVED != 0
    }

    #[inline]
    pub const fn is_contended(self, word: u64) -> bool {
        word & Self::FLC != 0
    }

    /// Mask applied before the owner comparison on the enter fast path:
    /// the count and contention bits may vary, the inflated and
    /// reserved bits must not.
    #[inline]
    pub const fn enter_comparison_mask(self) -> u64 {
        !(Self::RECURSION_MASK | Self::FLC)
    }

    /// Mask applied before the owner comparison on the plain exit fast
    /// path. Contention must divert to the helper, so FLC stays in the
    /// compared bits.
    #[inline]
    pub const fn exit_comparison_mask(self) -> u64 {
        !Self::RECURSION_MASK
    }

    /// True when `word` encodes ownership by `tid` under the enter
    /// mask (recursion and contention ignored).
    #[inline]
    pub const fn owned_by(self, word: u64, tid: u64) -> bool {
        word & self.enter_comparison_mask() == tid
    }

    /// True when `word` encodes reservation (held or not) for `tid`.
    #[inline]
    pub const fn reserved_by(self, word: u64, tid: u64) -> bool {
        word & self.enter_comparison_mask() == tid | Self::RESERVED
    }

    /// The recursion count field is at its maximum representable value;
    /// one more acquisition must go to the helper instead of wrapping.
    #[inline]
    pub const fn recursion_saturated(self, word: u64) -> bool {
        word & Self::RECURSION_MASK == Self::RECURSION_MASK
    }

    #[inline]
    pub const fn increment(self, word: u64) -> u64 {
        word + Self::RECURSION_INC
    }

    #[inline]
    pub const fn decrement(self, word: u64) -> u64 {
        word - Self::RECURSION_INC
    }
}

impl Default for LockWordLayout {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Card table for generational write-barrier bookkeeping.
//!
//! One byte per 512-byte heap card. The emitted barrier dirties a card
//! with a plain byte store; the only ordering requirement is that the
//! dirty byte becomes visible before the next collection cycle scans
//! the table, so relaxed atomics are sufficient on both sides.

use std::sync::atomic::{AtomicU8, Ordering};

/// Log2 of the card size.
pub const CARD_SHIFT: u32 = 9;

/// Card size in bytes.
pub const CARD_SIZE: usize = 1 << CARD_SHIFT;

/// The byte the barrier stores; any nonzero value means dirty.
pub const CARD_DIRTY: u8 = 0x01;

// =============================================================================
// CardTable
// =============================================================================

/// Byte-per-card table covering one heap range.
#[derive(Debug)]
pub struct CardTable {
    cards: Box<[AtomicU8]>,
    heap_base: u64,
}

impl CardTable {
    pub fn new(heap_base: u64, heap_size: usize) -> Self {
        let count = heap_size.div_ceil(CARD_SIZE);
        let cards: Vec<AtomicU8> = (0..count).map(|_| AtomicU8::new(0)).collect();
        CardTable {
            cards: cards.into_boxed_slice(),
            heap_base,
        }
    }

    /// Address of card byte zero, the base the emitted barrier indexes
    /// from.
    #[inline]
    pub fn base_address(&self) -> u64 {
        self.cards.as_ptr() as u64
    }

    #[inline]
    pub fn heap_base(&self) -> u64 {
        self.heap_base
    }

    #[inline]
    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    /// Card index covering a heap address, if in range.
    #[inline]
    pub fn card_index(&self, addr: u64) -> Option<usize> {
        if addr < self.heap_base {
            return None;
        }
        let index = ((addr - self.heap_base) >> CARD_SHIFT) as usize;
        (index < self.cards.len()).then_some(index)
    }

    /// Runtime-side mirror of the emitted barrier sequence.
    #[inline]
    pub fn mark_dirty(&self, addr: u64) {
        if let Some(index) = self.card_index(addr) {
            self.cards[index].store(CARD_DIRTY, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn is_dirty(&self, index: usize) -> bool {
        self.cards
            .get(index)
            .is_some_and(|c| c.load(Ordering::Relaxed) != 0)
    }

    /// Clean every card; done by the collector after a card scan.
    pub fn clear_all(&self) {
        for card in self.cards.iter() {
            card.store(0, Ordering::Relaxed);
        }
    }

    /// Indices of dirty cards, in address order.
    pub fn dirty_card_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.cards
            .iter()
            .enumerate()
            .filter(|(_, c)| c.load(Ordering::Relaxed) != 0)
            .map(|(i, _)| i)
    }
}

// =============================================================================
// Tests
// =============================================================================

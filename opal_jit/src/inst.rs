//! The fast-path instruction repertoire.
//!
//! This is not a general ISA: it is the closed set of target-shaped
//! operations the three emitters need: thread-relative accesses, field
//! accesses, flag-setting compares, one compare-and-swap, branches and
//! helper calls. Instructions reference virtual registers; physical
//! assignment happens downstream, guided by the merge-label dependency
//! sets.
//!
//! All instructions for a compilation live in one indexable buffer (see
//! [`crate::stream`]); outlined regions are ranges appended after the
//! mainline, not separate lists threaded through side channels.

use crate::refmap::RefMap;
use crate::reloc::RelocKind;
use opal_runtime::RuntimeHelper;

// =============================================================================
// Virtual registers and labels
// =============================================================================

/// A virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vreg(u32);

impl Vreg {
    #[inline]
    pub const fn new(index: u32) -> Self {
        Vreg(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Vreg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A position in the instruction stream, resolved at finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    #[inline]
    pub const fn new(index: u32) -> Self {
        Label(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

// =============================================================================
// Conditions and widths
// =============================================================================

/// Branch conditions over the flags set by the last compare or CAS.
///
/// All magnitude comparisons are unsigned: addresses and lock words
/// have no sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    /// Strictly above.
    UnsignedGt,
    /// Above or equal.
    UnsignedGe,
    /// Strictly below.
    UnsignedLt,
    /// Below or equal.
    UnsignedLe,
}

/// Access width for memory operations. Length fields are 32-bit; lock
/// words, cursors and references are word-sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W32,
    W64,
}

// =============================================================================
// Inst
// =============================================================================

/// One abstract instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// Bind `label` at the current position.
    Bind(Label),

    /// `dst = [thread + offset]`
    LoadThread { dst: Vreg, offset: i32 },
    /// `[thread + offset] = src`
    StoreThread { offset: i32, src: Vreg },

    /// `dst = [base + offset]`
    Load {
        dst: Vreg,
        base: Vreg,
        offset: i32,
        width: Width,
    },
    /// `[base + offset] = src`
    Store {
        base: Vreg,
        offset: i32,
        src: Vreg,
        width: Width,
    },
    /// `[base + offset] = value`
    StoreImm {
        base: Vreg,
        offset: i32,
        value: i64,
        width: Width,
    },
    /// `byte [base + index] = value`, the card-dirty store.
    StoreByteIndexed { base: Vreg, index: Vreg, value: u8 },

    /// `dst = value`
    MovImm { dst: Vreg, value: i64 },
    /// `dst = <patched at load time>`; a relocation record points here.
    MovPatchable { dst: Vreg, kind: RelocKind },
    /// `dst = src`
    Mov { dst: Vreg, src: Vreg },

    /// `dst += src`
    Add { dst: Vreg, src: Vreg },
    /// `dst += imm`
    AddImm { dst: Vreg, imm: i64 },
    /// `dst -= src`
    Sub { dst: Vreg, src: Vreg },
    /// `dst -= imm`
    SubImm { dst: Vreg, imm: i64 },
    /// `dst &= imm`
    AndImm { dst: Vreg, imm: i64 },
    /// `dst |= imm`
    OrImm { dst: Vreg, imm: i64 },
    /// `dst <<= shift`
    ShlImm { dst: Vreg, shift: u8 },
    /// `dst >>= shift` (logical)
    ShrImm { dst: Vreg, shift: u8 },

    /// Set flags from `a - b` (unsigned).
    Cmp { a: Vreg, b: Vreg },
    /// Set flags from `a - imm` (unsigned).
    CmpImm { a: Vreg, imm: i64 },
    /// Set flags from `a - [thread + offset]`.
    CmpThread { a: Vreg, offset: i32 },

    /// Atomic compare-and-swap on `[base + offset]`: if the memory word
    /// equals `expected`, store `desired` and set Eq; otherwise load the
    /// observed value into `expected` and set Ne.
    Cas {
        base: Vreg,
        offset: i32,
        expected: Vreg,
        desired: Vreg,
        width: Width,
    },

    /// Conditional branch on the current flags.
    Branch { cond: Cond, target: Label },
    /// Unconditional jump.
    Jump { target: Label },

    /// Call a runtime helper. Arguments were already stashed in the
    /// thread scratch slots; `refs` is the live-reference map for the
    /// collector's stack scan.
    CallHelper {
        helper: RuntimeHelper,
        result: Option<Vreg>,
        refs: RefMap,
    },
}

impl Inst {
    /// Visit every virtual register this instruction reads.
    pub fn for_each_use(&self, mut f: impl FnMut(Vreg)) {
        match self {
            Inst::Bind(_)
            | Inst::LoadThread { .. }
            | Inst::MovImm { .. }
            | Inst::MovPatchable { .. }
            | Inst::Branch { .. }
            | Inst::Jump { .. } => {}
            Inst::StoreThread { src, .. } => f(*src),
            Inst::Load { base, .. } => f(*base),
            Inst::Store { base, src, .. } => {
                f(*base);
                f(*src);
            }
            Inst::StoreImm { base, .. } => f(*base),
            Inst::StoreByteIndexed { base, index, .. } => {
                f(*base);
                f(*index);
            }
            Inst::Mov { src, .. } => f(*src),
            Inst::Add { dst, src } | Inst::Sub { dst, src } => {
                f(*dst);
                f(*src);
            }
            Inst::AddImm { dst, .. }
            | Inst::SubImm { dst, .. }
            | Inst::AndImm { dst, .. }
            | Inst::OrImm { dst, .. }
            | Inst::ShlImm { dst, .. }
            | Inst::ShrImm { dst, .. } => f(*dst),
            Inst::Cmp { a, b } => {
                f(*a);
                f(*b);
            }
            Inst::CmpImm { a, .. } | Inst::CmpThread { a, .. } => f(*a),
            Inst::Cas {
                base,
                expected,
                desired,
                ..
            } => {
                f(*base);
                f(*expected);
                f(*desired);
            }
            Inst::CallHelper { refs, .. } => {
                for vreg in refs.iter() {
                    f(vreg);
                }
            }
        }
    }

    /// Visit every virtual register this instruction writes.
    pub fn for_each_def(&self, mut f: impl FnMut(Vreg)) {
        match self {
            Inst::LoadThread { dst, .. }
            | Inst::Load { dst, .. }
            | Inst::MovImm { dst, .. }
            | Inst::MovPatchable { dst, .. }
            | Inst::Mov { dst, .. }
            | Inst::Add { dst, .. }
            | Inst::AddImm { dst, .. }
            | Inst::Sub { dst, .. }
            | Inst::SubImm { dst, .. }
            | Inst::AndImm { dst, .. }
            | Inst::OrImm { dst, .. }
            | Inst::ShlImm { dst, .. }
            | Inst::ShrImm { dst, .. } => f(*dst),
            // CAS writes the observed value back into `expected` on the
            // failure edge.
            Inst::Cas { expected, .. } => f(*expected),
            Inst::CallHelper { result, .. } => {
                if let Some(dst) = result {
                    f(*dst);
                }
            }
            _ => {}
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! x64 register definitions and fast-path conventions.
//!
//! Physical registers appear in this crate only as fixed constraints in
//! merge-label dependency sets and in the helper clobber description;
//! actual assignment happens in the register allocator downstream.

use opal_runtime::RuntimeHelper;
use std::fmt;

// =============================================================================
// General-Purpose Registers (GPR)
// =============================================================================

/// x64 general-purpose register with hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// All 16 registers in encoding order.
    pub const ALL: [Gpr; 16] = [
        Gpr::Rax,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rbx,
        Gpr::Rsp,
        Gpr::Rbp,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];

    /// Hardware encoding (0-15).
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    /// Whether this is an extended register (R8-R15, REX-prefixed).
    #[inline(always)]
    pub const fn is_extended(self) -> bool {
        self.encoding() >= 8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Gpr::Rax => "rax",
            Gpr::Rcx => "rcx",
            Gpr::Rdx => "rdx",
            Gpr::Rbx => "rbx",
            Gpr::Rsp => "rsp",
            Gpr::Rbp => "rbp",
            Gpr::Rsi => "rsi",
            Gpr::Rdi => "rdi",
            Gpr::R8 => "r8",
            Gpr::R9 => "r9",
            Gpr::R10 => "r10",
            Gpr::R11 => "r11",
            Gpr::R12 => "r12",
            Gpr::R13 => "r13",
            Gpr::R14 => "r14",
            Gpr::R15 => "r15",
        }
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// GprSet
// =============================================================================

/// A set of GPRs as a 16-bit bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GprSet(u16);

impl GprSet {
    pub const EMPTY: GprSet = GprSet(0);

    pub const fn from_slice(regs: &[Gpr]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < regs.len() {
            bits |= 1 << regs[i].encoding();
            i += 1;
        }
        GprSet(bits)
    }

    #[inline]
    pub const fn contains(self, reg: Gpr) -> bool {
        self.0 & (1 << reg.encoding()) != 0
    }

    #[inline]
    pub const fn insert(self, reg: Gpr) -> Self {
        GprSet(self.0 | (1 << reg.encoding()))
    }

    #[inline]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(self) -> impl Iterator<Item = Gpr> {
        Gpr::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

// =============================================================================
// Fast-path conventions
// =============================================================================

/// The register holding the thread context block. Never allocatable and
/// never clobbered by helpers.
pub const THREAD_REG: Gpr = Gpr::R14;

/// Register in which value-returning helpers deliver their result.
pub const HELPER_RESULT_REG: Gpr = Gpr::Rax;

/// Caller-saved registers under the helper ABI.
const HELPER_VOLATILE: GprSet = GprSet::from_slice(&[
    Gpr::Rax,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R11,
]);

/// The fixed set of registers a helper is permitted to clobber. Part
/// of the wire contract: the splicer must treat these as dead across
/// the outlined call.
pub fn helper_clobbers(helper: RuntimeHelper) -> GprSet {
    match helper {
        // The barrier helpers are leaf-ish assembly stubs that preserve
        // everything except the scratch pair.
        RuntimeHelper::WriteBarrierStore | RuntimeHelper::WriteBarrierBatch => {
            GprSet::from_slice(&[Gpr::Rax, Gpr::R11])
        }
        _ => HELPER_VOLATILE,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_match_hardware_order() {
        for (i, reg) in Gpr::ALL.iter().enumerate() {
            assert_eq!(reg.encoding() as usize, i);
        }
        assert!(Gpr::R8.is_extended());
        assert!(!Gpr::Rdi.is_extended());
    }

    #[test]
    fn set_membership() {
        let set = GprSet::from_slice(&[Gpr::Rax, Gpr::R14]);
        assert!(set.contains(Gpr::Rax));
        assert!(set.contains(Gpr::R14));
        assert!(!set.contains(Gpr::Rcx));
        assert_eq!(set.count(), 2);
        let regs: Vec<Gpr> = set.iter().collect();
        assert_eq!(regs, vec![Gpr::Rax, Gpr::R14]);
    }

    #[test]
    fn thread_register_survives_every_helper() {
        for helper in [
            RuntimeHelper::AllocateObject,
            RuntimeHelper::AllocateArray,
            RuntimeHelper::MonitorEnter,
            RuntimeHelper::MonitorEnterReserved,
            RuntimeHelper::MonitorExit,
            RuntimeHelper::WriteBarrierStore,
            RuntimeHelper::WriteBarrierBatch,
        ] {
            assert!(!helper_clobbers(helper).contains(THREAD_REG));
        }
    }
}

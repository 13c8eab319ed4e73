//! The per-compilation instruction stream and the outlined-path
//! builder (splicer).
//!
//! All instructions are appended to one stream. An outlined region is
//! opened with an entry/restart label pair; while it is open, emission
//! is redirected into the region's own sequence. The mainline reaches
//! the region through a conditional branch to its entry label, and the
//! region always ends with an unconditional jump back to its restart
//! label, which coincides with a point in the mainline:
//!
//! ```text
//!   mainline ── jcc entry ──▶ [outlined body ... jmp restart]
//!      │                                             │
//!      └──────────── restart ◀───────────────────────┘
//! ```
//!
//! Outlined sequences are physically appended after all mainline
//! instructions at [`CodeStream::finalize`], which also enforces the
//! merge contract: every virtual register live across the splice must
//! appear in the restart label's dependency set. A violation is a
//! fatal compile-time defect; left undetected, downstream register
//! allocation would silently assign conflicting physical locations.

use crate::backend::x64::registers::helper_clobbers;
use crate::deps::{Constraint, DependencySet};
use crate::error::CodegenError;
use crate::inst::{Cond, Inst, Label, Vreg};
use crate::reloc::RelocationRecord;
use rustc_hash::{FxHashMap, FxHashSet};

// =============================================================================
// Outlined sequences
// =============================================================================

/// Handle for an open outlined region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlinedHandle(usize);

/// One cold sequence: entry label, restart (merge) label, body.
#[derive(Debug, Clone)]
pub struct OutlinedSequence {
    pub entry: Label,
    pub restart: Label,
    insts: Vec<Inst>,
}

impl OutlinedSequence {
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }
}

// =============================================================================
// CodeStream
// =============================================================================

/// Instruction stream under construction for one compilation unit.
#[derive(Debug, Default)]
pub struct CodeStream {
    mainline: Vec<Inst>,
    outlined: Vec<OutlinedSequence>,
    active: Option<usize>,
    merge_deps: FxHashMap<Label, DependencySet>,
    next_vreg: u32,
    next_label: u32,
}

impl CodeStream {
    pub fn new() -> Self {
        CodeStream::default()
    }

    pub fn new_vreg(&mut self) -> Vreg {
        let vreg = Vreg::new(self.next_vreg);
        self.next_vreg += 1;
        vreg
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label::new(self.next_label);
        self.next_label += 1;
        label
    }

    /// Append an instruction to the open outlined region, or to the
    /// mainline when none is open.
    pub fn emit(&mut self, inst: Inst) {
        match self.active {
            Some(idx) => self.outlined[idx].insts.push(inst),
            None => self.mainline.push(inst),
        }
    }

    /// Bind a label at the current position.
    pub fn bind(&mut self, label: Label) {
        self.emit(Inst::Bind(label));
    }

    /// Open an outlined region. Instructions emitted until
    /// [`end_outlined`](Self::end_outlined) are recorded against the
    /// region instead of the mainline.
    pub fn begin_outlined(
        &mut self,
        entry: Label,
        restart: Label,
    ) -> Result<OutlinedHandle, CodegenError> {
        if self.active.is_some() {
            return Err(CodegenError::NestedOutlined);
        }
        let idx = self.outlined.len();
        self.outlined.push(OutlinedSequence {
            entry,
            restart,
            insts: vec![Inst::Bind(entry)],
        });
        self.active = Some(idx);
        Ok(OutlinedHandle(idx))
    }

    /// Close an outlined region, appending its jump back to the merge
    /// point.
    pub fn end_outlined(&mut self, handle: OutlinedHandle) {
        debug_assert_eq!(self.active, Some(handle.0));
        let restart = self.outlined[handle.0].restart;
        self.outlined[handle.0].insts.push(Inst::Jump { target: restart });
        self.active = None;
    }

    /// Emit, at the current mainline position, the conditional branch
    /// into an outlined region.
    pub fn branch_to_outlined(&mut self, cond: Cond, entry: Label) {
        debug_assert!(self.active.is_none(), "branch into outlined from outlined");
        self.mainline.push(Inst::Branch {
            cond,
            target: entry,
        });
    }

    /// Record a register in a merge label's dependency set.
    pub fn add_merge_dep(
        &mut self,
        restart: Label,
        vreg: Vreg,
        constraint: Constraint,
    ) -> Result<(), CodegenError> {
        self.merge_deps.entry(restart).or_default().add(vreg, constraint)
    }

    pub fn merge_deps(&self, restart: Label) -> Option<&DependencySet> {
        self.merge_deps.get(&restart)
    }

    /// Lay out the final stream (mainline, then every outlined body),
    /// resolve labels, collect relocations, and enforce the merge
    /// contract.
    pub fn finalize(self) -> Result<Program, CodegenError> {
        if self.active.is_some() {
            return Err(CodegenError::OutlinedStillOpen);
        }

        for seq in &self.outlined {
            self.validate_merge(seq)?;
        }

        let mainline_len = self.mainline.len();
        let mut insts = self.mainline;
        let mut ranges = Vec::with_capacity(self.outlined.len());
        for seq in self.outlined {
            let start = insts.len();
            insts.extend(seq.insts);
            ranges.push(OutlinedRange {
                entry: seq.entry,
                restart: seq.restart,
                start,
                end: insts.len(),
            });
        }

        let mut label_offsets = FxHashMap::default();
        for (pos, inst) in insts.iter().enumerate() {
            if let Inst::Bind(label) = inst {
                if label_offsets.insert(*label, pos).is_some() {
                    return Err(CodegenError::DuplicateLabel(*label));
                }
            }
        }
        for inst in &insts {
            let target = match inst {
                Inst::Branch { target, .. } | Inst::Jump { target } => *target,
                _ => continue,
            };
            if !label_offsets.contains_key(&target) {
                return Err(CodegenError::UnboundLabel(target));
            }
        }

        let mut relocations = Vec::new();
        for (pos, inst) in insts.iter().enumerate() {
            if let Inst::MovPatchable { kind, .. } = inst {
                relocations.push(RelocationRecord { inst: pos, kind: *kind });
            }
        }

        Ok(Program {
            insts,
            mainline_len,
            outlined: ranges,
            label_offsets,
            merge_deps: self.merge_deps,
            relocations,
            vreg_count: self.next_vreg,
        })
    }

    /// The merge contract for one outlined sequence:
    ///
    /// 1. every register the sequence reads before defining locally
    ///    must be in the restart label's dependency set (it flows in
    ///    over the branch edge);
    /// 2. every register the sequence writes that the mainline reads at
    ///    or after the restart point must be in the set (it flows out
    ///    over the rejoin edge);
    /// 3. no dependency may be pinned to a physical register that a
    ///    helper call in the sequence clobbers, except the register the
    ///    call's own result arrives in.
    fn validate_merge(&self, seq: &OutlinedSequence) -> Result<(), CodegenError> {
        let empty = DependencySet::new();
        let deps = self.merge_deps.get(&seq.restart).unwrap_or(&empty);

        let mut defined: FxHashSet<Vreg> = FxHashSet::default();
        let mut seq_defs: FxHashSet<Vreg> = FxHashSet::default();
        let mut missing: Option<Vreg> = None;
        for inst in &seq.insts {
            inst.for_each_use(|v| {
                if !defined.contains(&v) && !deps.contains(v) && missing.is_none() {
                    missing = Some(v);
                }
            });
            inst.for_each_def(|v| {
                defined.insert(v);
                seq_defs.insert(v);
            });
        }
        if let Some(vreg) = missing {
            return Err(CodegenError::MissingMergeDependency {
                label: seq.restart,
                vreg,
            });
        }

        let restart_pos = self
            .mainline
            .iter()
            .position(|inst| matches!(inst, Inst::Bind(l) if *l == seq.restart));
        if let Some(pos) = restart_pos {
            let mut live_after: FxHashSet<Vreg> = FxHashSet::default();
            for inst in &self.mainline[pos..] {
                inst.for_each_use(|v| {
                    live_after.insert(v);
                });
            }
            for vreg in seq_defs {
                if live_after.contains(&vreg) && !deps.contains(vreg) {
                    return Err(CodegenError::MissingMergeDependency {
                        label: seq.restart,
                        vreg,
                    });
                }
            }
        }

        for inst in &seq.insts {
            let (helper, result) = match inst {
                Inst::CallHelper { helper, result, .. } => (*helper, *result),
                _ => continue,
            };
            let clobbers = helper_clobbers(helper);
            for (vreg, constraint) in deps.iter() {
                if result == Some(vreg) {
                    continue;
                }
                if let Constraint::Fixed(gpr) = constraint {
                    if clobbers.contains(gpr) {
                        return Err(CodegenError::ClobberedMergeDependency {
                            label: seq.restart,
                            vreg,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Program
// =============================================================================

/// Final position of one outlined body in the laid-out stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlinedRange {
    pub entry: Label,
    pub restart: Label,
    pub start: usize,
    pub end: usize,
}

/// A finalized fast-path program: mainline followed by its outlined
/// sequences, with labels resolved and metadata attached.
#[derive(Debug)]
pub struct Program {
    pub insts: Vec<Inst>,
    /// Execution falls off the end of the mainline; everything past
    /// this index is outlined cold code reached only by branch.
    pub mainline_len: usize,
    pub outlined: Vec<OutlinedRange>,
    pub label_offsets: FxHashMap<Label, usize>,
    pub merge_deps: FxHashMap<Label, DependencySet>,
    pub relocations: Vec<RelocationRecord>,
    pub vreg_count: u32,
}

impl Program {
    pub fn mainline(&self) -> &[Inst] {
        &self.insts[..self.mainline_len]
    }

    pub fn label_offset(&self, label: Label) -> usize {
        self.label_offsets[&label]
    }

    /// Count instructions matching a predicate, over the whole stream.
    pub fn count_insts(&self, pred: impl Fn(&Inst) -> bool) -> usize {
        self.insts.iter().filter(|i| pred(i)).count()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! GC write barriers on reference stores.
//!
//! The store itself is always emitted first; what follows is dictated
//! by the active collector's barrier mode, expressed as a short static
//! plan of checks and actions rather than a thicket of per-mode
//! special cases. Null stores create no inter-object reference and get
//! no barrier in any mode.
//!
//! Inline card marking computes `card_table[(object - heap_base) >>
//! card_shift] = DIRTY` with plain instructions; both base addresses
//! come from the layout oracle and may be patch-site values. The
//! generational checks consult the thread-local nursery bounds and the
//! remembered bit in the object header to skip helper calls that would
//! be no-ops.

use crate::deps::Constraint;
use crate::emit::{EmitCtx, EmitOutcome};
use crate::error::CodegenError;
use crate::inst::{Cond, Inst, Label, Vreg, Width};
use crate::refmap::RefMap;
use crate::reloc::RelocKind;
use opal_runtime::{cardtable, AddressQuery, BarrierMode, RuntimeHelper};

// =============================================================================
// Request types
// =============================================================================

/// The value side of a reference store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreValue {
    Null,
    Reference(Vreg),
}

/// One reference-store site: `[object + offset] = value`.
#[derive(Debug, Clone)]
pub struct ReferenceStoreRequest {
    pub object: Vreg,
    pub offset: i32,
    pub value: StoreValue,
    /// Reference-holding registers live across the slow-path call.
    pub live_refs: RefMap,
}

// =============================================================================
// Barrier plans
// =============================================================================

/// One step of a barrier sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierStep {
    /// Divert to the helper while the concurrent mark phase is active.
    ConcurrentMarkGate,
    /// Skip the rest of the barrier for nursery objects; only old
    /// objects need remembering.
    OldSpaceSkip,
    /// Skip the helper when the object's remembered bit is already set.
    RememberedSkipHelper,
    /// Dirty the destination object's card byte inline.
    InlineCardMark,
    /// End the sequence with a helper call.
    CallHelper,
}

/// The fixed check sequence for each mode.
pub fn barrier_plan(mode: BarrierMode) -> &'static [BarrierStep] {
    use BarrierStep::*;
    match mode {
        BarrierMode::None => &[],
        BarrierMode::Always => &[CallHelper],
        BarrierMode::OldCheck => &[OldSpaceSkip, RememberedSkipHelper, CallHelper],
        BarrierMode::CardMark => &[InlineCardMark],
        BarrierMode::CardMarkAndOldCheck => {
            &[OldSpaceSkip, InlineCardMark, RememberedSkipHelper, CallHelper]
        }
        BarrierMode::CardMarkIncremental => &[ConcurrentMarkGate, InlineCardMark],
    }
}

// =============================================================================
// Entry point
// =============================================================================

pub fn emit_reference_store(
    ctx: &mut EmitCtx<'_>,
    req: &ReferenceStoreRequest,
) -> Result<EmitOutcome, CodegenError> {
    match req.value {
        StoreValue::Null => {
            ctx.stream.emit(Inst::StoreImm {
                base: req.object,
                offset: req.offset,
                value: 0,
                width: Width::W64,
            });
            // No reference was created; every mode short-circuits.
            return Ok(EmitOutcome::Inlined { result: None });
        }
        StoreValue::Reference(value) => {
            ctx.stream.emit(Inst::Store {
                base: req.object,
                offset: req.offset,
                src: value,
                width: Width::W64,
            });
            emit_barrier(ctx, req, value)
        }
    }
}

fn emit_barrier(
    ctx: &mut EmitCtx<'_>,
    req: &ReferenceStoreRequest,
    value: Vreg,
) -> Result<EmitOutcome, CodegenError> {
    let plan = barrier_plan(ctx.config.barrier_mode);
    if plan.is_empty() {
        return Ok(EmitOutcome::Inlined { result: None });
    }

    // The Always mode has no inline portion at all; keep the call in
    // the mainline rather than manufacturing an unconditional splice.
    if plan == [BarrierStep::CallHelper] {
        emit_helper_call(ctx, req, value);
        return Ok(EmitOutcome::HelperOnly { result: None });
    }

    let needs_helper = plan
        .iter()
        .any(|s| matches!(s, BarrierStep::CallHelper | BarrierStep::ConcurrentMarkGate));
    let done = ctx.stream.new_label();
    let entry = ctx.stream.new_label();

    for step in plan {
        match step {
            BarrierStep::ConcurrentMarkGate => {
                let gate = ctx.stream.new_vreg();
                ctx.stream.emit(Inst::LoadThread {
                    dst: gate,
                    offset: ctx.thread.concurrent_mark_active,
                });
                ctx.stream.emit(Inst::CmpImm { a: gate, imm: 0 });
                ctx.stream.branch_to_outlined(Cond::Ne, entry);
            }
            BarrierStep::OldSpaceSkip => emit_old_space_skip(ctx, req.object, done),
            BarrierStep::RememberedSkipHelper => {
                if !ctx.config.check_remembered {
                    continue;
                }
                let flags = ctx.stream.new_vreg();
                ctx.stream.emit(Inst::Load {
                    dst: flags,
                    base: req.object,
                    offset: ctx.layout.flags_offset() as i32,
                    width: Width::W32,
                });
                ctx.stream.emit(Inst::AndImm {
                    dst: flags,
                    imm: ctx.layout.remembered_bit() as i64,
                });
                ctx.stream.emit(Inst::CmpImm { a: flags, imm: 0 });
                ctx.stream.emit(Inst::Branch {
                    cond: Cond::Ne,
                    target: done,
                });
            }
            BarrierStep::InlineCardMark => emit_card_mark(ctx, req.object),
            BarrierStep::CallHelper => {
                // Reached by fall-through on the path that needs it.
                ctx.stream.emit(Inst::Jump { target: entry });
            }
        }
    }
    ctx.stream.bind(done);

    if needs_helper {
        ctx.stream
            .add_merge_dep(done, req.object, Constraint::Any)?;
        ctx.stream.add_merge_dep(done, value, Constraint::Any)?;
        for vreg in req.live_refs.iter() {
            ctx.stream.add_merge_dep(done, vreg, Constraint::Any)?;
        }
        let handle = ctx.stream.begin_outlined(entry, done)?;
        emit_helper_call(ctx, req, value);
        ctx.stream.end_outlined(handle);
    }

    Ok(EmitOutcome::Inlined { result: None })
}

// =============================================================================
// Steps
// =============================================================================

/// Jump to `done` when the object sits in the nursery.
fn emit_old_space_skip(ctx: &mut EmitCtx<'_>, object: Vreg, done: Label) {
    let not_nursery = ctx.stream.new_label();
    ctx.stream.emit(Inst::CmpThread {
        a: object,
        offset: ctx.thread.nursery_base,
    });
    ctx.stream.emit(Inst::Branch {
        cond: Cond::UnsignedLt,
        target: not_nursery,
    });
    ctx.stream.emit(Inst::CmpThread {
        a: object,
        offset: ctx.thread.nursery_top,
    });
    ctx.stream.emit(Inst::Branch {
        cond: Cond::UnsignedLt,
        target: done,
    });
    ctx.stream.bind(not_nursery);
}

/// `card_table[(object - heap_base) >> card_shift] = DIRTY`
fn emit_card_mark(ctx: &mut EmitCtx<'_>, object: Vreg) {
    let index = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: index,
        src: object,
    });
    match ctx.heap.heap_base {
        AddressQuery::Const(base) => ctx.stream.emit(Inst::SubImm {
            dst: index,
            imm: base as i64,
        }),
        AddressQuery::NeedsPatch => {
            let base = ctx.materialize_address(AddressQuery::NeedsPatch, RelocKind::HeapBase);
            ctx.stream.emit(Inst::Sub {
                dst: index,
                src: base,
            });
        }
    }
    ctx.stream.emit(Inst::ShrImm {
        dst: index,
        shift: ctx.heap.card_shift as u8,
    });
    let table = ctx.materialize_address(ctx.heap.card_table_base, RelocKind::CardTableBase);
    ctx.stream.emit(Inst::StoreByteIndexed {
        base: table,
        index,
        value: cardtable::CARD_DIRTY,
    });
}

/// arg0 = destination object, arg1 = stored value.
fn emit_helper_call(ctx: &mut EmitCtx<'_>, req: &ReferenceStoreRequest, value: Vreg) {
    let mut refs = req.live_refs.clone();
    refs.add(req.object);
    refs.add(value);
    ctx.call_helper(
        RuntimeHelper::WriteBarrierStore,
        &[req.object, value],
        None,
        refs,
    );
}

// =============================================================================
// Tests
// =============================================================================

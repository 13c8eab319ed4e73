//! Monitor enter/exit fast paths over the flat lock word.
//!
//! Enter handles two cases inline: an unowned word acquired with a
//! single CAS, and a recursive acquisition by the current owner done
//! with a plain load/store pair (the word is already ours, nobody else
//! may write it). Exit mirrors it: a recursive release decrements with
//! a plain store, while the count-zero release CASes the word back to
//! zero, since a waiter can set the contention bit at any point after
//! our load and a plain store would wipe it out. Everything else,
//! inflated words, contention and a saturated recursion count, diverts
//! to the outlined helper call.
//!
//! Under the reservation policy a word reserved for the current thread
//! is re-acquired and released without any atomic operation at all;
//! the CAS appears only when claiming an unowned word, and the release
//! store puts back the reserved-not-held word instead of zero so the
//! reservation survives.
//!
//! The saturation test runs before the increment: a count at its
//! ceiling must divert to the helper rather than wrap into the flag
//! bits. The thread's owned-monitor diagnostic counter is adjusted on
//! the fast edges only; helpers do their own accounting.

use crate::deps::Constraint;
use crate::emit::{EmitCtx, EmitOutcome};
use crate::error::CodegenError;
use crate::inst::{Cond, Inst, Vreg, Width};
use crate::refmap::RefMap;
use opal_runtime::{ClassId, LockWordLayout, RuntimeHelper};

// =============================================================================
// Request type
// =============================================================================

/// One monitor operation site.
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    /// Register holding the object whose monitor is operated on.
    pub object: Vreg,
    pub class: ClassId,
    /// Reference-holding registers live across the slow-path call.
    pub live_refs: RefMap,
}

// =============================================================================
// Enter
// =============================================================================

pub fn emit_monitor_enter(
    ctx: &mut EmitCtx<'_>,
    req: &MonitorRequest,
) -> Result<EmitOutcome, CodegenError> {
    let info = ctx.layout.class(req.class).clone();
    let reserved = ctx.config.lock_reservation && info.reservable;
    let helper = if reserved {
        RuntimeHelper::MonitorEnterReserved
    } else {
        RuntimeHelper::MonitorEnter
    };
    let lock_offset = match info.lock_word_offset {
        Some(offset) if ctx.config.inline_monitors => offset as i32,
        _ => return Ok(emit_helper_only(ctx, req, helper)),
    };

    let entry = ctx.stream.new_label();
    let restart = ctx.stream.new_label();
    let acquired = ctx.stream.new_label();

    let tid = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::LoadThread {
        dst: tid,
        offset: ctx.thread.thread_id,
    });
    let word = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Load {
        dst: word,
        base: req.object,
        offset: lock_offset,
        width: Width::W64,
    });
    let masked = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: masked,
        src: word,
    });
    ctx.stream.emit(Inst::AndImm {
        dst: masked,
        imm: LockWordLayout::new().enter_comparison_mask() as i64,
    });

    if reserved {
        let res_tid = ctx.stream.new_vreg();
        ctx.stream.emit(Inst::Mov {
            dst: res_tid,
            src: tid,
        });
        ctx.stream.emit(Inst::OrImm {
            dst: res_tid,
            imm: LockWordLayout::RESERVED as i64,
        });

        // Reserved for us, held or not: bump the count, no atomics.
        let try_fresh = ctx.stream.new_label();
        ctx.stream.emit(Inst::Cmp {
            a: masked,
            b: res_tid,
        });
        ctx.stream.emit(Inst::Branch {
            cond: Cond::Ne,
            target: try_fresh,
        });
        emit_saturation_guard(ctx, word, entry);
        emit_count_step(ctx, req.object, lock_offset, word, Step::Increment);
        ctx.stream.emit(Inst::Jump { target: acquired });

        // Unowned word: claim it reserved-and-held in one CAS.
        ctx.stream.bind(try_fresh);
        ctx.stream.emit(Inst::CmpImm { a: word, imm: 0 });
        ctx.stream.branch_to_outlined(Cond::Ne, entry);
        let desired = ctx.stream.new_vreg();
        ctx.stream.emit(Inst::Mov {
            dst: desired,
            src: res_tid,
        });
        ctx.stream.emit(Inst::AddImm {
            dst: desired,
            imm: LockWordLayout::RECURSION_INC as i64,
        });
        emit_claim_cas(ctx, req.object, lock_offset, desired, entry);
    } else {
        // Free word: claim it with the owner id, count zero.
        let check_owned = ctx.stream.new_label();
        ctx.stream.emit(Inst::CmpImm { a: masked, imm: 0 });
        ctx.stream.emit(Inst::Branch {
            cond: Cond::Ne,
            target: check_owned,
        });
        emit_claim_cas(ctx, req.object, lock_offset, tid, entry);
        ctx.stream.emit(Inst::Jump { target: acquired });

        // Held: ours means recursive, anything else means helper.
        ctx.stream.bind(check_owned);
        ctx.stream.emit(Inst::Cmp { a: masked, b: tid });
        ctx.stream.branch_to_outlined(Cond::Ne, entry);
        emit_saturation_guard(ctx, word, entry);
        emit_count_step(ctx, req.object, lock_offset, word, Step::Increment);
    }

    ctx.stream.bind(acquired);
    emit_owned_count_adjust(ctx, 1);
    ctx.stream.bind(restart);

    emit_merge_and_outlined(ctx, req, helper, entry, restart)?;
    Ok(EmitOutcome::Inlined { result: None })
}

// =============================================================================
// Exit
// =============================================================================

pub fn emit_monitor_exit(
    ctx: &mut EmitCtx<'_>,
    req: &MonitorRequest,
) -> Result<EmitOutcome, CodegenError> {
    let info = ctx.layout.class(req.class).clone();
    let reserved = ctx.config.lock_reservation && info.reservable;
    let lock_offset = match info.lock_word_offset {
        Some(offset) if ctx.config.inline_monitors => offset as i32,
        _ => return Ok(emit_helper_only(ctx, req, RuntimeHelper::MonitorExit)),
    };

    let entry = ctx.stream.new_label();
    let restart = ctx.stream.new_label();
    let released = ctx.stream.new_label();
    let maybe_nested = ctx.stream.new_label();

    let tid = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::LoadThread {
        dst: tid,
        offset: ctx.thread.thread_id,
    });
    let word = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Load {
        dst: word,
        base: req.object,
        offset: lock_offset,
        width: Width::W64,
    });

    if reserved {
        let res_tid = ctx.stream.new_vreg();
        ctx.stream.emit(Inst::Mov {
            dst: res_tid,
            src: tid,
        });
        ctx.stream.emit(Inst::OrImm {
            dst: res_tid,
            imm: LockWordLayout::RESERVED as i64,
        });
        let held_once = ctx.stream.new_vreg();
        ctx.stream.emit(Inst::Mov {
            dst: held_once,
            src: res_tid,
        });
        ctx.stream.emit(Inst::AddImm {
            dst: held_once,
            imm: LockWordLayout::RECURSION_INC as i64,
        });

        // Held exactly once, clean: put back the reserved-not-held
        // word so the reservation survives the release.
        ctx.stream.emit(Inst::Cmp {
            a: word,
            b: held_once,
        });
        ctx.stream.emit(Inst::Branch {
            cond: Cond::Ne,
            target: maybe_nested,
        });
        ctx.stream.emit(Inst::Store {
            base: req.object,
            offset: lock_offset,
            src: res_tid,
            width: Width::W64,
        });
        ctx.stream.emit(Inst::Jump { target: released });

        ctx.stream.bind(maybe_nested);
        let masked = emit_exit_mask(ctx, word);
        ctx.stream.emit(Inst::Cmp {
            a: masked,
            b: res_tid,
        });
        ctx.stream.branch_to_outlined(Cond::Ne, entry);
        // Count zero here is reserved-not-held: an underflow the
        // helper must raise.
        ctx.stream.emit(Inst::Cmp { a: word, b: res_tid });
        ctx.stream.branch_to_outlined(Cond::Eq, entry);
        emit_count_step(ctx, req.object, lock_offset, word, Step::Decrement);
    } else {
        // Held exactly once: release with a CAS back to zero. A waiter
        // may set the contention bit between our load and the release;
        // a plain store would overwrite it and lose the wakeup, so a
        // failed CAS diverts to the helper instead.
        ctx.stream.emit(Inst::Cmp { a: word, b: tid });
        ctx.stream.emit(Inst::Branch {
            cond: Cond::Ne,
            target: maybe_nested,
        });
        emit_release_cas(ctx, req.object, lock_offset, tid, entry);
        ctx.stream.emit(Inst::Jump { target: released });

        // The exit mask keeps the contention bit visible, so a
        // contended word falls through to the helper here.
        ctx.stream.bind(maybe_nested);
        let masked = emit_exit_mask(ctx, word);
        ctx.stream.emit(Inst::Cmp { a: masked, b: tid });
        ctx.stream.branch_to_outlined(Cond::Ne, entry);
        emit_count_step(ctx, req.object, lock_offset, word, Step::Decrement);
    }

    ctx.stream.bind(released);
    emit_owned_count_adjust(ctx, -1);
    ctx.stream.bind(restart);

    emit_merge_and_outlined(ctx, req, RuntimeHelper::MonitorExit, entry, restart)?;
    Ok(EmitOutcome::Inlined { result: None })
}

// =============================================================================
// Shared pieces
// =============================================================================

enum Step {
    Increment,
    Decrement,
}

/// Divert to the helper when the recursion field is at its ceiling.
/// Must run before the increment: one more step would wrap into the
/// flag bits.
fn emit_saturation_guard(ctx: &mut EmitCtx<'_>, word: Vreg, entry: crate::inst::Label) {
    let count = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: count,
        src: word,
    });
    ctx.stream.emit(Inst::AndImm {
        dst: count,
        imm: LockWordLayout::RECURSION_MASK as i64,
    });
    ctx.stream.emit(Inst::CmpImm {
        a: count,
        imm: LockWordLayout::RECURSION_MASK as i64,
    });
    ctx.stream.branch_to_outlined(Cond::Eq, entry);
}

/// Plain load/store recursion count adjustment. Only valid when the
/// current thread owns the word.
fn emit_count_step(ctx: &mut EmitCtx<'_>, object: Vreg, lock_offset: i32, word: Vreg, step: Step) {
    let updated = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: updated,
        src: word,
    });
    let imm = LockWordLayout::RECURSION_INC as i64;
    match step {
        Step::Increment => ctx.stream.emit(Inst::AddImm { dst: updated, imm }),
        Step::Decrement => ctx.stream.emit(Inst::SubImm { dst: updated, imm }),
    }
    ctx.stream.emit(Inst::Store {
        base: object,
        offset: lock_offset,
        src: updated,
        width: Width::W64,
    });
}

/// CAS an unowned (zero) word to `desired`; failure means contention.
fn emit_claim_cas(
    ctx: &mut EmitCtx<'_>,
    object: Vreg,
    lock_offset: i32,
    desired: Vreg,
    entry: crate::inst::Label,
) {
    let expected = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::MovImm {
        dst: expected,
        value: 0,
    });
    ctx.stream.emit(Inst::Cas {
        base: object,
        offset: lock_offset,
        expected,
        desired,
        width: Width::W64,
    });
    ctx.stream.branch_to_outlined(Cond::Ne, entry);
}

/// CAS the owned-once word back to zero. Failure means the word changed
/// after our load, so the helper has to finish the release.
fn emit_release_cas(
    ctx: &mut EmitCtx<'_>,
    object: Vreg,
    lock_offset: i32,
    owned: Vreg,
    entry: crate::inst::Label,
) {
    let expected = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: expected,
        src: owned,
    });
    let zero = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::MovImm {
        dst: zero,
        value: 0,
    });
    ctx.stream.emit(Inst::Cas {
        base: object,
        offset: lock_offset,
        expected,
        desired: zero,
        width: Width::W64,
    });
    ctx.stream.branch_to_outlined(Cond::Ne, entry);
}

fn emit_exit_mask(ctx: &mut EmitCtx<'_>, word: Vreg) -> Vreg {
    let masked = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: masked,
        src: word,
    });
    ctx.stream.emit(Inst::AndImm {
        dst: masked,
        imm: LockWordLayout::new().exit_comparison_mask() as i64,
    });
    masked
}

fn emit_owned_count_adjust(ctx: &mut EmitCtx<'_>, delta: i64) {
    let count = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::LoadThread {
        dst: count,
        offset: ctx.thread.owned_monitor_count,
    });
    if delta >= 0 {
        ctx.stream.emit(Inst::AddImm {
            dst: count,
            imm: delta,
        });
    } else {
        ctx.stream.emit(Inst::SubImm {
            dst: count,
            imm: -delta,
        });
    }
    ctx.stream.emit(Inst::StoreThread {
        offset: ctx.thread.owned_monitor_count,
        src: count,
    });
}

/// Merge dependencies plus the outlined helper-call body.
fn emit_merge_and_outlined(
    ctx: &mut EmitCtx<'_>,
    req: &MonitorRequest,
    helper: RuntimeHelper,
    entry: crate::inst::Label,
    restart: crate::inst::Label,
) -> Result<(), CodegenError> {
    ctx.stream
        .add_merge_dep(restart, req.object, Constraint::Any)?;
    for vreg in req.live_refs.iter() {
        ctx.stream.add_merge_dep(restart, vreg, Constraint::Any)?;
    }

    let handle = ctx.stream.begin_outlined(entry, restart)?;
    let mut refs = req.live_refs.clone();
    refs.add(req.object);
    ctx.call_helper(helper, &[req.object], None, refs);
    ctx.stream.end_outlined(handle);
    Ok(())
}

/// No lock word or inline monitors disabled: straight helper call.
fn emit_helper_only(
    ctx: &mut EmitCtx<'_>,
    req: &MonitorRequest,
    helper: RuntimeHelper,
) -> EmitOutcome {
    let mut refs = req.live_refs.clone();
    refs.add(req.object);
    ctx.call_helper(helper, &[req.object], None, refs);
    EmitOutcome::HelperOnly { result: None }
}

// =============================================================================
// Tests
// =============================================================================

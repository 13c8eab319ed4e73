//! Inline allocation fast paths.
//!
//! The default shape is the thread-local heap (TLH) bump: load the
//! thread's cursor, add the rounded size, compare against the limit,
//! and commit with plain stores. The cache belongs to one thread, so
//! no atomics are needed. Configurations without thread-local caching
//! use a CAS retry loop on a shared cursor instead. Either way the
//! uncommon case branches to an outlined helper call that rejoins the
//! mainline after header initialization, with the new object in the
//! merge dependency set.
//!
//! Applicability is decided per request: unresolved classes, oversized
//! objects and over-limit element counts never get an inline path. A
//! compile-time rejection produces the helper-only shape, not an
//! error.

use crate::deps::Constraint;
use crate::emit::{EmitCtx, EmitOutcome};
use crate::error::CodegenError;
use crate::inst::{Cond, Inst, Vreg, Width};
use crate::refmap::RefMap;
use crate::reloc::RelocKind;
use opal_runtime::{AddressQuery, ClassId, ClassInfo, LockWordLayout, RuntimeHelper};
use smallvec::SmallVec;

// =============================================================================
// Request types
// =============================================================================

/// Element count of an array allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLength {
    /// Known at compile time.
    Const(u32),
    /// In a register; the emitter guards the range at runtime.
    Variable(Vreg),
}

/// What is being allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    Object,
    Array {
        element_size: usize,
        length: ArrayLength,
    },
}

/// One allocation site.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub class: ClassId,
    pub kind: AllocationKind,
    /// Whether the payload must be zeroed. Elided when the cache hands
    /// out pre-zeroed memory.
    pub zero_init: bool,
    /// Reference-holding registers live across the slow-path call.
    pub live_refs: RefMap,
}

/// Compile-time size, or a register computed from a variable length.
enum SizeSrc {
    Const(usize),
    Reg(Vreg),
}

// =============================================================================
// Entry point
// =============================================================================

pub fn emit_allocation(
    ctx: &mut EmitCtx<'_>,
    req: &AllocationRequest,
) -> Result<EmitOutcome, CodegenError> {
    let info = ctx.layout.class(req.class).clone();
    if let AllocationKind::Array { element_size, .. } = req.kind {
        if info.element_size != Some(element_size) {
            return Err(CodegenError::UnsupportedAllocation(
                "element size disagrees with class table",
            ));
        }
    }

    let limit = ctx
        .config
        .inline_size_limit(ctx.layout.max_inline_allocation_size());
    if !inline_applicable(ctx, req, &info, limit) {
        return Ok(emit_helper_only(ctx, req, &info));
    }

    let is_array = matches!(req.kind, AllocationKind::Array { .. });
    let entry = ctx.stream.new_label();
    let restart = ctx.stream.new_label();
    let result = ctx.stream.new_vreg();

    // Size computation, plus the element-count guard for variable
    // lengths. The guard doubles as the address-arithmetic overflow
    // check: any count that passes yields a size far below the wrap
    // threshold.
    let size_src = match req.kind {
        AllocationKind::Object => SizeSrc::Const(ctx.layout.rounded_size(info.instance_size)),
        AllocationKind::Array {
            element_size,
            length: ArrayLength::Const(len),
        } => SizeSrc::Const(ctx.layout.array_allocation_size(element_size, len as u64)),
        AllocationKind::Array {
            element_size,
            length: ArrayLength::Variable(len),
        } => {
            let max_len = max_inline_elements(ctx, element_size, limit);
            ctx.stream.emit(Inst::CmpImm {
                a: len,
                imm: max_len as i64,
            });
            ctx.stream.branch_to_outlined(Cond::UnsignedGt, entry);
            SizeSrc::Reg(compute_array_size(ctx, element_size, len))
        }
    };

    if ctx.config.shared_cursor_cas {
        emit_shared_cursor_bump(ctx, entry, result, &size_src);
    } else {
        emit_tlh_bump(ctx, entry, result, &size_src);
    }

    if req.zero_init && !ctx.heap.tlh_prezeroed {
        emit_zero_init(ctx, result, is_array, &size_src);
    }

    emit_header_init(ctx, req, &info, result);
    ctx.stream.bind(restart);

    ctx.stream.add_merge_dep(restart, result, Constraint::Any)?;
    if let AllocationKind::Array {
        length: ArrayLength::Variable(len),
        ..
    } = req.kind
    {
        ctx.stream.add_merge_dep(restart, len, Constraint::Any)?;
    }
    for vreg in req.live_refs.iter() {
        ctx.stream.add_merge_dep(restart, vreg, Constraint::Any)?;
    }

    // Outlined slow path: stash args in the thread scratch slots and
    // let the helper produce a fully initialized object.
    let handle = ctx.stream.begin_outlined(entry, restart)?;
    let (helper, args) = helper_and_args(ctx, req, &info);
    ctx.call_helper(helper, &args, Some(result), req.live_refs.clone());
    ctx.stream.end_outlined(handle);

    Ok(EmitOutcome::Inlined {
        result: Some(result),
    })
}

// =============================================================================
// Applicability
// =============================================================================

fn inline_applicable(
    ctx: &EmitCtx<'_>,
    req: &AllocationRequest,
    info: &ClassInfo,
    limit: usize,
) -> bool {
    if !ctx.config.inline_allocation || info.requires_resolution {
        return false;
    }
    match req.kind {
        AllocationKind::Object => {
            let size = ctx.layout.rounded_size(info.instance_size);
            size >= ctx.layout.header_size(false) && size <= limit
        }
        AllocationKind::Array {
            element_size,
            length: ArrayLength::Const(len),
        } => ctx.layout.array_allocation_size(element_size, len as u64) <= limit,
        AllocationKind::Array { .. } => {
            // Variable lengths get a runtime guard; the shape is viable
            // as long as the zero-length size fits.
            ctx.layout.array_allocation_size(1, 0) <= limit
        }
    }
}

/// Largest element count admitted by the runtime guard.
fn max_inline_elements(ctx: &EmitCtx<'_>, element_size: usize, limit: usize) -> u64 {
    let by_policy =
        (limit.saturating_sub(ctx.layout.header_size(true)) / element_size) as u64;
    by_policy.min(ctx.layout.max_inline_array_elements(element_size))
}

// =============================================================================
// Mainline pieces
// =============================================================================

/// `size = round(header + len * elem)`, clamped up to the discontiguous
/// header so a runtime length of zero still has room for both length
/// fields.
fn compute_array_size(ctx: &mut EmitCtx<'_>, element_size: usize, len: Vreg) -> Vreg {
    let align = ctx.layout.object_alignment();
    let header = ctx.layout.header_size(true);
    let size = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: size,
        src: len,
    });
    let shift = element_size.trailing_zeros() as u8;
    if shift > 0 {
        ctx.stream.emit(Inst::ShlImm { dst: size, shift });
    }
    ctx.stream.emit(Inst::AddImm {
        dst: size,
        imm: (header + align - 1) as i64,
    });
    ctx.stream.emit(Inst::AndImm {
        dst: size,
        imm: !(align as i64 - 1),
    });

    let floor = ctx.layout.rounded_size(ctx.layout.discontiguous_header_size());
    let big_enough = ctx.stream.new_label();
    ctx.stream.emit(Inst::CmpImm {
        a: size,
        imm: floor as i64,
    });
    ctx.stream.emit(Inst::Branch {
        cond: Cond::UnsignedGe,
        target: big_enough,
    });
    ctx.stream.emit(Inst::MovImm {
        dst: size,
        value: floor as i64,
    });
    ctx.stream.bind(big_enough);
    size
}

/// The TLH bump: cursor and limit are thread-private, so no atomics.
fn emit_tlh_bump(ctx: &mut EmitCtx<'_>, entry: crate::inst::Label, result: Vreg, size: &SizeSrc) {
    ctx.stream.emit(Inst::LoadThread {
        dst: result,
        offset: ctx.thread.alloc_ptr,
    });
    let new_cursor = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: new_cursor,
        src: result,
    });
    emit_add_size(ctx, new_cursor, size);
    ctx.stream.emit(Inst::CmpThread {
        a: new_cursor,
        offset: ctx.thread.alloc_limit,
    });
    ctx.stream.branch_to_outlined(Cond::UnsignedGt, entry);
    ctx.stream.emit(Inst::StoreThread {
        offset: ctx.thread.alloc_ptr,
        src: new_cursor,
    });
}

/// The shared-cursor shape: CAS retry loop against a global bump
/// cursor, with the limit word directly after it.
fn emit_shared_cursor_bump(
    ctx: &mut EmitCtx<'_>,
    entry: crate::inst::Label,
    result: Vreg,
    size: &SizeSrc,
) {
    let query = match ctx.heap.shared_cursor {
        Some(query) => query,
        // Unreachable after config validation; fall back to a constant
        // null so finalize still sees a well-formed stream.
        None => AddressQuery::Const(0),
    };
    let cursor_addr = ctx.materialize_address(query, RelocKind::SharedAllocCursor);
    let retry = ctx.stream.new_label();
    ctx.stream.bind(retry);
    ctx.stream.emit(Inst::Load {
        dst: result,
        base: cursor_addr,
        offset: 0,
        width: Width::W64,
    });
    let heap_limit = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Load {
        dst: heap_limit,
        base: cursor_addr,
        offset: 8,
        width: Width::W64,
    });
    let new_cursor = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: new_cursor,
        src: result,
    });
    emit_add_size(ctx, new_cursor, size);
    ctx.stream.emit(Inst::Cmp {
        a: new_cursor,
        b: heap_limit,
    });
    ctx.stream.branch_to_outlined(Cond::UnsignedGt, entry);
    // CAS writes the observed word into its expected register on
    // failure, so give it a scratch copy and keep `result` intact.
    let expected = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: expected,
        src: result,
    });
    ctx.stream.emit(Inst::Cas {
        base: cursor_addr,
        offset: 0,
        expected,
        desired: new_cursor,
        width: Width::W64,
    });
    ctx.stream.emit(Inst::Branch {
        cond: Cond::Ne,
        target: retry,
    });
}

fn emit_add_size(ctx: &mut EmitCtx<'_>, dst: Vreg, size: &SizeSrc) {
    match size {
        SizeSrc::Const(bytes) => ctx.stream.emit(Inst::AddImm {
            dst,
            imm: *bytes as i64,
        }),
        SizeSrc::Reg(reg) => ctx.stream.emit(Inst::Add { dst, src: *reg }),
    }
}

/// Zero the payload. Small fixed sizes unroll; everything else loops up
/// to the new cursor value, which is `result + size` by construction.
fn emit_zero_init(ctx: &mut EmitCtx<'_>, result: Vreg, is_array: bool, size: &SizeSrc) {
    let header = ctx.layout.header_size(is_array);
    if let SizeSrc::Const(bytes) = size {
        if bytes - header <= 64 {
            let mut offset = header;
            while offset < *bytes {
                ctx.stream.emit(Inst::StoreImm {
                    base: result,
                    offset: offset as i32,
                    value: 0,
                    width: Width::W64,
                });
                offset += 8;
            }
            return;
        }
    }

    let end = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: end,
        src: result,
    });
    emit_add_size(ctx, end, size);
    let ptr = ctx.stream.new_vreg();
    ctx.stream.emit(Inst::Mov {
        dst: ptr,
        src: result,
    });
    ctx.stream.emit(Inst::AddImm {
        dst: ptr,
        imm: header as i64,
    });
    let top = ctx.stream.new_label();
    let done = ctx.stream.new_label();
    ctx.stream.bind(top);
    ctx.stream.emit(Inst::Cmp { a: ptr, b: end });
    ctx.stream.emit(Inst::Branch {
        cond: Cond::UnsignedGe,
        target: done,
    });
    ctx.stream.emit(Inst::StoreImm {
        base: ptr,
        offset: 0,
        value: 0,
        width: Width::W64,
    });
    ctx.stream.emit(Inst::AddImm { dst: ptr, imm: 8 });
    ctx.stream.emit(Inst::Jump { target: top });
    ctx.stream.bind(done);
}

/// Class pointer, flags, lock word and, for arrays, the length fields.
fn emit_header_init(
    ctx: &mut EmitCtx<'_>,
    req: &AllocationRequest,
    info: &ClassInfo,
    result: Vreg,
) {
    let class_ptr =
        ctx.materialize_address(info.class_pointer, RelocKind::ClassPointer(req.class));
    ctx.stream.emit(Inst::Store {
        base: result,
        offset: ctx.layout.vft_offset() as i32,
        src: class_ptr,
        width: Width::W64,
    });
    ctx.stream.emit(Inst::StoreImm {
        base: result,
        offset: ctx.layout.flags_offset() as i32,
        value: 0,
        width: Width::W32,
    });

    if let Some(lock_offset) = info.lock_word_offset {
        if ctx.config.lock_reservation && info.reservable {
            // Pre-reserve the lock for the allocating thread.
            let word = ctx.stream.new_vreg();
            ctx.stream.emit(Inst::LoadThread {
                dst: word,
                offset: ctx.thread.thread_id,
            });
            ctx.stream.emit(Inst::OrImm {
                dst: word,
                imm: LockWordLayout::RESERVED as i64,
            });
            ctx.stream.emit(Inst::Store {
                base: result,
                offset: lock_offset as i32,
                src: word,
                width: Width::W64,
            });
        } else {
            ctx.stream.emit(Inst::StoreImm {
                base: result,
                offset: lock_offset as i32,
                value: 0,
                width: Width::W64,
            });
        }
    }

    if let AllocationKind::Array { length, .. } = req.kind {
        let contiguous =
            ctx.layout.array_length_offset(opal_runtime::ArrayShape::Contiguous) as i32;
        let discontiguous =
            ctx.layout.array_length_offset(opal_runtime::ArrayShape::Discontiguous) as i32;
        match length {
            ArrayLength::Const(len) => {
                ctx.stream.emit(Inst::StoreImm {
                    base: result,
                    offset: contiguous,
                    value: len as i64,
                    width: Width::W32,
                });
                if len == 0 {
                    // Zero contiguous length marks the discontiguous
                    // shape; its true-length field must read zero too.
                    ctx.stream.emit(Inst::StoreImm {
                        base: result,
                        offset: discontiguous,
                        value: 0,
                        width: Width::W32,
                    });
                }
            }
            ArrayLength::Variable(len) => {
                // Written before the contiguous field so a runtime
                // length of zero leaves a valid discontiguous header.
                // For nonzero lengths this slot is element storage and
                // gets overwritten.
                ctx.stream.emit(Inst::StoreImm {
                    base: result,
                    offset: discontiguous,
                    value: 0,
                    width: Width::W32,
                });
                ctx.stream.emit(Inst::Store {
                    base: result,
                    offset: contiguous,
                    src: len,
                    width: Width::W32,
                });
            }
        }
    }
}

// =============================================================================
// Slow-path pieces
// =============================================================================

/// Materialize the scratch-slot arguments and pick the helper.
fn helper_and_args(
    ctx: &mut EmitCtx<'_>,
    req: &AllocationRequest,
    info: &ClassInfo,
) -> (RuntimeHelper, SmallVec<[Vreg; 2]>) {
    let class_arg =
        ctx.materialize_address(info.class_pointer, RelocKind::ClassPointer(req.class));
    let mut args: SmallVec<[Vreg; 2]> = SmallVec::new();
    args.push(class_arg);
    match req.kind {
        AllocationKind::Object => (RuntimeHelper::AllocateObject, args),
        AllocationKind::Array { length, .. } => {
            let len_arg = match length {
                ArrayLength::Const(len) => {
                    let reg = ctx.stream.new_vreg();
                    ctx.stream.emit(Inst::MovImm {
                        dst: reg,
                        value: len as i64,
                    });
                    reg
                }
                ArrayLength::Variable(len) => len,
            };
            args.push(len_arg);
            (RuntimeHelper::AllocateArray, args)
        }
    }
}

/// The helper-only shape: no fast path, just the call.
fn emit_helper_only(
    ctx: &mut EmitCtx<'_>,
    req: &AllocationRequest,
    info: &ClassInfo,
) -> EmitOutcome {
    let (helper, args) = helper_and_args(ctx, req, info);
    let result = ctx.stream.new_vreg();
    ctx.call_helper(helper, &args, Some(result), req.live_refs.clone());
    EmitOutcome::HelperOnly {
        result: Some(result),
    }
}

// =============================================================================
// Tests
// =============================================================================

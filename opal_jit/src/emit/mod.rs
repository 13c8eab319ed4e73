//! The three fast-path emitters and their shared context.

pub mod alloc;
pub mod barrier;
pub mod monitor;

use crate::config::CodegenConfig;
use crate::inst::{Inst, Vreg};
use crate::refmap::RefMap;
use crate::reloc::RelocKind;
use crate::stream::CodeStream;
use opal_runtime::{AddressQuery, HeapGeometry, ObjectLayout, RuntimeHelper, ThreadLayout};

// =============================================================================
// EmitOutcome
// =============================================================================

/// What shape one fast-path request produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Mainline fast path emitted, outlined helper spliced in for the
    /// uncommon case.
    Inlined { result: Option<Vreg> },
    /// No fast path applies under the current configuration; the
    /// operation is a straight helper call.
    HelperOnly { result: Option<Vreg> },
}

impl EmitOutcome {
    /// The register holding the operation's value, when it has one.
    pub fn result(self) -> Option<Vreg> {
        match self {
            EmitOutcome::Inlined { result } | EmitOutcome::HelperOnly { result } => result,
        }
    }
}

// =============================================================================
// EmitCtx
// =============================================================================

/// Everything an emitter consults: the stream under construction plus
/// the read-only layout oracles and the frozen policy.
pub struct EmitCtx<'a> {
    pub stream: &'a mut CodeStream,
    pub layout: &'a ObjectLayout,
    pub thread: ThreadLayout,
    pub heap: &'a HeapGeometry,
    pub config: &'a CodegenConfig,
}

impl EmitCtx<'_> {
    /// Bring an oracle-provided address into a register: either as an
    /// immediate or as a patchable load with a relocation record.
    pub fn materialize_address(&mut self, query: AddressQuery, kind: RelocKind) -> Vreg {
        let dst = self.stream.new_vreg();
        match query {
            AddressQuery::Const(value) => self.stream.emit(Inst::MovImm {
                dst,
                value: value as i64,
            }),
            AddressQuery::NeedsPatch => self.stream.emit(Inst::MovPatchable { dst, kind }),
        }
        dst
    }

    /// Stash the scratch-slot arguments and emit the helper call. The
    /// argument count and result shape must agree with the helper's
    /// wire contract.
    pub fn call_helper(
        &mut self,
        helper: RuntimeHelper,
        args: &[Vreg],
        result: Option<Vreg>,
        refs: RefMap,
    ) {
        debug_assert_eq!(args.len(), helper.args().count());
        debug_assert_eq!(result.is_some(), helper.returns_value());
        let slots = [self.thread.helper_arg0, self.thread.helper_arg1];
        for (arg, offset) in args.iter().zip(slots) {
            self.stream.emit(Inst::StoreThread { offset, src: *arg });
        }
        self.stream.emit(Inst::CallHelper {
            helper,
            result,
            refs,
        });
    }
}

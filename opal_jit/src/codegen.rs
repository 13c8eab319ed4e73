//! Top-level code generator: one instance per compilation unit.
//!
//! Construction validates the configuration against the heap geometry;
//! after that, every fast-path request goes through a single closed
//! dispatch in [`CodeGenerator::emit_op`] and lands in one of the three
//! emitters. `finalize` lays out the stream and runs the structural
//! checks.

use crate::config::CodegenConfig;
use crate::emit::alloc::{emit_allocation, AllocationRequest};
use crate::emit::barrier::{emit_reference_store, ReferenceStoreRequest};
use crate::emit::monitor::{emit_monitor_enter, emit_monitor_exit, MonitorRequest};
use crate::emit::EmitCtx;
use crate::error::{CodegenError, ConfigError};
use crate::inst::{Label, Vreg};
use crate::stream::{CodeStream, Program};
use opal_runtime::{HeapGeometry, ObjectLayout, ThreadLayout};

pub use crate::emit::EmitOutcome;

// =============================================================================
// FastPathOp
// =============================================================================

/// The operations with inline fast paths. Adding a variant requires a
/// matching arm in [`CodeGenerator::emit_op`]; the compiler enforces
/// exhaustiveness.
#[derive(Debug, Clone)]
pub enum FastPathOp {
    New(AllocationRequest),
    MonitorEnter(MonitorRequest),
    MonitorExit(MonitorRequest),
    ReferenceStore(ReferenceStoreRequest),
}

// =============================================================================
// CodeGenerator
// =============================================================================

/// Fast-path code generator for one compilation unit.
pub struct CodeGenerator<'a> {
    stream: CodeStream,
    layout: &'a ObjectLayout,
    thread: ThreadLayout,
    heap: &'a HeapGeometry,
    config: CodegenConfig,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        layout: &'a ObjectLayout,
        heap: &'a HeapGeometry,
        config: CodegenConfig,
    ) -> Result<Self, ConfigError> {
        config.validate(heap)?;
        Ok(CodeGenerator {
            stream: CodeStream::new(),
            layout,
            thread: ThreadLayout::new(),
            heap,
            config,
        })
    }

    /// Allocate a fresh virtual register for operand plumbing.
    pub fn new_vreg(&mut self) -> Vreg {
        self.stream.new_vreg()
    }

    pub fn new_label(&mut self) -> Label {
        self.stream.new_label()
    }

    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    /// Emit one fast-path operation at the current stream position.
    pub fn emit_op(&mut self, op: &FastPathOp) -> Result<EmitOutcome, CodegenError> {
        let mut ctx = EmitCtx {
            stream: &mut self.stream,
            layout: self.layout,
            thread: self.thread,
            heap: self.heap,
            config: &self.config,
        };
        match op {
            FastPathOp::New(req) => emit_allocation(&mut ctx, req),
            FastPathOp::MonitorEnter(req) => emit_monitor_enter(&mut ctx, req),
            FastPathOp::MonitorExit(req) => emit_monitor_exit(&mut ctx, req),
            FastPathOp::ReferenceStore(req) => emit_reference_store(&mut ctx, req),
        }
    }

    /// Lay out mainline plus outlined sequences and run the structural
    /// checks.
    pub fn finalize(self) -> Result<Program, CodegenError> {
        self.stream.finalize()
    }
}

// =============================================================================
// Tests
// =============================================================================

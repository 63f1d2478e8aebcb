//!
//! The Compile Contract
//!
//! The pass that walks a trace and emits native-code-generator
//! instructions lives outside this backend; it is consumed through the
//! narrow `TraceCompiler` trait. The backend hands it a `CompileCx`
//! exposing everything emitted code may bake in: descriptor lookups,
//! slot and shadow addresses, the class-type table, the allocator entry
//! point, and failure-exit registration.
//!
//! The contract: `compile` may be called any number of times with
//! structurally distinct traces, and must not mutate descriptors it is
//! given.
//!

use karst_runtime::alloc::AllocFn;
use karst_runtime::shadow::ExceptionShadow;

use crate::descr::DescrCache;
use crate::error::BackendError;
use crate::exec::{CompiledFn, FailExit};
use crate::layout::ClassTypes;
use crate::slots::FutureValueSlots;
use crate::trace::Trace;

/// Everything the external emitter needs from the backend while
/// translating one trace.
pub struct CompileCx<'a> {
    pub descrs: &'a mut DescrCache,
    pub slots: &'a mut FutureValueSlots,
    pub shadow: &'a ExceptionShadow,
    pub class_types: &'a ClassTypes,
    pub alloc: AllocFn,
    fail_exits: &'a mut Vec<FailExit>,
}

impl<'a> CompileCx<'a> {
    pub(crate) fn new(
        descrs: &'a mut DescrCache,
        slots: &'a mut FutureValueSlots,
        shadow: &'a ExceptionShadow,
        class_types: &'a ClassTypes,
        alloc: AllocFn,
        fail_exits: &'a mut Vec<FailExit>,
    ) -> Self {
        Self {
            descrs,
            slots,
            shadow,
            class_types,
            alloc,
            fail_exits,
        }
    }

    /// Register a failure exit and return its table index; the compiled
    /// function reports it by returning the bitwise complement of that
    /// index.
    pub fn add_fail_exit(&mut self, exit: FailExit) -> usize {
        self.fail_exits.push(exit);
        self.fail_exits.len() - 1
    }
}

/// The narrow seam to the external code generator.
pub trait TraceCompiler {
    fn compile(
        &mut self,
        cx: &mut CompileCx<'_>,
        trace: &Trace,
    ) -> Result<CompiledFn, BackendError>;
}

/// Compiler stub for embeddings that only use the direct operation
/// interpreter. Any attempt to compile is a fatal error.
pub struct NoCodegen;

impl TraceCompiler for NoCodegen {
    fn compile(
        &mut self,
        _cx: &mut CompileCx<'_>,
        trace: &Trace,
    ) -> Result<CompiledFn, BackendError> {
        Err(BackendError::Compile(format!(
            "no code generator attached (trace '{}')",
            trace.name
        )))
    }
}

//!
//! Execution Protocol
//!
//! Compiled functions chain through a signed continuation index rather
//! than native call/return: a non-negative return value names the next
//! function in the compiled-function table, a negative one is the
//! bitwise complement of a failure-exit index. Traces are compiled
//! independently and at different times, so a later-compiled
//! continuation must be reachable from an earlier-compiled trace without
//! that trace knowing about it in advance. The table indirection is
//! what makes that possible.
//!
//! The raw signed encoding lives only in `CompiledFn`'s return value and
//! the `run` loop; everywhere else the `Continuation` sum type is used.
//!

use tracing::trace;

use crate::backend::Backend;

/// A compiled trace entry point. No conventional arguments: inputs and
/// outputs travel through the future-value slots.
pub type CompiledFn = unsafe extern "C" fn() -> isize;

/// Index into the compiled-function table.
pub type EntryIndex = usize;

/// Decoded continuation index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Keep running at this compiled-function table index.
    Continue(usize),
    /// Stop; this indexes the failure-exit table.
    Fail(usize),
}

impl Continuation {
    pub fn from_raw(raw: isize) -> Self {
        if raw >= 0 {
            Continuation::Continue(raw as usize)
        } else {
            Continuation::Fail(!raw as usize)
        }
    }

    pub fn into_raw(self) -> isize {
        match self {
            Continuation::Continue(index) => index as isize,
            Continuation::Fail(exit) => !(exit as isize),
        }
    }
}

/// One known failure exit: where in which trace a guard gave up, and how
/// many future-value slots hold the live state parked there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailExit {
    pub trace_name: String,
    pub op_index: usize,
    pub live_values: usize,
}

impl Backend {
    /// Run the chain of compiled functions starting at `entry` and
    /// return the failure exit it stopped at. Invocations are strictly
    /// sequential; no concurrency is introduced at this layer.
    ///
    /// `entry` must name a compiled entry previously returned by
    /// `compile_trace` or `add_function`.
    pub fn run(&mut self, entry: EntryIndex) -> &FailExit {
        let mut index = entry;
        loop {
            let func = self.functions[index];
            trace!(index, "entering compiled function");
            let raw = unsafe { func() };
            match Continuation::from_raw(raw) {
                Continuation::Continue(next) => index = next,
                Continuation::Fail(exit) => {
                    trace!(exit, "compiled chain stopped");
                    return &self.fail_exits[exit];
                }
            }
        }
    }
}

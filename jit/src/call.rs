//!
//! Synthetic Call Traces
//!
//! An out-of-line call goes through a compiled one-shot trace: N+1
//! integer inputs (the last one is the callee address), then exactly
//! three operations: call, guard that no guest error is pending, and a
//! failure exit carrying the result. The trace is compiled the first
//! time its call descriptor is used and cached on the descriptor
//! afterwards.
//!

use std::rc::Rc;

use tracing::debug;

use crate::backend::Backend;
use crate::descr::{CallDescr, Descr, RESULT_MASK_NONE, RESULT_MASK_PTR};
use crate::error::BackendError;
use crate::exec::EntryIndex;
use crate::trace::{Arg, OpKind, Trace, TraceOp, Value, VarKind};

impl Backend {
    /// The compiled entry for this signature's call trace, compiling it
    /// on first use.
    fn call_trace_entry(&mut self, descr: &Rc<CallDescr>) -> Result<EntryIndex, BackendError> {
        if let Some(entry) = descr.compiled_entry() {
            return Ok(entry);
        }

        let argnum = descr.arg_count();
        let inputs = vec![VarKind::Int; argnum + 1];
        let result_var = (descr.result_mask != RESULT_MASK_NONE).then_some((argnum + 1) as u32);

        let mut call_op = TraceOp::new(OpKind::Call, (0..=argnum as u32).map(Arg::Var))
            .with_descr(Descr::Call(descr.clone()));
        if let Some(var) = result_var {
            call_op = call_op.with_result(var);
        }
        let ops = vec![
            call_op,
            TraceOp::new(OpKind::GuardNoError, std::iter::empty()),
            TraceOp::new(OpKind::Fail, result_var.map(Arg::Var)),
        ];
        let trace = Trace::new("call", inputs, ops);

        debug!(args = argnum, mask = descr.result_mask, "compiling synthetic call trace");
        let entry = self.compile_trace(&trace)?;
        descr.set_compiled_entry(entry);
        Ok(entry)
    }

    /// Perform an out-of-line call. The last argument is the callee
    /// address; the rest are the call arguments, in order. If a guest
    /// error is pending afterwards the returned value is meaningless and
    /// the caller must consult the shadow.
    pub(crate) fn do_call(
        &mut self,
        args: &[Value],
        descr: &Rc<CallDescr>,
    ) -> Result<Option<Value>, BackendError> {
        let entry = self.call_trace_entry(descr)?;

        for (i, arg) in args.iter().enumerate() {
            match arg {
                Value::Int(v) => self.set_future_int(i, *v),
                Value::Ptr(p) => self.set_future_ptr(i, *p),
            }
        }
        let _ = self.run(entry);

        Ok(match descr.result_mask {
            RESULT_MASK_NONE => None,
            RESULT_MASK_PTR => Some(Value::Ptr(self.latest_value_ptr(0))),
            // An integer result is returned as a full word; callers
            // needing a narrower width apply the mask themselves.
            _ => Some(Value::Int(self.latest_value_int(0))),
        })
    }
}

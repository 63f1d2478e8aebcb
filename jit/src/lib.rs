///
/// karst-jit - Tracing JIT Backend
///
/// This crate is the native-execution backend of the karst tracing JIT.
/// It owns everything both sides of the interpreter/machine-code boundary
/// must agree on:
///
/// - layout: size classes and the heap layout model
/// - descr: the descriptor cache (field offsets, array items, call
///   signatures)
/// - trace: the minimal trace IR handed to the compile contract
/// - slots: future-value slots, the marshaling channel
/// - exec: the continuation-chaining execution protocol
/// - ops: the direct operation interpreter
/// - call: synthetic one-shot call traces
/// - compile: the narrow contract to the external Cranelift emitter
///
/// Entry point: build a `Backend` with a `TraceCompiler`, hand it traces
/// via `compile_trace`, run them via `run`, or execute primitive heap
/// operations immediately via `execute_operation`.
///

pub mod backend;
pub mod call;
pub mod compile;
pub mod descr;
pub mod error;
pub mod exec;
pub mod layout;
pub mod ops;
pub mod slots;
pub mod trace;

pub use backend::Backend;
pub use compile::{CompileCx, NoCodegen, TraceCompiler};
pub use descr::{ArrayDescr, CallDescr, Descr, DescrCache, FieldDescr, SizeDescr};
pub use error::BackendError;
pub use exec::{CompiledFn, Continuation, EntryIndex, FailExit};
pub use layout::{ClassTypes, HeaderLayout, HeapType, SizeClass, StructDesc};
pub use slots::FutureValueSlots;
pub use trace::{Arg, OpKind, Trace, TraceOp, Value, VarKind};

///
/// Execution Protocol Integration Tests
///
/// Drives `compile_trace` and `run` end to end through real machine
/// code: a minimal trace compiler built on Cranelift JIT that emits
/// constant-continuation functions. Each compiled function either jumps
/// to another table entry or stops at a failure exit, which is exactly
/// the control-transfer protocol independently compiled traces use to
/// chain to one another.
///

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, Linkage, Module};

use karst_jit::{
    Arg, Backend, BackendError, CompileCx, CompiledFn, FailExit, OpKind, Trace, TraceCompiler,
    TraceOp,
};

/// Compiles traces whose first operation decides the continuation:
/// `Jump` with a constant target returns that table index, `Fail`
/// registers a failure exit and returns its complement.
struct ConstCompiler {
    module: JITModule,
    ctx: codegen::Context,
    next_name: u32,
}

impl ConstCompiler {
    fn new() -> Self {
        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false").unwrap();
        flag_builder.set("is_pic", "false").unwrap();

        let isa = cranelift_native::builder()
            .expect("host ISA")
            .finish(settings::Flags::new(flag_builder))
            .expect("ISA flags");

        let builder = JITBuilder::with_isa(isa, default_libcall_names());
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        Self {
            module,
            ctx,
            next_name: 0,
        }
    }

    fn emit_const_return(&mut self, value: i64) -> Result<CompiledFn, BackendError> {
        let ret_ty = self.module.target_config().pointer_type();
        let mut sig = self.module.make_signature();
        sig.returns.push(AbiParam::new(ret_ty));

        let name = format!("chain{}", self.next_name);
        self.next_name += 1;
        let func_id = self
            .module
            .declare_function(&name, Linkage::Local, &sig)
            .map_err(|e| BackendError::Compile(format!("declare {}: {}", name, e)))?;

        self.ctx.func.signature = sig;
        let mut builder_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut builder_ctx);

        let block = builder.create_block();
        builder.append_block_params_for_function_params(block);
        builder.switch_to_block(block);
        builder.seal_block(block);

        let v = builder.ins().iconst(ret_ty, value);
        builder.ins().return_(&[v]);
        builder.finalize();

        self.module
            .define_function(func_id, &mut self.ctx)
            .map_err(|e| BackendError::Compile(format!("define {}: {}", name, e)))?;
        self.module.clear_context(&mut self.ctx);
        self.module
            .finalize_definitions()
            .map_err(|e| BackendError::Compile(format!("finalize: {}", e)))?;

        let ptr = self.module.get_finalized_function(func_id);
        Ok(unsafe { std::mem::transmute::<*const u8, CompiledFn>(ptr) })
    }
}

impl TraceCompiler for ConstCompiler {
    fn compile(
        &mut self,
        cx: &mut CompileCx<'_>,
        trace: &Trace,
    ) -> Result<CompiledFn, BackendError> {
        let op = trace
            .ops
            .first()
            .ok_or_else(|| BackendError::Compile("empty trace".to_string()))?;

        let continuation = match op.kind {
            OpKind::Jump => match op.args.first() {
                Some(Arg::ConstInt(target)) => *target,
                _ => {
                    return Err(BackendError::Compile(
                        "jump needs a constant target".to_string(),
                    ));
                }
            },
            OpKind::Fail => {
                let exit = cx.add_fail_exit(FailExit {
                    trace_name: trace.name.clone(),
                    op_index: 0,
                    live_values: 0,
                });
                !(exit as i64)
            }
            other => {
                return Err(BackendError::Compile(format!(
                    "unsupported op {:?}",
                    other
                )));
            }
        };

        self.emit_const_return(continuation)
    }
}

fn jump_trace(name: &str, target: i64) -> Trace {
    Trace::new(
        name,
        vec![],
        vec![TraceOp::new(OpKind::Jump, [Arg::ConstInt(target)])],
    )
}

fn fail_trace(name: &str) -> Trace {
    Trace::new(
        name,
        vec![],
        vec![TraceOp::new(OpKind::Fail, std::iter::empty())],
    )
}

#[test]
fn test_single_compiled_failure_exit() {
    let mut backend = Backend::new(Box::new(ConstCompiler::new())).unwrap();

    let entry = backend.compile_trace(&fail_trace("bail")).unwrap();
    assert_eq!(entry, 0);

    let exit = backend.run(entry);
    assert_eq!(exit.trace_name, "bail");
    assert_eq!(exit.op_index, 0);
}

#[test]
fn test_chain_reaches_later_compiled_continuation() {
    let mut backend = Backend::new(Box::new(ConstCompiler::new())).unwrap();

    // The bridge is compiled first and names entry 1, which does not
    // exist yet; only the table indirection makes this legal.
    let entry0 = backend.compile_trace(&jump_trace("bridge", 1)).unwrap();
    let entry1 = backend.compile_trace(&fail_trace("exit")).unwrap();
    assert_eq!((entry0, entry1), (0, 1));

    let exit = backend.run(entry0);
    assert_eq!(exit.trace_name, "exit");
}

#[test]
fn test_three_hop_chain() {
    let mut backend = Backend::new(Box::new(ConstCompiler::new())).unwrap();

    let entry0 = backend.compile_trace(&jump_trace("hop0", 1)).unwrap();
    backend.compile_trace(&jump_trace("hop1", 2)).unwrap();
    backend.compile_trace(&fail_trace("last")).unwrap();

    let exit = backend.run(entry0);
    assert_eq!(exit.trace_name, "last");
    assert_eq!(exit.live_values, 0);
}

//!
//! The Backend Instance
//!
//! One `Backend` owns every piece of mutable backend state: the
//! descriptor cache, the future-value slots, the exception state shadow,
//! the compiled-function and failure-exit tables, the allocator entry
//! point, and the attached trace compiler. Callers hold exactly one
//! instance per driving thread; nothing here is a process-wide
//! singleton.
//!

use std::rc::Rc;

use cranelift::prelude::{settings, Configurable};
use tracing::debug;

use karst_runtime::alloc::{karst_alloc, AllocFn};
use karst_runtime::layout::{
    ARRAY_BASE_SIZE, ARRAY_LENGTH_OFFSET, OBJECT_BASE_SIZE, OBJECT_TYPE_OFFSET, STR_BASE_SIZE,
    STR_LENGTH_OFFSET, UNICODE_BASE_SIZE, UNICODE_LENGTH_OFFSET, WORD,
};
use karst_runtime::mem;
use karst_runtime::shadow::{ExceptionShadow, GuestError, ERROR_OVERFLOW, ERROR_ZERO_DIVISION};

use crate::compile::{CompileCx, TraceCompiler};
use crate::descr::{ArrayDescr, CallDescr, DescrCache, FieldDescr, SizeDescr};
use crate::error::BackendError;
use crate::exec::{CompiledFn, EntryIndex, FailExit};
use crate::layout::{ClassTypes, HeaderLayout, HeapType, SizeClass, StructDesc};
use crate::slots::FutureValueSlots;
use crate::trace::Trace;

pub struct Backend {
    class_types: ClassTypes,
    pub(crate) descrs: DescrCache,
    pub(crate) slots: FutureValueSlots,
    shadow: Box<ExceptionShadow>,
    ovf_error: GuestError,
    zer_error: GuestError,
    vtable_field: Rc<FieldDescr>,
    pub(crate) functions: Vec<CompiledFn>,
    pub(crate) fail_exits: Vec<FailExit>,
    pub(crate) alloc: AllocFn,
    compiler: Box<dyn TraceCompiler>,
    pub(crate) array_layout: HeaderLayout,
    pub(crate) str_layout: HeaderLayout,
    pub(crate) unicode_layout: HeaderLayout,
}

impl Backend {
    /// Build a backend wired to the default allocator.
    pub fn new(compiler: Box<dyn TraceCompiler>) -> Result<Self, BackendError> {
        Self::with_allocator(compiler, karst_alloc)
    }

    /// Build a backend with a caller-provided memory manager. Everything
    /// downstream allocates through this one entry point.
    pub fn with_allocator(
        compiler: Box<dyn TraceCompiler>,
        alloc: AllocFn,
    ) -> Result<Self, BackendError> {
        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false").unwrap();
        flag_builder.set("is_pic", "false").unwrap();

        let isa_builder = cranelift_native::builder()
            .map_err(|msg| BackendError::Isa(format!("failed to create ISA builder: {}", msg)))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| BackendError::Isa(format!("failed to create ISA: {}", e)))?;

        if isa.pointer_bytes() as usize != WORD {
            return Err(BackendError::Isa(format!(
                "host pointer width {} does not match runtime word size {}",
                isa.pointer_bytes(),
                WORD
            )));
        }

        let class_types = ClassTypes::new(isa.pointer_type());
        let call_conv = isa.default_call_conv();
        let mut descrs = DescrCache::new(class_types, call_conv);

        // One-time setup: validate the variable-length header layouts
        // and attach the native item type to each array singleton.
        for class in SizeClass::ALL {
            let layout =
                HeaderLayout::build(ARRAY_BASE_SIZE, class, ARRAY_LENGTH_OFFSET, &class_types)?;
            descrs.array_of_class(class).attach_item_ty(layout.item_ty);
        }
        let array_layout =
            HeaderLayout::build(ARRAY_BASE_SIZE, SizeClass::Int, ARRAY_LENGTH_OFFSET, &class_types)?;
        let str_layout =
            HeaderLayout::build(STR_BASE_SIZE, SizeClass::Byte, STR_LENGTH_OFFSET, &class_types)?;
        let unicode_layout = HeaderLayout::build(
            UNICODE_BASE_SIZE,
            SizeClass::WideChar,
            UNICODE_LENGTH_OFFSET,
            &class_types,
        )?;

        let vtable_field = descrs.field_of(&StructDesc::object(), "typeid")?;

        let ovf_error = prebuilt_error(alloc, ERROR_OVERFLOW);
        let zer_error = prebuilt_error(alloc, ERROR_ZERO_DIVISION);

        Ok(Self {
            class_types,
            descrs,
            slots: FutureValueSlots::new(),
            shadow: Box::new(ExceptionShadow::new()),
            ovf_error,
            zer_error,
            vtable_field,
            functions: Vec::new(),
            fail_exits: Vec::new(),
            alloc,
            compiler,
            array_layout,
            str_layout,
            unicode_layout,
        })
    }

    // ------------------------------
    // Descriptor lookups

    pub fn size_of(&mut self, desc: &StructDesc) -> Result<Rc<SizeDescr>, BackendError> {
        self.descrs.size_of(desc)
    }

    pub fn field_of(
        &mut self,
        desc: &StructDesc,
        field: &str,
    ) -> Result<Rc<FieldDescr>, BackendError> {
        self.descrs.field_of(desc, field)
    }

    pub fn array_of(&self, item: HeapType) -> Result<Rc<ArrayDescr>, BackendError> {
        self.descrs.array_of(item)
    }

    pub fn call_of(
        &mut self,
        args: &[HeapType],
        result: Option<HeapType>,
    ) -> Result<Rc<CallDescr>, BackendError> {
        self.descrs.call_of(args, result)
    }

    /// The type-identity field every vtable-carrying object embeds.
    pub fn vtable_field(&self) -> &Rc<FieldDescr> {
        &self.vtable_field
    }

    pub fn class_types(&self) -> &ClassTypes {
        &self.class_types
    }

    pub fn allocator(&self) -> AllocFn {
        self.alloc
    }

    // ------------------------------
    // Value marshaling

    pub fn set_future_int(&mut self, index: usize, value: i64) {
        self.slots.set_int(index, value);
    }

    pub fn set_future_ptr(&mut self, index: usize, value: *mut u8) {
        self.slots.set_ptr(index, value);
    }

    pub fn latest_value_int(&mut self, index: usize) -> i64 {
        self.slots.get_int(index)
    }

    pub fn latest_value_ptr(&mut self, index: usize) -> *mut u8 {
        self.slots.get_ptr(index)
    }

    pub fn slot_addr(&mut self, index: usize) -> *mut usize {
        self.slots.slot_addr(index)
    }

    // ------------------------------
    // Exception state shadow

    pub fn shadow(&self) -> &ExceptionShadow {
        &self.shadow
    }

    pub fn raise_overflow(&self) {
        self.shadow.set_backup(self.ovf_error);
    }

    pub fn raise_zero_division(&self) {
        self.shadow.set_backup(self.zer_error);
    }

    pub fn current_error(&self) -> GuestError {
        self.shadow.backup()
    }

    pub fn clear_error(&self) {
        self.shadow.clear_backup();
    }

    pub fn overflow_error(&self) -> GuestError {
        self.ovf_error
    }

    pub fn zero_division_error(&self) -> GuestError {
        self.zer_error
    }

    // ------------------------------
    // Compilation

    /// Hand a trace to the attached compiler and add the resulting
    /// function to the table, returning its entry index.
    pub fn compile_trace(&mut self, trace: &Trace) -> Result<EntryIndex, BackendError> {
        debug!(name = %trace.name, ops = trace.ops.len(), "compiling trace");
        let mut cx = CompileCx::new(
            &mut self.descrs,
            &mut self.slots,
            &self.shadow,
            &self.class_types,
            self.alloc,
            &mut self.fail_exits,
        );
        let func = self.compiler.compile(&mut cx, trace)?;
        self.functions.push(func);
        let entry = self.functions.len() - 1;
        debug!(name = %trace.name, entry, "trace compiled");
        Ok(entry)
    }

    /// Append a compiled function directly. The emitter uses this for
    /// continuations it produces out of band.
    pub fn add_function(&mut self, func: CompiledFn) -> EntryIndex {
        self.functions.push(func);
        self.functions.len() - 1
    }

    pub fn add_fail_exit(&mut self, exit: FailExit) -> usize {
        self.fail_exits.push(exit);
        self.fail_exits.len() - 1
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

fn prebuilt_error(alloc: AllocFn, kind: isize) -> GuestError {
    let value = unsafe { alloc(OBJECT_BASE_SIZE) };
    unsafe { mem::write_word(value, OBJECT_TYPE_OFFSET, kind as i64) };
    GuestError { kind, value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::NoCodegen;
    use crate::trace::{Trace, VarKind};

    fn backend() -> Backend {
        Backend::new(Box::new(NoCodegen)).unwrap()
    }

    #[test]
    fn test_setup_attaches_array_item_types() {
        let backend = backend();
        for item in [HeapType::GcPtr, HeapType::Int, HeapType::Byte, HeapType::WideChar] {
            let descr = backend.array_of(item).unwrap();
            assert!(descr.item_ty().is_some());
        }
    }

    #[test]
    fn test_vtable_field_is_cached() {
        let mut backend = backend();
        let again = backend.field_of(&StructDesc::object(), "typeid").unwrap();
        assert!(Rc::ptr_eq(&again, backend.vtable_field()));
    }

    #[test]
    fn test_raise_and_clear_guest_errors() {
        let backend = backend();
        assert!(backend.current_error().is_none());

        backend.raise_overflow();
        assert_eq!(backend.current_error(), backend.overflow_error());
        assert_eq!(backend.current_error().kind, ERROR_OVERFLOW);

        // Last write wins.
        backend.raise_zero_division();
        assert_eq!(backend.current_error(), backend.zero_division_error());

        backend.clear_error();
        assert!(backend.current_error().is_none());
    }

    #[test]
    fn test_prebuilt_error_payloads_are_typed() {
        let backend = backend();
        let err = backend.overflow_error();
        assert!(!err.value.is_null());
        unsafe {
            assert_eq!(
                mem::read_word(err.value, OBJECT_TYPE_OFFSET),
                ERROR_OVERFLOW as i64
            );
        }
    }

    #[test]
    fn test_compile_without_codegen_is_fatal() {
        let mut backend = backend();
        let trace = Trace::new("t", vec![VarKind::Int], vec![]);
        assert!(matches!(
            backend.compile_trace(&trace),
            Err(BackendError::Compile(_))
        ));
    }
}

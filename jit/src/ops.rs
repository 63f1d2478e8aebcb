//!
//! Direct Operation Interpreter
//!
//! The trace builder sometimes wants the result of a primitive heap
//! operation immediately (during specialization, for instance) instead
//! of a compiled path. This interpreter executes that subset directly
//! against the heap using descriptors. It is deliberately incomplete:
//! arithmetic, guards, and control flow only exist compiled, and asking
//! for them here is a fatal error.
//!
//! Bounds are the caller's responsibility throughout; the optimizer has
//! already emitted the guards upstream.
//!

use std::rc::Rc;

use karst_runtime::mem;

use crate::backend::Backend;
use crate::descr::{ArrayDescr, CallDescr, Descr, FieldDescr, SizeDescr};
use crate::error::BackendError;
use crate::layout::{HeaderLayout, SizeClass};
use crate::trace::{OpKind, Value};

fn int_arg(op: OpKind, args: &[Value], index: usize) -> Result<i64, BackendError> {
    args.get(index)
        .and_then(Value::as_int)
        .ok_or(BackendError::IllTypedOperand {
            op,
            index,
            expected: "integer",
        })
}

fn ptr_arg(op: OpKind, args: &[Value], index: usize) -> Result<*mut u8, BackendError> {
    args.get(index)
        .and_then(Value::as_ptr)
        .ok_or(BackendError::IllTypedOperand {
            op,
            index,
            expected: "pointer",
        })
}

fn value_arg(op: OpKind, args: &[Value], index: usize) -> Result<Value, BackendError> {
    args.get(index).copied().ok_or(BackendError::IllTypedOperand {
        op,
        index,
        expected: "value",
    })
}

fn size_descr(op: OpKind, descr: Option<&Descr>) -> Result<&Rc<SizeDescr>, BackendError> {
    descr
        .and_then(Descr::as_size)
        .ok_or(BackendError::DescrMismatch(op))
}

fn field_descr(op: OpKind, descr: Option<&Descr>) -> Result<&Rc<FieldDescr>, BackendError> {
    descr
        .and_then(Descr::as_field)
        .ok_or(BackendError::DescrMismatch(op))
}

fn array_descr(op: OpKind, descr: Option<&Descr>) -> Result<&Rc<ArrayDescr>, BackendError> {
    descr
        .and_then(Descr::as_array)
        .ok_or(BackendError::DescrMismatch(op))
}

fn call_descr(op: OpKind, descr: Option<&Descr>) -> Result<&Rc<CallDescr>, BackendError> {
    descr
        .and_then(Descr::as_call)
        .ok_or(BackendError::DescrMismatch(op))
}

impl Backend {
    /// Execute one primitive operation immediately. Arguments are
    /// already evaluated; `descr` carries the layout or signature handle
    /// where the operation needs one.
    pub fn execute_operation(
        &mut self,
        kind: OpKind,
        args: &[Value],
        descr: Option<&Descr>,
    ) -> Result<Option<Value>, BackendError> {
        match kind {
            OpKind::New => {
                let d = size_descr(kind, descr)?;
                Ok(Some(Value::Ptr(unsafe { (self.alloc)(d.size) })))
            }
            OpKind::NewWithVtable => {
                let d = size_descr(kind, descr)?;
                let vtable = ptr_arg(kind, args, 0)?;
                let obj = unsafe { (self.alloc)(d.size) };
                let field = self.vtable_field().clone();
                unsafe { field.class.write_at(obj, field.offset, Value::Ptr(vtable))? };
                Ok(Some(Value::Ptr(obj)))
            }
            OpKind::NewArray => {
                let d = array_descr(kind, descr)?;
                let length = int_arg(kind, args, 0)?;
                Ok(Some(self.allocate_varsized(&self.array_layout, d.item_size, length)?))
            }
            OpKind::NewStr => {
                let length = int_arg(kind, args, 0)?;
                let item_size = self.str_layout.item_size;
                Ok(Some(self.allocate_varsized(&self.str_layout, item_size, length)?))
            }
            OpKind::NewUnicode => {
                let length = int_arg(kind, args, 0)?;
                let item_size = self.unicode_layout.item_size;
                Ok(Some(self.allocate_varsized(&self.unicode_layout, item_size, length)?))
            }
            OpKind::GetField => {
                let d = field_descr(kind, descr)?;
                let obj = ptr_arg(kind, args, 0)?;
                Ok(Some(unsafe { d.class.read_at(obj, d.offset) }))
            }
            OpKind::SetField => {
                let d = field_descr(kind, descr)?;
                let obj = ptr_arg(kind, args, 0)?;
                let value = value_arg(kind, args, 1)?;
                unsafe { d.class.write_at(obj, d.offset, value)? };
                Ok(None)
            }
            OpKind::GetArrayItem => {
                let d = array_descr(kind, descr)?;
                let array = ptr_arg(kind, args, 0)?;
                let index = int_arg(kind, args, 1)?;
                let offset = self.array_layout.items_offset + index as usize * d.item_size;
                Ok(Some(unsafe { d.class.read_at(array, offset) }))
            }
            OpKind::SetArrayItem => {
                let d = array_descr(kind, descr)?;
                let array = ptr_arg(kind, args, 0)?;
                let index = int_arg(kind, args, 1)?;
                let value = value_arg(kind, args, 2)?;
                let offset = self.array_layout.items_offset + index as usize * d.item_size;
                unsafe { d.class.write_at(array, offset, value)? };
                Ok(None)
            }
            OpKind::ArrayLen => {
                let array = ptr_arg(kind, args, 0)?;
                let len = unsafe { mem::read_word(array, self.array_layout.length_offset) };
                Ok(Some(Value::Int(len)))
            }
            OpKind::StrLen => {
                let s = ptr_arg(kind, args, 0)?;
                let len = unsafe { mem::read_word(s, self.str_layout.length_offset) };
                Ok(Some(Value::Int(len)))
            }
            OpKind::StrGetItem => {
                let s = ptr_arg(kind, args, 0)?;
                let index = int_arg(kind, args, 1)?;
                let offset = self.str_layout.item_offset(index);
                Ok(Some(unsafe { SizeClass::Byte.read_at(s, offset) }))
            }
            OpKind::StrSetItem => {
                let s = ptr_arg(kind, args, 0)?;
                let index = int_arg(kind, args, 1)?;
                let value = value_arg(kind, args, 2)?;
                let offset = self.str_layout.item_offset(index);
                unsafe { SizeClass::Byte.write_at(s, offset, value)? };
                Ok(None)
            }
            OpKind::UnicodeLen => {
                let s = ptr_arg(kind, args, 0)?;
                let len = unsafe { mem::read_word(s, self.unicode_layout.length_offset) };
                Ok(Some(Value::Int(len)))
            }
            OpKind::UnicodeGetItem => {
                let s = ptr_arg(kind, args, 0)?;
                let index = int_arg(kind, args, 1)?;
                let offset = self.unicode_layout.item_offset(index);
                Ok(Some(unsafe { SizeClass::WideChar.read_at(s, offset) }))
            }
            OpKind::UnicodeSetItem => {
                let s = ptr_arg(kind, args, 0)?;
                let index = int_arg(kind, args, 1)?;
                let value = value_arg(kind, args, 2)?;
                let offset = self.unicode_layout.item_offset(index);
                unsafe { SizeClass::WideChar.write_at(s, offset, value)? };
                Ok(None)
            }
            OpKind::Call => {
                let d = call_descr(kind, descr)?.clone();
                self.do_call(args, &d)
            }
            OpKind::CastIntToPtr => {
                let v = int_arg(kind, args, 0)?;
                Ok(Some(Value::Ptr(v as usize as *mut u8)))
            }
            OpKind::CastPtrToInt => {
                let p = ptr_arg(kind, args, 0)?;
                Ok(Some(Value::Int(p as usize as i64)))
            }
            other => Err(BackendError::UnsupportedOperation(other)),
        }
    }

    /// Allocate a variable-length object and store its length word. The
    /// size computation is checked before the allocator ever runs.
    fn allocate_varsized(
        &self,
        layout: &HeaderLayout,
        item_size: usize,
        length: i64,
    ) -> Result<Value, BackendError> {
        let overflow = BackendError::AllocationOverflow { length, item_size };
        if length < 0 {
            return Err(overflow);
        }
        let bytes = (length as usize)
            .checked_mul(item_size)
            .and_then(|items| items.checked_add(layout.items_offset))
            .ok_or(overflow)?;
        let ptr = unsafe { (self.alloc)(bytes) };
        unsafe { mem::write_word(ptr, layout.length_offset, length) };
        Ok(Value::Ptr(ptr))
    }
}

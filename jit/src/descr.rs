//!
//! Descriptor Cache
//!
//! Descriptors are the single source of truth for "how is this value
//! laid out / called". The cache owns every descriptor for the lifetime
//! of the backend and hands out `Rc` handles; entries are never evicted.
//! Identity matters: generated code is memoized against descriptor
//! identity, so structurally equal lookups must return the *same*
//! object, not merely an equal one (`Rc::ptr_eq` is the test).
//!
//! Array descriptors are special: there are exactly four, one per size
//! class, shared by every array of that element kind. Their native item
//! type is attached once during backend setup.
//!

use std::cell::OnceCell;
use std::collections::HashMap;
use std::rc::Rc;

use cranelift_codegen::ir::{AbiParam, Signature, Type};
use cranelift_codegen::isa::CallConv;
use smallvec::SmallVec;

use karst_runtime::layout::WORD;

use crate::error::BackendError;
use crate::exec::EntryIndex;
use crate::layout::{ClassTypes, HeapType, SizeClass, StructDesc};

/// Result marshaling mask of a call: no result.
pub const RESULT_MASK_NONE: isize = 0;
/// Result marshaling mask of a call: heap-pointer result.
pub const RESULT_MASK_PTR: isize = -2;

/// Byte size of a fixed-layout heap object.
#[derive(Debug)]
pub struct SizeDescr {
    pub size: usize,
}

/// Byte offset and size class of one field.
#[derive(Debug)]
pub struct FieldDescr {
    pub offset: usize,
    pub class: SizeClass,
}

/// Item size and class shared by every array of one element kind. The
/// native item type is filled in during one-time setup.
#[derive(Debug)]
pub struct ArrayDescr {
    pub item_size: usize,
    pub class: SizeClass,
    item_ty: OnceCell<Type>,
}

impl ArrayDescr {
    pub fn item_ty(&self) -> Option<Type> {
        self.item_ty.get().copied()
    }

    pub(crate) fn attach_item_ty(&self, ty: Type) {
        let _ = self.item_ty.set(ty);
    }
}

/// Native signature and result marshaling of one call shape. The
/// synthetic call trace compiled for this signature is attached the
/// first time the descriptor is used for an out-of-line call.
#[derive(Debug)]
pub struct CallDescr {
    pub signature: Signature,
    /// `0` = no result, `-2` = heap-pointer result, otherwise the
    /// byte-width mask of an integer result.
    pub result_mask: isize,
    entry: OnceCell<EntryIndex>,
}

impl CallDescr {
    pub fn arg_count(&self) -> usize {
        self.signature.params.len()
    }

    pub fn compiled_entry(&self) -> Option<EntryIndex> {
        self.entry.get().copied()
    }

    pub(crate) fn set_compiled_entry(&self, entry: EntryIndex) {
        // Transitions once from absent to present; the caller checks
        // `compiled_entry` first.
        let _ = self.entry.set(entry);
    }
}

/// A descriptor handle as carried by trace operations.
#[derive(Debug, Clone)]
pub enum Descr {
    Size(Rc<SizeDescr>),
    Field(Rc<FieldDescr>),
    Array(Rc<ArrayDescr>),
    Call(Rc<CallDescr>),
}

impl Descr {
    pub fn as_size(&self) -> Option<&Rc<SizeDescr>> {
        match self {
            Descr::Size(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&Rc<FieldDescr>> {
        match self {
            Descr::Field(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Rc<ArrayDescr>> {
        match self {
            Descr::Array(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Rc<CallDescr>> {
        match self {
            Descr::Call(d) => Some(d),
            _ => None,
        }
    }
}

type CallKey = (SmallVec<[SizeClass; 8]>, Option<SizeClass>);

/// The cache itself. Keys are structural descriptions, never identity.
pub struct DescrCache {
    class_types: ClassTypes,
    call_conv: CallConv,
    sizes: HashMap<StructDesc, Rc<SizeDescr>>,
    fields: HashMap<(StructDesc, String), Rc<FieldDescr>>,
    arrays: [Rc<ArrayDescr>; 4],
    calls: HashMap<CallKey, Rc<CallDescr>>,
}

impl DescrCache {
    pub(crate) fn new(class_types: ClassTypes, call_conv: CallConv) -> Self {
        let arrays = SizeClass::ALL.map(|class| {
            Rc::new(ArrayDescr {
                item_size: class.byte_size(),
                class,
                item_ty: OnceCell::new(),
            })
        });
        Self {
            class_types,
            call_conv,
            sizes: HashMap::new(),
            fields: HashMap::new(),
            arrays,
            calls: HashMap::new(),
        }
    }

    pub fn size_of(&mut self, desc: &StructDesc) -> Result<Rc<SizeDescr>, BackendError> {
        if let Some(d) = self.sizes.get(desc) {
            return Ok(d.clone());
        }
        let size = desc.byte_size()?;
        let d = Rc::new(SizeDescr { size });
        self.sizes.insert(desc.clone(), d.clone());
        Ok(d)
    }

    pub fn field_of(
        &mut self,
        desc: &StructDesc,
        field: &str,
    ) -> Result<Rc<FieldDescr>, BackendError> {
        let key = (desc.clone(), field.to_string());
        if let Some(d) = self.fields.get(&key) {
            return Ok(d.clone());
        }
        let (offset, class) = desc.field_layout(field)?;
        let d = Rc::new(FieldDescr { offset, class });
        self.fields.insert(key, d.clone());
        Ok(d)
    }

    /// Pure lookup among the four prebuilt singletons; never allocates a
    /// new descriptor.
    pub fn array_of(&self, item: HeapType) -> Result<Rc<ArrayDescr>, BackendError> {
        let class = SizeClass::of_type(item)?;
        Ok(self.arrays[class.index()].clone())
    }

    pub(crate) fn array_of_class(&self, class: SizeClass) -> &Rc<ArrayDescr> {
        &self.arrays[class.index()]
    }

    pub fn call_of(
        &mut self,
        args: &[HeapType],
        result: Option<HeapType>,
    ) -> Result<Rc<CallDescr>, BackendError> {
        let arg_classes: SmallVec<[SizeClass; 8]> = args
            .iter()
            .map(|ty| SizeClass::of_type(*ty))
            .collect::<Result<_, _>>()?;
        let result_class = match result {
            None => None,
            Some(ty) => Some(SizeClass::of_type(ty)?),
        };
        let key = (arg_classes, result_class);
        if let Some(d) = self.calls.get(&key) {
            return Ok(d.clone());
        }

        let mut signature = Signature::new(self.call_conv);
        for class in &key.0 {
            signature.params.push(AbiParam::new(self.class_types.of(*class)));
        }
        let result_mask = match result_class {
            None => RESULT_MASK_NONE,
            Some(class) => {
                signature.returns.push(AbiParam::new(self.class_types.of(class)));
                match class {
                    SizeClass::Ptr => RESULT_MASK_PTR,
                    _ => {
                        let size = class.byte_size();
                        if size < WORD {
                            (1isize << (size * 8)) - 1
                        } else {
                            -1
                        }
                    }
                }
            }
        };

        let d = Rc::new(CallDescr {
            signature,
            result_mask,
            entry: OnceCell::new(),
        });
        self.calls.insert(key, d.clone());
        Ok(d)
    }
}

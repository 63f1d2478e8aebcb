//!
//! Size Classes and the Heap Layout Model
//!
//! Every heap-representable value falls into one of four size classes:
//! heap pointer, signed integer, byte, wide character. The class decides
//! the native width, the Cranelift type used when emitting code, and the
//! marshaling strategy across the interpreter/compiled-code boundary.
//!
//! The layout model also owns the arithmetic for fixed-layout objects
//! (C-like field placement) and for variable-length headers
//! ([pad1][length][pad2][items]), including the padding invariant that
//! guards against an inconsistent platform layout.
//!

use cranelift::prelude::types;
use cranelift_codegen::ir::Type;

use karst_runtime::layout::{WIDE_CHAR, WORD};
use karst_runtime::mem;

use crate::error::BackendError;
use crate::trace::Value;

/// The structural description of a heap-representable type, as the
/// embedding interpreter sees it. Descriptor cache keys are built from
/// these, so equality is structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// Pointer to a managed heap object.
    GcPtr,
    /// Signed machine integer.
    Int,
    /// Byte, also used for narrow characters.
    Byte,
    /// Full-code-point wide character.
    WideChar,
    /// Described but not representable by this backend.
    Float,
}

/// One of the four native representation granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum SizeClass {
    Ptr = 0,
    Int = 1,
    Byte = 2,
    WideChar = 3,
}

impl SizeClass {
    pub const ALL: [SizeClass; 4] = [
        SizeClass::Ptr,
        SizeClass::Int,
        SizeClass::Byte,
        SizeClass::WideChar,
    ];

    /// Map a heap type to its size class. Anything without a native
    /// representation is a fatal configuration error.
    pub fn of_type(ty: HeapType) -> Result<SizeClass, BackendError> {
        match ty {
            HeapType::GcPtr => Ok(SizeClass::Ptr),
            HeapType::Int => Ok(SizeClass::Int),
            HeapType::Byte => Ok(SizeClass::Byte),
            HeapType::WideChar => Ok(SizeClass::WideChar),
            other => Err(BackendError::UnsupportedSize(other)),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn byte_size(self) -> usize {
        match self {
            SizeClass::Ptr | SizeClass::Int => WORD,
            SizeClass::Byte => 1,
            SizeClass::WideChar => WIDE_CHAR,
        }
    }

    /// Read a value of this class at (base, byte offset). Narrow classes
    /// widen into an integer value.
    pub unsafe fn read_at(self, base: *mut u8, offset: usize) -> Value {
        unsafe {
            match self {
                SizeClass::Ptr => Value::Ptr(mem::read_ptr(base, offset)),
                SizeClass::Int => Value::Int(mem::read_word(base, offset)),
                SizeClass::Byte => Value::Int(mem::read_byte(base, offset) as i64),
                SizeClass::WideChar => Value::Int(mem::read_wide(base, offset) as i64),
            }
        }
    }

    /// Write a value of this class at (base, byte offset). Narrow classes
    /// truncate to their width.
    pub unsafe fn write_at(
        self,
        base: *mut u8,
        offset: usize,
        value: Value,
    ) -> Result<(), BackendError> {
        unsafe {
            match (self, value) {
                (SizeClass::Ptr, Value::Ptr(p)) => mem::write_ptr(base, offset, p),
                (SizeClass::Int, Value::Int(v)) => mem::write_word(base, offset, v),
                (SizeClass::Byte, Value::Int(v)) => mem::write_byte(base, offset, v as u8),
                (SizeClass::WideChar, Value::Int(v)) => mem::write_wide(base, offset, v as u32),
                (class, Value::Ptr(_)) => {
                    return Err(BackendError::ClassMismatch(class, "pointer"));
                }
                (class, Value::Int(_)) => {
                    return Err(BackendError::ClassMismatch(class, "integer"));
                }
            }
        }
        Ok(())
    }
}

/// The Cranelift type for each size class, chosen once at startup from
/// the host ISA's pointer type.
#[derive(Debug, Clone, Copy)]
pub struct ClassTypes {
    by_class: [Type; 4],
}

impl ClassTypes {
    pub fn new(word_ty: Type) -> Self {
        Self {
            by_class: [word_ty, word_ty, types::I8, types::I32],
        }
    }

    pub fn of(&self, class: SizeClass) -> Type {
        self.by_class[class.index()]
    }

    pub fn word(&self) -> Type {
        self.by_class[SizeClass::Int.index()]
    }
}

/// Structural description of a fixed-layout heap object: named fields in
/// declaration order. Objects participating in `new_with_vtable` start
/// with the canonical type-identity field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructDesc {
    pub name: String,
    pub fields: Vec<(String, HeapType)>,
}

impl StructDesc {
    pub fn new(name: impl Into<String>, fields: Vec<(String, HeapType)>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// The canonical object header every vtable-carrying object embeds at
    /// offset zero.
    pub fn object() -> Self {
        Self::new("object", vec![("typeid".to_string(), HeapType::GcPtr)])
    }

    /// Byte offset and size class of a field. Each field is aligned to
    /// its own width.
    pub fn field_layout(&self, field: &str) -> Result<(usize, SizeClass), BackendError> {
        let mut offset = 0usize;
        for (name, ty) in &self.fields {
            let class = SizeClass::of_type(*ty)?;
            offset = align_to(offset, class.byte_size());
            if name == field {
                return Ok((offset, class));
            }
            offset += class.byte_size();
        }
        Err(BackendError::UnknownField {
            name: self.name.clone(),
            field: field.to_string(),
        })
    }

    /// Total object size, rounded up to word alignment.
    pub fn byte_size(&self) -> Result<usize, BackendError> {
        let mut offset = 0usize;
        for (_, ty) in &self.fields {
            let class = SizeClass::of_type(*ty)?;
            offset = align_to(offset, class.byte_size());
            offset += class.byte_size();
        }
        Ok(align_to(offset, WORD))
    }
}

fn align_to(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

/// Layout of a variable-length heap object:
/// [pad1][length: word][pad2][items], with pad1 = length_offset and
/// pad2 = base_size - length_offset - word. Negative padding means the
/// platform layout assumptions are broken, which is fatal.
#[derive(Debug, Clone, Copy)]
pub struct HeaderLayout {
    pub item_ty: Type,
    pub item_size: usize,
    pub length_offset: usize,
    pub items_offset: usize,
}

impl HeaderLayout {
    pub fn build(
        base_size: usize,
        item_class: SizeClass,
        length_offset: usize,
        class_types: &ClassTypes,
    ) -> Result<Self, BackendError> {
        let pad2 = base_size as isize - length_offset as isize - WORD as isize;
        if pad2 < 0 {
            return Err(BackendError::InconsistentLayout {
                base_size,
                length_offset,
            });
        }
        Ok(HeaderLayout {
            item_ty: class_types.of(item_class),
            item_size: item_class.byte_size(),
            length_offset,
            items_offset: base_size,
        })
    }

    /// Byte offset of item `index`.
    pub fn item_offset(&self, index: i64) -> usize {
        self.items_offset + index as usize * self.item_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karst_runtime::alloc::karst_alloc;

    #[test]
    fn test_size_class_mapping() {
        assert_eq!(SizeClass::of_type(HeapType::GcPtr).unwrap(), SizeClass::Ptr);
        assert_eq!(SizeClass::of_type(HeapType::Int).unwrap(), SizeClass::Int);
        assert_eq!(SizeClass::of_type(HeapType::Byte).unwrap(), SizeClass::Byte);
        assert_eq!(
            SizeClass::of_type(HeapType::WideChar).unwrap(),
            SizeClass::WideChar
        );
        assert!(matches!(
            SizeClass::of_type(HeapType::Float),
            Err(BackendError::UnsupportedSize(HeapType::Float))
        ));
    }

    #[test]
    fn test_field_offsets_respect_alignment() {
        let desc = StructDesc::new(
            "thing",
            vec![
                ("typeid".to_string(), HeapType::GcPtr),
                ("count".to_string(), HeapType::Int),
                ("flag".to_string(), HeapType::Byte),
                ("tag".to_string(), HeapType::WideChar),
            ],
        );
        assert_eq!(desc.field_layout("typeid").unwrap(), (0, SizeClass::Ptr));
        assert_eq!(desc.field_layout("count").unwrap(), (WORD, SizeClass::Int));
        assert_eq!(
            desc.field_layout("flag").unwrap(),
            (2 * WORD, SizeClass::Byte)
        );
        // The wide char realigns to a 4-byte boundary past the flag byte.
        assert_eq!(
            desc.field_layout("tag").unwrap(),
            (2 * WORD + 4, SizeClass::WideChar)
        );
        // Total size is word-aligned.
        assert_eq!(desc.byte_size().unwrap(), 3 * WORD);
    }

    #[test]
    fn test_unknown_field_is_fatal() {
        let desc = StructDesc::object();
        assert!(matches!(
            desc.field_layout("missing"),
            Err(BackendError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_header_layout_invariant() {
        let class_types = ClassTypes::new(types::I64);
        let layout =
            HeaderLayout::build(2 * WORD, SizeClass::Int, WORD, &class_types).unwrap();
        assert_eq!(layout.length_offset, WORD);
        assert_eq!(layout.items_offset, 2 * WORD);
        assert_eq!(layout.item_offset(3), 2 * WORD + 3 * WORD);

        // A length word that does not fit inside the base size must be
        // rejected, not silently wrapped.
        assert!(matches!(
            HeaderLayout::build(WORD, SizeClass::Int, WORD, &class_types),
            Err(BackendError::InconsistentLayout { .. })
        ));
    }

    #[test]
    fn test_class_read_write_round_trip() {
        unsafe {
            let base = karst_alloc(64);

            SizeClass::Int.write_at(base, 0, Value::Int(-7)).unwrap();
            assert_eq!(SizeClass::Int.read_at(base, 0), Value::Int(-7));

            let p = 0x4000 as *mut u8;
            SizeClass::Ptr.write_at(base, 8, Value::Ptr(p)).unwrap();
            assert_eq!(SizeClass::Ptr.read_at(base, 8), Value::Ptr(p));

            // Byte stores truncate to one byte.
            SizeClass::Byte.write_at(base, 16, Value::Int(0x1ff)).unwrap();
            assert_eq!(SizeClass::Byte.read_at(base, 16), Value::Int(0xff));

            // Wide-character stores truncate to the platform width.
            SizeClass::WideChar
                .write_at(base, 20, Value::Int(0x1_0000_0041))
                .unwrap();
            assert_eq!(SizeClass::WideChar.read_at(base, 20), Value::Int(0x41));
        }
    }

    #[test]
    fn test_class_write_rejects_wrong_kind() {
        unsafe {
            let base = karst_alloc(16);
            assert!(matches!(
                SizeClass::Int.write_at(base, 0, Value::Ptr(std::ptr::null_mut())),
                Err(BackendError::ClassMismatch(SizeClass::Int, "pointer"))
            ));
        }
    }
}

use thiserror::Error;

use crate::layout::{HeapType, SizeClass};
use crate::trace::OpKind;

/// Fatal configuration errors: contract violations by an upstream
/// collaborator (an ill-typed trace, a broken platform layout
/// assumption). They abort the current compilation or execution unit and
/// are never recovered locally. Guest-visible runtime errors (overflow,
/// division by zero) go through the exception state shadow instead.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no size class for type {0:?}")]
    UnsupportedSize(HeapType),

    #[error("heap type '{name}' has no field '{field}'")]
    UnknownField { name: String, field: String },

    #[error(
        "inconsistent heap header layout: base size {base_size} cannot hold \
         a length word at offset {length_offset}"
    )]
    InconsistentLayout {
        base_size: usize,
        length_offset: usize,
    },

    #[error("operation {0:?} cannot be executed directly; it must be compiled")]
    UnsupportedOperation(OpKind),

    #[error("allocation size overflow: {length} items of {item_size} bytes")]
    AllocationOverflow { length: i64, item_size: usize },

    #[error("operation {op:?} expected {expected} operand at position {index}")]
    IllTypedOperand {
        op: OpKind,
        index: usize,
        expected: &'static str,
    },

    #[error("operation {0:?} was given the wrong descriptor kind")]
    DescrMismatch(OpKind),

    #[error("size class {0:?} cannot store a {1} value")]
    ClassMismatch(SizeClass, &'static str),

    #[error("native code generator unavailable: {0}")]
    Isa(String),

    #[error("trace compilation failed: {0}")]
    Compile(String),
}

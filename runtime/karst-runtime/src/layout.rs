//!
//! Heap Layout Constants
//!
//! The interpreter and compiled code must agree on where the pieces of a
//! heap object live. These constants are that agreement: every offset the
//! backend's layout model computes is derived from them, and the code
//! generator bakes them into emitted instructions.
//!
//! Variable-length objects (arrays, strings, wide-character strings) all
//! share the same header shape: a type-identity word, then the length
//! word, then the items. Fixed-layout objects start with the
//! type-identity word alone.
//!

/// Native machine word size in bytes.
pub const WORD: usize = std::mem::size_of::<usize>();

/// Wide-character width in bytes. Guest wide characters are full code
/// points, matching Rust's `char`.
pub const WIDE_CHAR: usize = 4;

/// Fixed-layout objects: the type-identity word sits first.
pub const OBJECT_TYPE_OFFSET: usize = 0;
pub const OBJECT_BASE_SIZE: usize = WORD;

/// Arrays: [type word][length word][items].
pub const ARRAY_LENGTH_OFFSET: usize = WORD;
pub const ARRAY_BASE_SIZE: usize = 2 * WORD;

/// Strings share the array header shape, with byte items.
pub const STR_LENGTH_OFFSET: usize = WORD;
pub const STR_BASE_SIZE: usize = 2 * WORD;

/// Wide-character strings share the array header shape as well.
pub const UNICODE_LENGTH_OFFSET: usize = WORD;
pub const UNICODE_BASE_SIZE: usize = 2 * WORD;

//!
//! karst-runtime - Raw Heap Primitives
//!
//! This crate provides the memory substrate shared by the karst trace
//! interpreter and the machine code it produces:
//!
//! - `alloc`: the single raw allocator entry point generated code links
//!   against, plus the `AllocFn` pointer type used to swap it out
//! - `layout`: the heap layout constants (header sizes, length offsets,
//!   native value widths) both sides of the boundary agree on
//! - `mem`: unsafe word-level reads and writes at byte offsets
//! - `shadow`: the exception state shadow slots compiled code uses to
//!   signal pending guest errors
//!
//! Everything here is untyped by design: the typed view of the heap lives
//! in the backend's descriptors, and reclamation belongs to the embedding
//! collector.
//!

pub mod alloc;
pub mod layout;
pub mod mem;
pub mod shadow;

pub use alloc::*;
pub use layout::*;
pub use mem::*;
pub use shadow::*;

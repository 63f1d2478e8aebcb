//!
//! Raw Allocation Entry Point
//!
//! The backend funnels every heap allocation through a single function
//! pointer of type `AllocFn`, defaulting to `karst_alloc`. Swapping the
//! memory manager (a real collector, an arena, a test harness) means
//! swapping that pointer; nothing else in the backend changes.
//!
//! Memory is zero-initialized and never freed here: the heap is owned by
//! the embedding collector, and this crate only hands out storage.
//!

use std::alloc::{alloc_zeroed, Layout};

use crate::layout::WORD;

/// Signature of the raw allocator generated code calls.
pub type AllocFn = unsafe extern "C" fn(usize) -> *mut u8;

/// Allocate `size` bytes of zeroed, word-aligned heap storage.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn karst_alloc(size: usize) -> *mut u8 {
    // Zero-size requests still get a distinct, dereferenceable word.
    let size = size.max(WORD);
    let layout = Layout::from_size_align(size, WORD).unwrap();
    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        panic!("failed to allocate {} bytes", size);
    }
    ptr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_zeroed() {
        unsafe {
            let ptr = karst_alloc(64);
            assert!(!ptr.is_null());
            for i in 0..64 {
                assert_eq!(*ptr.add(i), 0);
            }
        }
    }

    #[test]
    fn test_alloc_zero_size() {
        unsafe {
            let ptr = karst_alloc(0);
            assert!(!ptr.is_null());
        }
    }
}

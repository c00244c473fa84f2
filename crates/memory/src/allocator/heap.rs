//! Stateless allocator over the global Rust allocator

use core::ptr::{self, NonNull};
use std::alloc::{self, Layout};

use crate::debugging::{AllocatorInfo, GlobalLeakCounter, GlobalLeakGuard};
use crate::error::{MemoryError, MemoryResult};

use super::storage::StatelessHandle;
use super::traits::{RawAllocator, check_node_request};

const NAME: &str = "foundation_memory::HeapAllocator";

/// Strictest alignment [`HeapAllocator`] accepts
pub const HEAP_MAX_ALIGNMENT: usize = 4096;

/// Net bytes allocated by every [`HeapAllocator`] in the process
pub static HEAP_LEAK_COUNTER: GlobalLeakCounter = GlobalLeakCounter::new(NAME);

/// Interchangeable allocator backed by `std::alloc`
///
/// All instances share one [`GlobalLeakCounter`]. Holding a guard from
/// [`HeapAllocator::leak_guard`] for the lifetime of the program reports any
/// heap memory still outstanding when the guard is dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapAllocator;

impl HeapAllocator {
    /// Creates the allocator
    pub const fn new() -> Self {
        Self
    }

    /// Registers a user of the heap leak counter
    pub fn leak_guard() -> GlobalLeakGuard<'static> {
        HEAP_LEAK_COUNTER.guard()
    }
}

// SAFETY: nodes come from the global allocator with a layout of the
// requested alignment and are freed with the same layout.
unsafe impl RawAllocator for HeapAllocator {
    type Handle<'a> = StatelessHandle<Self>;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        check_node_request(NAME, size, self.max_node_size(), alignment, HEAP_MAX_ALIGNMENT)?;
        let layout = Layout::from_size_align(size.max(1), alignment)
            .map_err(|_| MemoryError::bad_node_size(NAME, size, self.max_node_size()))?;

        // SAFETY: the layout has a non-zero size.
        let memory = unsafe { alloc::alloc(layout) };
        let memory = NonNull::new(memory).ok_or_else(|| MemoryError::out_of_memory(NAME, size))?;
        HEAP_LEAK_COUNTER.on_allocate(size);
        Ok(memory)
    }

    unsafe fn deallocate_node(&mut self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        HEAP_LEAK_COUNTER.on_deallocate(size);
        // SAFETY: `allocate_node` validated this exact layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(size.max(1), alignment);
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }

    fn max_node_size(&self) -> usize {
        isize::MAX as usize - HEAP_MAX_ALIGNMENT
    }

    fn max_alignment(&self) -> usize {
        HEAP_MAX_ALIGNMENT
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::new(NAME, ptr::null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_aligned_ptr;

    #[test]
    fn over_aligned_requests() {
        let mut heap = HeapAllocator::new();
        for alignment in [1, 8, 16, 64, 256] {
            let ptr = heap.allocate_node(24, alignment).unwrap();
            assert!(is_aligned_ptr(ptr.as_ptr(), alignment));
            unsafe { heap.deallocate_node(ptr, 24, alignment) };
        }
    }

    #[test]
    fn rejects_excessive_alignment() {
        let mut heap = HeapAllocator::new();
        let error = heap.allocate_node(8, HEAP_MAX_ALIGNMENT * 2).unwrap_err();
        assert!(matches!(error, MemoryError::BadAlignment { .. }));
    }

    #[test]
    fn zero_sized_node() {
        let mut heap = HeapAllocator::new();
        let ptr = heap.allocate_node(0, 8).unwrap();
        unsafe { heap.deallocate_node(ptr, 0, 8) };
    }
}

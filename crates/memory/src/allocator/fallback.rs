//! Two-level allocator composition

use core::ptr::NonNull;

use crate::debugging::AllocatorInfo;
use crate::error::MemoryResult;

use super::storage::StatefulHandle;
use super::traits::{ComposableAllocator, RawAllocator};

/// Tries `default` first and falls back to `fallback`
///
/// Only the non-growing `try_*` operations of `default` are used, so a
/// pool or stack as `default` serves what it already has and the fallback
/// takes the rest. Deallocation asks `default` whether it owns the pointer.
#[derive(Debug, Default)]
pub struct FallbackAllocator<D, F> {
    default: D,
    fallback: F,
}

impl<D: ComposableAllocator, F: RawAllocator> FallbackAllocator<D, F> {
    /// Combines two allocators
    pub fn new(default: D, fallback: F) -> Self {
        Self { default, fallback }
    }

    /// The primary allocator
    pub fn default_allocator(&mut self) -> &mut D {
        &mut self.default
    }

    /// The allocator used when the primary one fails
    pub fn fallback_allocator(&mut self) -> &mut F {
        &mut self.fallback
    }

    /// Splits into both parts
    pub fn into_parts(self) -> (D, F) {
        (self.default, self.fallback)
    }
}

// SAFETY: memory is returned to the default allocator only when it claims
// ownership, and to the fallback otherwise.
unsafe impl<D: ComposableAllocator, F: RawAllocator> RawAllocator for FallbackAllocator<D, F> {
    type Handle<'a>
        = StatefulHandle<'a, Self>
    where
        Self: 'a;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        match self.default.try_allocate_node(size, alignment) {
            Some(memory) => Ok(memory),
            None => self.fallback.allocate_node(size, alignment),
        }
    }

    unsafe fn deallocate_node(&mut self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        // SAFETY: the pointer came from one of the two; `default` declines
        // pointers it does not own.
        unsafe {
            if !self.default.try_deallocate_node(ptr, size, alignment) {
                self.fallback.deallocate_node(ptr, size, alignment);
            }
        }
    }

    fn allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        match self.default.try_allocate_array(count, size, alignment) {
            Some(memory) => Ok(memory),
            None => self.fallback.allocate_array(count, size, alignment),
        }
    }

    unsafe fn deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) {
        // SAFETY: as in `deallocate_node`.
        unsafe {
            if !self.default.try_deallocate_array(ptr, count, size, alignment) {
                self.fallback.deallocate_array(ptr, count, size, alignment);
            }
        }
    }

    fn max_node_size(&self) -> usize {
        self.default.max_node_size().max(self.fallback.max_node_size())
    }

    fn max_array_size(&self) -> usize {
        self.default.max_array_size().max(self.fallback.max_array_size())
    }

    fn max_alignment(&self) -> usize {
        self.default.max_alignment().max(self.fallback.max_alignment())
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of("foundation_memory::FallbackAllocator", self)
    }
}

// SAFETY: a pointer neither part owns is reported as not owned.
unsafe impl<D: ComposableAllocator, F: ComposableAllocator> ComposableAllocator
    for FallbackAllocator<D, F>
{
    fn try_allocate_node(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.default
            .try_allocate_node(size, alignment)
            .or_else(|| self.fallback.try_allocate_node(size, alignment))
    }

    fn try_allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        self.default
            .try_allocate_array(count, size, alignment)
            .or_else(|| self.fallback.try_allocate_array(count, size, alignment))
    }

    unsafe fn try_deallocate_node(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe {
            self.default.try_deallocate_node(ptr, size, alignment)
                || self.fallback.try_deallocate_node(ptr, size, alignment)
        }
    }

    unsafe fn try_deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe {
            self.default.try_deallocate_array(ptr, count, size, alignment)
                || self.fallback.try_deallocate_array(ptr, count, size, alignment)
        }
    }
}

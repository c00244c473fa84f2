//! Container-facing allocator facade
//!
//! [`StdAllocator`] speaks in elements rather than bytes: `allocate(n)` is
//! a node allocation for one element and an array allocation otherwise.
//! Equality follows the wrapped reference: stateless allocators always
//! compare equal, stateful ones only when they share one resource.

use core::fmt;
use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::error::{MemoryError, MemoryResult};

use super::storage::{AllocatorReference, make_allocator_reference};
use super::traits::RawAllocator;

/// Typed allocator for containers, borrowing an allocator for `'a`
pub struct StdAllocator<'a, T, A: RawAllocator + ?Sized + 'a> {
    reference: AllocatorReference<'a, A>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, A: RawAllocator + ?Sized + 'a> StdAllocator<'a, T, A> {
    /// Containers should copy the allocator on copy assignment
    pub const PROPAGATE_ON_CONTAINER_COPY_ASSIGNMENT: bool = true;

    /// Containers should move the allocator on move assignment
    pub const PROPAGATE_ON_CONTAINER_MOVE_ASSIGNMENT: bool = true;

    /// Containers should swap allocators on swap
    pub const PROPAGATE_ON_CONTAINER_SWAP: bool = true;

    /// Every instance can free memory from every other instance
    pub const IS_ALWAYS_EQUAL: bool = !AllocatorReference::<'a, A>::IS_STATEFUL;

    /// Creates a facade referring to `allocator`
    pub fn new(allocator: &'a mut A) -> Self {
        Self::from_reference(make_allocator_reference(allocator))
    }

    /// Wraps an existing reference
    pub fn from_reference(reference: AllocatorReference<'a, A>) -> Self {
        Self {
            reference,
            _marker: PhantomData,
        }
    }

    /// Allocates storage for `n` elements
    ///
    /// Zero-sized requests return a dangling, well-aligned pointer.
    pub fn allocate(&self, n: usize) -> MemoryResult<NonNull<T>> {
        if n == 0 || size_of::<T>() == 0 {
            return Ok(NonNull::dangling());
        }
        if n > self.max_size() {
            return Err(MemoryError::bad_array_size(
                self.reference.info().name,
                n.saturating_mul(size_of::<T>()),
                self.reference.max_array_size(),
            ));
        }

        let memory = if n == 1 {
            self.reference.allocate_node(size_of::<T>(), align_of::<T>())?
        } else {
            self.reference
                .allocate_array(n, size_of::<T>(), align_of::<T>())?
        };
        Ok(memory.cast())
    }

    /// Releases storage for `n` elements
    ///
    /// # Safety
    /// `ptr` must come from `allocate(n)` on an allocator equal to `self`.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        if n == 0 || size_of::<T>() == 0 {
            return;
        }
        // SAFETY: forwarded caller contract; the same node/array split as
        // `allocate` is used.
        unsafe {
            if n == 1 {
                self.reference
                    .deallocate_node(ptr.cast(), size_of::<T>(), align_of::<T>());
            } else {
                self.reference
                    .deallocate_array(ptr.cast(), n, size_of::<T>(), align_of::<T>());
            }
        }
    }

    /// Largest `n` that `allocate` can accept
    pub fn max_size(&self) -> usize {
        self.reference.max_array_size() / size_of::<T>().max(1)
    }

    /// Same allocator, different element type
    pub fn rebind<U>(self) -> StdAllocator<'a, U, A> {
        StdAllocator {
            reference: self.reference,
            _marker: PhantomData,
        }
    }

    /// The wrapped reference
    pub fn reference(&self) -> &AllocatorReference<'a, A> {
        &self.reference
    }
}

impl<'a, T, A: RawAllocator + ?Sized + 'a> Clone for StdAllocator<'a, T, A> {
    fn clone(&self) -> Self {
        Self::from_reference(self.reference.clone())
    }
}

impl<'a, T, U, A: RawAllocator + ?Sized + 'a> PartialEq<StdAllocator<'a, U, A>>
    for StdAllocator<'a, T, A>
{
    fn eq(&self, other: &StdAllocator<'a, U, A>) -> bool {
        self.reference.same_resource(&other.reference)
    }
}

impl<'a, T, A: RawAllocator + ?Sized + 'a> fmt::Debug for StdAllocator<'a, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdAllocator")
            .field("element", &core::any::type_name::<T>())
            .field("allocator", &self.reference.info())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;

    #[test]
    fn stateless_facades_are_always_equal() {
        let mut first = HeapAllocator::new();
        let mut second = HeapAllocator::new();
        let a = StdAllocator::<u64, _>::new(&mut first);
        let b = StdAllocator::<u32, _>::new(&mut second);
        assert!(StdAllocator::<u64, HeapAllocator>::IS_ALWAYS_EQUAL);
        assert!(a == b);
    }

    #[test]
    fn allocate_one_and_many() {
        let mut heap = HeapAllocator::new();
        let alloc = StdAllocator::<u64, _>::new(&mut heap);

        let one = alloc.allocate(1).unwrap();
        let many = alloc.allocate(16).unwrap();
        unsafe {
            one.as_ptr().write(7);
            many.as_ptr().add(15).write(9);
            alloc.deallocate(many, 16);
            alloc.deallocate(one, 1);
        }
    }

    #[test]
    fn zero_sized_requests_are_dangling() {
        let mut heap = HeapAllocator::new();
        let alloc = StdAllocator::<(), _>::new(&mut heap);
        let ptr = alloc.allocate(100).unwrap();
        assert_eq!(ptr, NonNull::dangling());
        unsafe { alloc.deallocate(ptr, 100) };
    }
}

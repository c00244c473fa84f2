//! Raw allocator contract
//!
//! Every allocator in the crate implements [`RawAllocator`]. The contract is
//! deliberately small:
//! - `allocate_node`/`deallocate_node` for a single object
//! - `allocate_array`/`deallocate_array` for `count` contiguous objects,
//!   defaulting to the node path with `count * size` bytes
//! - `max_node_size`/`max_array_size`/`max_alignment` limits, defaulting to
//!   "unbounded" and [`MAX_ALIGNMENT`]
//!
//! Allocators that can tell whether they own a pointer and can fail without
//! side effects additionally implement [`ComposableAllocator`]. Its `try_*`
//! operations never log, panic or grow; they report failure through
//! `None`/`false` so a caller can fall back to another allocator.
//!
//! # Classification
//!
//! Each allocator names a [`AllocatorHandle`] through its `Handle` associated
//! type. The handle decides how references to the allocator are stored:
//! - [`StatefulHandle`](super::StatefulHandle): a non-owning pointer to one specific instance
//! - [`StatelessHandle`](super::StatelessHandle): nothing at all, a fresh default instance is
//!   synthesized for every call
//! - [`SharedHandle`](super::SharedHandle): the allocator itself, whose clones alias one resource
//!
//! # Safety
//!
//! `RawAllocator` is an `unsafe trait`. Implementors guarantee that:
//! - A successful allocation is valid for reads and writes of the requested
//!   size and aligned to the requested alignment
//! - The memory stays valid until it is passed back to the same allocator
//! - Memory handed out twice is never live at the same time

use core::ptr::NonNull;

use crate::config::MAX_ALIGNMENT;
use crate::debugging::AllocatorInfo;
use crate::error::{MemoryError, MemoryResult};

/// Capability contract shared by every allocator
///
/// # Safety
/// See the module documentation for the guarantees implementors provide.
pub unsafe trait RawAllocator {
    /// How references to this allocator are stored
    type Handle<'a>: AllocatorHandle<'a, Self>
    where
        Self: 'a;

    /// Allocates `size` bytes aligned to `alignment`
    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>>;

    /// Returns a node to the allocator
    ///
    /// # Safety
    /// `ptr` must come from `allocate_node` on this allocator with the same
    /// `size` and `alignment`, and must not be used afterwards.
    unsafe fn deallocate_node(&mut self, ptr: NonNull<u8>, size: usize, alignment: usize);

    /// Allocates `count` contiguous objects of `size` bytes
    fn allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        let bytes = array_bytes(self.info().name, count, size, self.max_array_size())?;
        self.allocate_node(bytes, alignment)
    }

    /// Returns an array to the allocator
    ///
    /// # Safety
    /// `ptr` must come from `allocate_array` on this allocator with the same
    /// arguments, and must not be used afterwards.
    unsafe fn deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) {
        // SAFETY: the default `allocate_array` went through the node path
        // with exactly `count * size` bytes.
        unsafe { self.deallocate_node(ptr, count * size, alignment) }
    }

    /// Largest size accepted by `allocate_node`
    fn max_node_size(&self) -> usize {
        usize::MAX
    }

    /// Largest total size accepted by `allocate_array`
    fn max_array_size(&self) -> usize {
        self.max_node_size()
    }

    /// Strictest alignment the allocator can honor
    fn max_alignment(&self) -> usize {
        MAX_ALIGNMENT
    }

    /// Diagnostic tag passed to debug handlers
    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of(core::any::type_name::<Self>(), self)
    }
}

/// Allocators that can take part in a fallback chain
///
/// # Safety
/// Same as [`RawAllocator`]. In addition, `try_deallocate_*` must return
/// `false` without touching the memory when the pointer is not owned.
pub unsafe trait ComposableAllocator: RawAllocator {
    /// Allocates a node without growing, `None` on failure
    fn try_allocate_node(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>>;

    /// Allocates an array without growing, `None` on failure
    fn try_allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        let bytes = count.checked_mul(size)?;
        if bytes > self.max_array_size() {
            return None;
        }
        self.try_allocate_node(bytes, alignment)
    }

    /// Returns a node if this allocator owns it
    ///
    /// # Safety
    /// If `ptr` is owned by this allocator the `deallocate_node` contract
    /// applies.
    unsafe fn try_deallocate_node(&mut self, ptr: NonNull<u8>, size: usize, alignment: usize)
    -> bool;

    /// Returns an array if this allocator owns it
    ///
    /// # Safety
    /// If `ptr` is owned by this allocator the `deallocate_array` contract
    /// applies.
    unsafe fn try_deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.try_deallocate_node(ptr, count * size, alignment) }
    }
}

/// Non-owning way to reach an allocator
///
/// Handles are what [`AllocatorReference`](super::AllocatorReference) and
/// [`AnyAllocatorReference`](super::AnyAllocatorReference) store.
pub trait AllocatorHandle<'a, A: RawAllocator + ?Sized + 'a>: Clone {
    /// Whether distinct handles may refer to distinct allocator states
    const IS_STATEFUL: bool;

    /// Creates a handle referring to `allocator`
    fn from_allocator(allocator: &'a mut A) -> Self;

    /// Runs `f` with exclusive access to the allocator
    fn with<R>(&mut self, f: impl FnOnce(&mut A) -> R) -> R;

    /// Runs `f` with shared access to the allocator
    fn with_ref<R>(&self, f: impl FnOnce(&A) -> R) -> R;

    /// Whether memory from one handle may be returned through the other
    fn same_resource(&self, other: &Self) -> bool;
}

/// Computes `count * size`, rejecting overflow and oversized arrays
pub(crate) fn array_bytes(
    allocator: &'static str,
    count: usize,
    size: usize,
    max: usize,
) -> MemoryResult<usize> {
    match count.checked_mul(size) {
        Some(bytes) if bytes <= max => Ok(bytes),
        Some(bytes) => Err(MemoryError::bad_array_size(allocator, bytes, max)),
        None => Err(MemoryError::bad_array_size(allocator, usize::MAX, max)),
    }
}

/// Rejects node requests above the allocator's limits
pub(crate) fn check_node_request(
    allocator: &'static str,
    size: usize,
    max_size: usize,
    alignment: usize,
    max_alignment: usize,
) -> MemoryResult<()> {
    if size > max_size {
        return Err(MemoryError::bad_node_size(allocator, size, max_size));
    }
    if !alignment.is_power_of_two() || alignment > max_alignment {
        return Err(MemoryError::bad_alignment(allocator, alignment, max_alignment));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_bytes_rejects_overflow() {
        assert_eq!(array_bytes("t", 4, 8, usize::MAX), Ok(32));
        assert!(array_bytes("t", usize::MAX, 2, usize::MAX).is_err());
        assert!(matches!(
            array_bytes("t", 4, 8, 16),
            Err(MemoryError::BadArraySize { passed: 32, supported: 16, .. })
        ));
    }

    #[test]
    fn node_request_limits() {
        assert!(check_node_request("t", 8, 16, 8, 16).is_ok());
        assert!(check_node_request("t", 32, 16, 8, 16).unwrap_err().is_bad_allocation_size());
        assert!(matches!(
            check_node_request("t", 8, 16, 32, 16),
            Err(MemoryError::BadAlignment { .. })
        ));
        assert!(check_node_request("t", 8, 16, 3, 16).is_err());
    }
}

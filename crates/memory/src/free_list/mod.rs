//! Intrusive free lists of fixed-size nodes
//!
//! A free list slices inserted memory into nodes of one size and keeps the
//! free ones linked through their own first bytes, so it needs no storage
//! besides the memory it manages.
//!
//! - [`FreeMemoryList`]: singly linked LIFO stack, O(1) node operations
//! - [`OrderedFreeMemoryList`]: address-sorted doubly linked list that makes
//!   contiguous multi-node (array) allocation reliable
//!
//! Links are read and written unaligned: a node is only guaranteed the
//! natural alignment of its size.

mod ordered;
mod unordered;

use core::ptr::NonNull;

use crate::utils::alignment_for;

pub use ordered::OrderedFreeMemoryList;
pub use unordered::FreeMemoryList;

/// Common interface of the free list implementations
pub trait FreeList {
    /// Smallest node size the list can link
    const MIN_ELEMENT_SIZE: usize;

    /// Creates an empty list of `node_size` nodes
    ///
    /// Sizes below [`MIN_ELEMENT_SIZE`](Self::MIN_ELEMENT_SIZE) are rounded
    /// up.
    fn new(node_size: usize) -> Self;

    /// Adds the nodes contained in `[memory, memory + size)`
    ///
    /// # Safety
    /// The region must be valid for reads and writes, aligned to
    /// [`alignment`](Self::alignment) and owned by the list until it is
    /// handed out again.
    unsafe fn insert(&mut self, memory: NonNull<u8>, size: usize);

    /// Takes one node
    fn allocate(&mut self) -> Option<NonNull<u8>>;

    /// Takes enough physically contiguous nodes to hold `bytes`
    fn allocate_array(&mut self, bytes: usize) -> Option<NonNull<u8>>;

    /// Returns one node
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this list and not be used
    /// afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>);

    /// Returns the nodes of an array
    ///
    /// # Safety
    /// `ptr` must come from `allocate_array(bytes)` on this list and not be
    /// used afterwards.
    unsafe fn deallocate_array(&mut self, ptr: NonNull<u8>, bytes: usize);

    /// Size of each node
    fn node_size(&self) -> usize;

    /// Number of free nodes
    fn capacity(&self) -> usize;

    /// Whether no node is free
    fn is_empty(&self) -> bool {
        self.capacity() == 0
    }

    /// Alignment of every node
    fn alignment(&self) -> usize {
        alignment_for(self.node_size())
    }

    /// Bytes of a `size`-byte region that end up in nodes
    fn usable_size(&self, size: usize) -> usize {
        size / self.node_size() * self.node_size()
    }
}

/// Unaligned pointer-sized link stored inside a node
#[inline]
unsafe fn read_link(node: *mut u8, slot: usize) -> *mut u8 {
    // SAFETY: caller guarantees the node holds `slot + 1` links.
    unsafe {
        node.cast::<*mut u8>()
            .add(slot)
            .read_unaligned()
    }
}

#[inline]
unsafe fn write_link(node: *mut u8, slot: usize, value: *mut u8) {
    // SAFETY: caller guarantees the node holds `slot + 1` links.
    unsafe {
        node.cast::<*mut u8>()
            .add(slot)
            .write_unaligned(value);
    }
}

/// Number of `node_size` nodes needed for `bytes`
#[inline]
fn nodes_for(bytes: usize, node_size: usize) -> usize {
    bytes.div_ceil(node_size).max(1)
}

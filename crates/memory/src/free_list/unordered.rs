//! Unordered free list
//!
//! A singly linked stack of nodes. Inserted regions are linked in address
//! order, which keeps freshly inserted memory contiguous for array requests;
//! after that the order is whatever deallocation produced.

use core::fmt;
use core::mem::size_of;
use core::ptr::{self, NonNull};

use crate::config::DEBUG_DOUBLE_DEALLOC_CHECK;
use crate::debugging::{AllocatorInfo, debug_check_double_dealloc};

use super::{FreeList, nodes_for, read_link, write_link};

/// Singly linked free list with O(1) node operations
pub struct FreeMemoryList {
    first: *mut u8,
    node_size: usize,
    capacity: usize,
}

// SAFETY: the list exclusively owns the free nodes it links.
unsafe impl Send for FreeMemoryList {}

impl FreeMemoryList {
    /// Links `count` consecutive nodes starting at `memory` in front of the list
    ///
    /// # Safety
    /// The nodes must be writable and owned by the list.
    unsafe fn push_chain(&mut self, memory: *mut u8, count: usize) {
        debug_assert!(count > 0);
        let node_size = self.node_size;
        // SAFETY: every node written lies inside the caller's region.
        unsafe {
            let mut node = memory;
            for _ in 1..count {
                let next = node.add(node_size);
                write_link(node, 0, next);
                node = next;
            }
            write_link(node, 0, self.first);
        }
        self.first = memory;
        self.capacity += count;
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of("foundation_memory::FreeMemoryList", self)
    }
}

impl FreeList for FreeMemoryList {
    const MIN_ELEMENT_SIZE: usize = size_of::<*mut u8>();

    fn new(node_size: usize) -> Self {
        Self {
            first: ptr::null_mut(),
            node_size: node_size.max(Self::MIN_ELEMENT_SIZE),
            capacity: 0,
        }
    }

    unsafe fn insert(&mut self, memory: NonNull<u8>, size: usize) {
        let count = size / self.node_size;
        if count > 0 {
            // SAFETY: `count` whole nodes fit into the caller's region.
            unsafe { self.push_chain(memory.as_ptr(), count) };
        }
    }

    fn allocate(&mut self) -> Option<NonNull<u8>> {
        let node = NonNull::new(self.first)?;
        // SAFETY: `first` is a free node holding its successor.
        self.first = unsafe { read_link(node.as_ptr(), 0) };
        self.capacity -= 1;
        Some(node)
    }

    fn allocate_array(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        let needed = nodes_for(bytes, self.node_size);
        if needed == 1 {
            return self.allocate();
        }
        if needed > self.capacity {
            return None;
        }

        // Search runs that are contiguous both in the list and in memory.
        let mut before: *mut u8 = ptr::null_mut();
        let mut start = self.first;
        while !start.is_null() {
            let mut end = start;
            let mut length = 1;
            // SAFETY: all visited pointers are free nodes of this list.
            let mut next = unsafe { read_link(end, 0) };
            while length < needed && next == end.wrapping_add(self.node_size) {
                end = next;
                length += 1;
                next = unsafe { read_link(end, 0) };
            }

            if length == needed {
                if before.is_null() {
                    self.first = next;
                } else {
                    // SAFETY: `before` is a free node preceding the run.
                    unsafe { write_link(before, 0, next) };
                }
                self.capacity -= needed;
                return NonNull::new(start);
            }

            before = end;
            start = next;
        }
        None
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        let node = ptr.as_ptr();
        if DEBUG_DOUBLE_DEALLOC_CHECK {
            debug_check_double_dealloc(|| node != self.first, self.info(), node);
        }
        // SAFETY: the node is owned by the list again.
        unsafe { self.push_chain(node, 1) };
    }

    unsafe fn deallocate_array(&mut self, ptr: NonNull<u8>, bytes: usize) {
        let count = nodes_for(bytes, self.node_size);
        // SAFETY: the array spans `count` whole nodes.
        unsafe { self.push_chain(ptr.as_ptr(), count) };
    }

    fn node_size(&self) -> usize {
        self.node_size
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for FreeMemoryList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeMemoryList")
            .field("node_size", &self.node_size)
            .field("capacity", &self.capacity)
            .finish()
    }
}

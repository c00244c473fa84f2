//! Address-ordered free list
//!
//! Free nodes form a doubly linked list sorted by address. Each node holds
//! two links, `next` in its first word and `prev` in its second:
//!
//! ```text
//! first -> [next|prev] <-> [next|prev] <-> ... <-> [next|prev] <- last
//! ```
//!
//! Sorting is what makes array allocation work: runs of physically adjacent
//! nodes are also adjacent in the list, and once a run is found its
//! neighbours are relinked in O(1).
//!
//! # Cursor
//!
//! The list remembers the gap where it last deallocated, as the pair
//! `(last_dealloc_prev, last_dealloc)` of adjacent nodes (either may be null
//! at the ends). Deallocation searches outward from that gap, so returning
//! memory in or near allocation order is O(1); the worst case is a linear
//! walk. Every structural change leaves the cursor on a valid gap.

use core::fmt;
use core::mem::size_of;
use core::ptr::{self, NonNull};

use crate::debugging::{AllocatorInfo, debug_check_double_dealloc};

use super::{FreeList, nodes_for, read_link, write_link};

const NEXT: usize = 0;
const PREV: usize = 1;

/// Sorted doubly linked free list supporting contiguous arrays
pub struct OrderedFreeMemoryList {
    first: *mut u8,
    last: *mut u8,
    last_dealloc_prev: *mut u8,
    last_dealloc: *mut u8,
    node_size: usize,
    capacity: usize,
}

// SAFETY: the list exclusively owns the free nodes it links.
unsafe impl Send for OrderedFreeMemoryList {}

impl OrderedFreeMemoryList {
    #[inline]
    unsafe fn next(node: *mut u8) -> *mut u8 {
        // SAFETY: caller passes a free node.
        unsafe { read_link(node, NEXT) }
    }

    #[inline]
    unsafe fn prev(node: *mut u8) -> *mut u8 {
        // SAFETY: caller passes a free node.
        unsafe { read_link(node, PREV) }
    }

    /// Makes `a` and `b` neighbours; null stands for the list ends
    #[inline]
    unsafe fn link(&mut self, a: *mut u8, b: *mut u8) {
        // SAFETY: non-null arguments are nodes owned by the list.
        unsafe {
            if a.is_null() {
                self.first = b;
            } else {
                write_link(a, NEXT, b);
            }
            if b.is_null() {
                self.last = a;
            } else {
                write_link(b, PREV, a);
            }
        }
    }

    /// Finds adjacent `(a, b)` with `a <= p <= b`, searching from the cursor
    ///
    /// `p` equal to either end means it is already free.
    unsafe fn find_gap(&self, p: *mut u8) -> (*mut u8, *mut u8) {
        let addr = p.addr();
        let (mut a, mut b) = (self.last_dealloc_prev, self.last_dealloc);

        // SAFETY: the cursor and everything reachable from it are free nodes.
        unsafe {
            if !a.is_null() && addr <= a.addr() {
                b = a;
                a = Self::prev(a);
                while !a.is_null() && addr <= a.addr() {
                    b = a;
                    a = Self::prev(a);
                }
            } else if !b.is_null() && addr >= b.addr() {
                a = b;
                b = Self::next(b);
                while !b.is_null() && addr >= b.addr() {
                    a = b;
                    b = Self::next(b);
                }
            }
        }
        (a, b)
    }

    /// Links `count` consecutive nodes at `memory` into their sorted position
    unsafe fn insert_chain(&mut self, memory: *mut u8, count: usize) {
        debug_assert!(count > 0);
        let chain_last = memory.wrapping_add((count - 1) * self.node_size);

        // SAFETY: the chain is owned by the caller's region, the gap
        // endpoints are free nodes.
        unsafe {
            let (a, b) = self.find_gap(memory);
            let overlaps = a == memory
                || (!a.is_null() && a.addr() + self.node_size > memory.addr())
                || (!b.is_null() && b.addr() <= chain_last.addr());
            debug_check_double_dealloc(|| !overlaps, self.info(), memory);
            if overlaps {
                return;
            }

            let mut node = memory;
            for _ in 1..count {
                let next = node.add(self.node_size);
                write_link(node, NEXT, next);
                write_link(next, PREV, node);
                node = next;
            }

            self.link(a, memory);
            self.link(chain_last, b);
            self.last_dealloc_prev = a;
            self.last_dealloc = memory;
        }
        self.capacity += count;
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of("foundation_memory::OrderedFreeMemoryList", self)
    }
}

impl FreeList for OrderedFreeMemoryList {
    const MIN_ELEMENT_SIZE: usize = 2 * size_of::<*mut u8>();

    fn new(node_size: usize) -> Self {
        Self {
            first: ptr::null_mut(),
            last: ptr::null_mut(),
            last_dealloc_prev: ptr::null_mut(),
            last_dealloc: ptr::null_mut(),
            node_size: node_size.max(Self::MIN_ELEMENT_SIZE),
            capacity: 0,
        }
    }

    unsafe fn insert(&mut self, memory: NonNull<u8>, size: usize) {
        let count = size / self.node_size;
        if count > 0 {
            // SAFETY: `count` whole nodes fit into the caller's region.
            unsafe { self.insert_chain(memory.as_ptr(), count) };
        }
    }

    fn allocate(&mut self) -> Option<NonNull<u8>> {
        let node = if self.last_dealloc.is_null() {
            self.last_dealloc_prev
        } else {
            self.last_dealloc
        };
        let node = NonNull::new(node)?;

        // SAFETY: the cursor node is free; its neighbours are free or null.
        unsafe {
            let before = Self::prev(node.as_ptr());
            let after = Self::next(node.as_ptr());
            self.link(before, after);
            self.last_dealloc_prev = before;
            self.last_dealloc = after;
        }
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

        let mut start = self.first;
        // SAFETY: all visited pointers are free nodes of this list.
        unsafe {
            while !start.is_null() {
                let mut end = start;
                let mut length = 1;
                let mut next = Self::next(end);
                while length < needed && next == end.wrapping_add(self.node_size) {
                    end = next;
                    length += 1;
                    next = Self::next(end);
                }

                if length == needed {
                    let before = Self::prev(start);
                    self.link(before, next);
                    self.last_dealloc_prev = before;
                    self.last_dealloc = next;
                    self.capacity -= needed;
                    return NonNull::new(start);
                }
                start = next;
            }
        }
        None
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        // SAFETY: the node is owned by the list again.
        unsafe { self.insert_chain(ptr.as_ptr(), 1) };
    }

    unsafe fn deallocate_array(&mut self, ptr: NonNull<u8>, bytes: usize) {
        let count = nodes_for(bytes, self.node_size);
        // SAFETY: the array spans `count` whole nodes.
        unsafe { self.insert_chain(ptr.as_ptr(), count) };
    }

    fn node_size(&self) -> usize {
        self.node_size
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for OrderedFreeMemoryList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedFreeMemoryList")
            .field("node_size", &self.node_size)
            .field("capacity", &self.capacity)
            .finish()
    }
}

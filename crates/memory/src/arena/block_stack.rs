//! Intrusive stack of memory blocks
//!
//! Each block stores its own link in a small header at its start, so the
//! stack needs no memory of its own:
//!
//! ```text
//! block:  [ prev | usable_size | ......... usable memory ......... ]
//!         ^ header, padded to MAX_ALIGNMENT
//! ```
//!
//! # Invariants
//!
//! - Every pushed block is aligned to [`MAX_ALIGNMENT`] and larger than the
//!   header
//! - A block is in at most one stack at a time

use core::fmt;
use core::mem::size_of;
use core::ptr::{self, NonNull};

use crate::block::MemoryBlock;
use crate::config::MAX_ALIGNMENT;
use crate::utils::{align_up, is_aligned_ptr};

struct Node {
    prev: *mut Node,
    usable_size: usize,
}

/// Bytes at the start of every block reserved for the link
pub const BLOCK_HEADER_SIZE: usize = align_up(size_of::<Node>(), MAX_ALIGNMENT);

/// LIFO list of blocks linked through their headers
pub struct BlockStack {
    head: *mut Node,
}

// SAFETY: the stack exclusively owns the headers of its blocks.
unsafe impl Send for BlockStack {}

impl BlockStack {
    /// Creates an empty stack
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// Pushes a block and returns its usable part
    ///
    /// # Safety
    /// `block` must be valid for writes, aligned to `MAX_ALIGNMENT`, larger
    /// than [`BLOCK_HEADER_SIZE`] and not part of any stack.
    pub unsafe fn push(&mut self, block: MemoryBlock) -> MemoryBlock {
        debug_assert!(is_aligned_ptr(block.memory.as_ptr(), MAX_ALIGNMENT));
        debug_assert!(block.size > BLOCK_HEADER_SIZE);

        let node = block.memory.as_ptr().cast::<Node>();
        // SAFETY: the header fits into the block and is suitably aligned.
        unsafe {
            node.write(Node {
                prev: self.head,
                usable_size: block.size - BLOCK_HEADER_SIZE,
            });
        }
        self.head = node;
        Self::usable(node)
    }

    /// Removes the top block and returns it as originally pushed
    pub fn pop(&mut self) -> Option<MemoryBlock> {
        let node = NonNull::new(self.head)?;
        // SAFETY: `head` is the header of a pushed block.
        let Node { prev, usable_size } = unsafe { node.as_ptr().read() };
        self.head = prev;
        Some(MemoryBlock::new(node.cast(), usable_size + BLOCK_HEADER_SIZE))
    }

    /// Moves the top block of `other` onto `self` and returns its usable part
    pub fn steal_top(&mut self, other: &mut BlockStack) -> Option<MemoryBlock> {
        let node = NonNull::new(other.head)?.as_ptr();
        // SAFETY: `node` is the header of a block owned by `other`; after
        // relinking it is owned by `self` only.
        unsafe {
            other.head = (*node).prev;
            (*node).prev = self.head;
        }
        self.head = node;
        Some(Self::usable(node))
    }

    /// Usable part of the top block
    pub fn top(&self) -> Option<MemoryBlock> {
        (!self.head.is_null()).then(|| Self::usable(self.head))
    }

    /// Whether `ptr` lies inside the usable part of any block
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.blocks().any(|block| block.contains(ptr))
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks().count()
    }

    /// Whether the stack has no blocks
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Usable parts of all blocks, top first
    pub fn blocks(&self) -> impl Iterator<Item = MemoryBlock> + '_ {
        let mut node = self.head;
        core::iter::from_fn(move || {
            if node.is_null() {
                return None;
            }
            let block = Self::usable(node);
            // SAFETY: non-null nodes in the chain are live headers.
            node = unsafe { (*node).prev };
            Some(block)
        })
    }

    fn usable(node: *mut Node) -> MemoryBlock {
        // SAFETY: callers pass live, non-null headers.
        unsafe {
            let memory = node.cast::<u8>().add(BLOCK_HEADER_SIZE);
            MemoryBlock::new(NonNull::new_unchecked(memory), (*node).usable_size)
        }
    }
}

impl Default for BlockStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.blocks()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{HeapAllocator, RawAllocator};

    fn block(heap: &mut HeapAllocator, size: usize) -> MemoryBlock {
        MemoryBlock::new(heap.allocate_node(size, MAX_ALIGNMENT).unwrap(), size)
    }

    fn release(heap: &mut HeapAllocator, block: MemoryBlock) {
        unsafe { heap.deallocate_node(block.memory, block.size, MAX_ALIGNMENT) };
    }

    #[test]
    fn push_pop_is_lifo() {
        let mut heap = HeapAllocator::new();
        let blocks = [block(&mut heap, 64), block(&mut heap, 128), block(&mut heap, 256)];

        let mut stack = BlockStack::new();
        for b in blocks {
            let usable = unsafe { stack.push(b) };
            assert_eq!(usable.size, b.size - BLOCK_HEADER_SIZE);
        }
        assert_eq!(stack.len(), 3);

        for expected in blocks.iter().rev() {
            let popped = stack.pop().unwrap();
            assert_eq!(&popped, expected);
            release(&mut heap, popped);
        }
        assert!(stack.pop().is_none());
    }

    #[test]
    fn steal_top_moves_one_block() {
        let mut heap = HeapAllocator::new();
        let (a, b, c) = (block(&mut heap, 64), block(&mut heap, 64), block(&mut heap, 64));

        let mut source = BlockStack::new();
        let mut target = BlockStack::new();
        unsafe {
            source.push(a);
            source.push(b);
            target.push(c);
        }

        let moved = target.steal_top(&mut source).unwrap();
        assert_eq!(source.len(), 1);
        assert_eq!(target.len(), 2);
        assert!(target.owns(moved.memory.as_ptr()));
        assert!(!source.owns(moved.memory.as_ptr()));

        assert_eq!(target.pop(), Some(b));
        assert_eq!(target.pop(), Some(c));
        assert_eq!(source.pop(), Some(a));
        for block in [a, b, c] {
            release(&mut heap, block);
        }
    }

    #[test]
    fn header_is_excluded_from_ownership() {
        let mut heap = HeapAllocator::new();
        let raw = block(&mut heap, 64);
        let mut stack = BlockStack::new();
        let usable = unsafe { stack.push(raw) };

        assert!(!stack.owns(raw.memory.as_ptr()));
        assert!(stack.owns(usable.memory.as_ptr()));
        assert_eq!(stack.top(), Some(usable));

        let popped = stack.pop().unwrap();
        release(&mut heap, popped);
    }
}

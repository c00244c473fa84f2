//! Block allocators
//!
//! A block allocator hands out large, opaque [`MemoryBlock`]s that an arena
//! later carves up. Blocks are always aligned to [`MAX_ALIGNMENT`].
//!
//! - [`GrowingBlockAllocator`]: every block is `NUM / DEN` times larger
//!   than the previous one (default: doubling)
//! - [`FixedBlockAllocator`]: exactly one block, available again once it
//!   is returned

use core::ptr::NonNull;

use crate::allocator::{HeapAllocator, RawAllocator};
use crate::config::MAX_ALIGNMENT;
use crate::error::{MemoryError, MemoryResult};

/// A contiguous region `[memory, memory + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Start of the region
    pub memory: NonNull<u8>,
    /// Size of the region in bytes
    pub size: usize,
}

impl MemoryBlock {
    /// Describes the region starting at `memory`
    pub const fn new(memory: NonNull<u8>, size: usize) -> Self {
        Self { memory, size }
    }

    /// One past the last byte
    #[inline]
    pub fn end(&self) -> *mut u8 {
        self.memory.as_ptr().wrapping_add(self.size)
    }

    /// Whether `ptr` points into the region
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.memory.as_ptr().addr();
        let addr = ptr.addr();
        addr >= start && addr - start < self.size
    }
}

/// Source of memory blocks for an arena
pub trait BlockAllocator {
    /// Allocates the next block
    fn allocate_block(&mut self) -> MemoryResult<MemoryBlock>;

    /// Returns a block
    ///
    /// # Safety
    /// `block` must come from `allocate_block` on this allocator, blocks
    /// must be returned in reverse allocation order and no memory inside
    /// the block may be used afterwards.
    unsafe fn deallocate_block(&mut self, block: MemoryBlock);

    /// Size of the block the next `allocate_block` call returns
    fn block_size(&self) -> usize;
}

// ============================================================================
// GrowingBlockAllocator
// ============================================================================

/// Block allocator with geometric growth
///
/// The block size is multiplied by `NUM / DEN` after every allocation,
/// giving amortized constant-time growth of whatever sits on top.
#[derive(Debug)]
pub struct GrowingBlockAllocator<A: RawAllocator = HeapAllocator, const NUM: usize = 2, const DEN: usize = 1>
{
    allocator: A,
    block_size: usize,
}

impl<A: RawAllocator, const NUM: usize, const DEN: usize> GrowingBlockAllocator<A, NUM, DEN> {
    const VALID_FACTOR: () = assert!(DEN > 0 && NUM >= DEN, "growth factor must be at least 1");

    /// Creates an allocator whose first block is `block_size` bytes
    pub fn new(block_size: usize) -> Self
    where
        A: Default,
    {
        Self::with_allocator(block_size, A::default())
    }

    /// Creates an allocator drawing blocks from `allocator`
    pub fn with_allocator(block_size: usize, allocator: A) -> Self {
        let () = Self::VALID_FACTOR;
        Self {
            allocator,
            block_size,
        }
    }

    /// Factor applied after each allocation
    pub fn growth_factor() -> f64 {
        NUM as f64 / DEN as f64
    }

    /// The underlying raw allocator
    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

impl<A: RawAllocator, const NUM: usize, const DEN: usize> BlockAllocator
    for GrowingBlockAllocator<A, NUM, DEN>
{
    fn allocate_block(&mut self) -> MemoryResult<MemoryBlock> {
        let size = self.block_size;
        let memory = self.allocator.allocate_node(size, MAX_ALIGNMENT)?;
        self.block_size = size.saturating_mul(NUM) / DEN;
        Ok(MemoryBlock::new(memory, size))
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        // SAFETY: the block came from `allocate_block` with this size and
        // `MAX_ALIGNMENT`.
        unsafe {
            self.allocator
                .deallocate_node(block.memory, block.size, MAX_ALIGNMENT);
        }
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}

// ============================================================================
// FixedBlockAllocator
// ============================================================================

/// Block allocator that owns exactly one block's worth of memory
///
/// A second `allocate_block` before the first block is returned fails with
/// [`MemoryError::OutOfFixedMemory`].
#[derive(Debug)]
pub struct FixedBlockAllocator<A: RawAllocator = HeapAllocator> {
    allocator: A,
    block_size: usize,
    available: bool,
}

impl<A: RawAllocator> FixedBlockAllocator<A> {
    /// Creates an allocator for one block of `block_size` bytes
    pub fn new(block_size: usize) -> Self
    where
        A: Default,
    {
        Self::with_allocator(block_size, A::default())
    }

    /// Creates an allocator drawing its block from `allocator`
    pub fn with_allocator(block_size: usize, allocator: A) -> Self {
        Self {
            allocator,
            block_size,
            available: true,
        }
    }

    /// Whether the block is currently handed out
    pub fn is_exhausted(&self) -> bool {
        !self.available
    }
}

impl<A: RawAllocator> BlockAllocator for FixedBlockAllocator<A> {
    fn allocate_block(&mut self) -> MemoryResult<MemoryBlock> {
        if !self.available {
            return Err(MemoryError::out_of_fixed_memory(
                "foundation_memory::FixedBlockAllocator",
                self.block_size,
            ));
        }
        let memory = self.allocator.allocate_node(self.block_size, MAX_ALIGNMENT)?;
        self.available = false;
        Ok(MemoryBlock::new(memory, self.block_size))
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        debug_assert!(!self.available, "block returned twice");
        debug_assert_eq!(block.size, self.block_size);
        // SAFETY: the block came from `allocate_block`.
        unsafe {
            self.allocator
                .deallocate_node(block.memory, block.size, MAX_ALIGNMENT);
        }
        self.available = true;
    }

    fn block_size(&self) -> usize {
        if self.available { self.block_size } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_aligned_ptr;

    #[test]
    fn growing_doubles_by_default() {
        let mut blocks = GrowingBlockAllocator::<HeapAllocator>::new(64);
        let first = blocks.allocate_block().unwrap();
        let second = blocks.allocate_block().unwrap();
        assert_eq!(first.size, 64);
        assert_eq!(second.size, 128);
        assert_eq!(blocks.block_size(), 256);
        assert!(is_aligned_ptr(first.memory.as_ptr(), MAX_ALIGNMENT));
        unsafe {
            blocks.deallocate_block(second);
            blocks.deallocate_block(first);
        }
    }

    #[test]
    fn growing_custom_factor() {
        let mut blocks = GrowingBlockAllocator::<HeapAllocator, 3, 2>::new(100);
        let block = blocks.allocate_block().unwrap();
        assert_eq!(blocks.block_size(), 150);
        assert!((GrowingBlockAllocator::<HeapAllocator, 3, 2>::growth_factor() - 1.5).abs() < 1e-9);
        unsafe { blocks.deallocate_block(block) };
    }

    #[test]
    fn fixed_allocates_once() {
        let mut blocks = FixedBlockAllocator::<HeapAllocator>::new(256);
        let block = blocks.allocate_block().unwrap();
        assert_eq!(blocks.block_size(), 0);

        let error = blocks.allocate_block().unwrap_err();
        assert!(matches!(error, MemoryError::OutOfFixedMemory { amount: 256, .. }));

        unsafe { blocks.deallocate_block(block) };
        assert_eq!(blocks.block_size(), 256);
        let again = blocks.allocate_block().unwrap();
        unsafe { blocks.deallocate_block(again) };
    }

    #[test]
    fn block_contains() {
        let mut storage = [0u8; 32];
        let block = MemoryBlock::new(NonNull::from(&mut storage).cast(), 32);
        assert!(block.contains(storage.as_ptr()));
        assert!(block.contains(storage.as_ptr().wrapping_add(31)));
        assert!(!block.contains(storage.as_ptr().wrapping_add(32)));
    }
}

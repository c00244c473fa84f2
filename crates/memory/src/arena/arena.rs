//! Memory arena: block ownership for higher-level allocators
//!
//! A [`MemoryArena`] keeps the blocks it got from a [`BlockAllocator`] on an
//! intrusive [`BlockStack`]. With caching enabled (the default), blocks
//! released by the owner are parked on a second stack and handed out again
//! before any new block is requested.
//!
//! # Invariants
//!
//! - Blocks are released strictly in reverse allocation order
//! - `size()` blocks are in use, `cache_size()` blocks are parked
//! - Everything is returned to the block allocator on drop

use core::fmt;

use crate::block::{BlockAllocator, MemoryBlock};
use crate::error::{MemoryError, MemoryResult};

use super::block_stack::{BLOCK_HEADER_SIZE, BlockStack};

#[cfg(feature = "logging")]
use tracing::{debug, info};

/// LIFO owner of memory blocks with an optional block cache
pub struct MemoryArena<B: BlockAllocator, const CACHED: bool = true> {
    allocator: B,
    used: BlockStack,
    cache: BlockStack,
    used_count: usize,
    cached_count: usize,
}

/// Arena that returns released blocks immediately
pub type UncachedMemoryArena<B> = MemoryArena<B, false>;

impl<B: BlockAllocator, const CACHED: bool> MemoryArena<B, CACHED> {
    /// Creates an arena without allocating
    pub fn new(allocator: B) -> Self {
        Self {
            allocator,
            used: BlockStack::new(),
            cache: BlockStack::new(),
            used_count: 0,
            cached_count: 0,
        }
    }

    /// Smallest block size giving `usable` bytes after the header
    pub const fn min_block_size(usable: usize) -> usize {
        BLOCK_HEADER_SIZE + usable
    }

    /// Makes a block current and returns its usable part
    ///
    /// A cached block is reused when available; otherwise a new block is
    /// requested from the block allocator. A block with no room after its
    /// header is handed back and reported as an invalid configuration.
    pub fn allocate_block(&mut self) -> MemoryResult<MemoryBlock> {
        if CACHED {
            if let Some(block) = self.used.steal_top(&mut self.cache) {
                self.cached_count -= 1;
                self.used_count += 1;
                return Ok(block);
            }
        }

        let block = self.allocator.allocate_block()?;
        if block.size <= BLOCK_HEADER_SIZE {
            // SAFETY: the block was just allocated and never handed out.
            unsafe { self.allocator.deallocate_block(block) };
            return Err(MemoryError::invalid_config(
                "block size must exceed the block header",
            ));
        }
        // SAFETY: fresh blocks from the block allocator are aligned and not
        // part of any stack.
        let usable = unsafe { self.used.push(block) };
        self.used_count += 1;

        #[cfg(feature = "logging")]
        debug!(
            size = block.size,
            blocks = self.used_count,
            "arena allocated block"
        );

        Ok(usable)
    }

    /// Releases the current block
    ///
    /// # Safety
    /// No memory inside the current block may be used afterwards.
    pub unsafe fn deallocate_block(&mut self) {
        debug_assert!(!self.used.is_empty(), "arena has no block to release");

        if CACHED {
            if self.cache.steal_top(&mut self.used).is_some() {
                self.used_count -= 1;
                self.cached_count += 1;
            }
        } else if let Some(block) = self.used.pop() {
            self.used_count -= 1;
            // SAFETY: the top block was the most recently allocated one.
            unsafe { self.allocator.deallocate_block(block) };

            #[cfg(feature = "logging")]
            debug!(
                size = block.size,
                blocks = self.used_count,
                "arena released block"
            );
        }
    }

    /// Returns every cached block to the block allocator
    pub fn shrink_to_fit(&mut self) {
        if self.cache.is_empty() {
            return;
        }

        // Cached blocks sit in reverse order, flip them first so the block
        // allocator sees LIFO deallocation.
        let mut reversed = BlockStack::new();
        while reversed.steal_top(&mut self.cache).is_some() {}

        #[cfg(feature = "logging")]
        info!(blocks = self.cached_count, "arena shrinking cache");

        while let Some(block) = reversed.pop() {
            // SAFETY: cached blocks hold no live memory.
            unsafe { self.allocator.deallocate_block(block) };
        }
        self.cached_count = 0;
    }

    /// Whether `ptr` lies inside a block in use
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.used.owns(ptr)
    }

    /// Usable part of the current block
    pub fn current_block(&self) -> Option<MemoryBlock> {
        self.used.top()
    }

    /// Number of blocks in use
    pub fn size(&self) -> usize {
        self.used_count
    }

    /// Number of blocks owned, in use or cached
    pub fn capacity(&self) -> usize {
        self.used_count + self.cached_count
    }

    /// Number of cached blocks
    pub fn cache_size(&self) -> usize {
        self.cached_count
    }

    /// Usable size of the block the next `allocate_block` returns
    pub fn next_block_size(&self) -> usize {
        if CACHED {
            if let Some(block) = self.cache.top() {
                return block.size;
            }
        }
        self.allocator.block_size().saturating_sub(BLOCK_HEADER_SIZE)
    }

    /// The block allocator
    pub fn allocator(&self) -> &B {
        &self.allocator
    }

    /// The block allocator, mutably
    pub fn allocator_mut(&mut self) -> &mut B {
        &mut self.allocator
    }
}

impl<B: BlockAllocator, const CACHED: bool> Drop for MemoryArena<B, CACHED> {
    fn drop(&mut self) {
        while let Some(block) = self.used.pop() {
            // SAFETY: the arena is going away, popping is LIFO.
            unsafe { self.allocator.deallocate_block(block) };
        }
        self.used_count = 0;
        self.shrink_to_fit();
    }
}

impl<B: BlockAllocator, const CACHED: bool> fmt::Debug for MemoryArena<B, CACHED> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryArena")
            .field("cached", &CACHED)
            .field("size", &self.used_count)
            .field("cache_size", &self.cached_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::GrowingBlockAllocator;

    #[test]
    fn cached_arena_reuses_blocks() {
        let mut arena: MemoryArena<GrowingBlockAllocator> =
            MemoryArena::new(GrowingBlockAllocator::new(256));

        let first = arena.allocate_block().unwrap();
        let second = arena.allocate_block().unwrap();
        assert_eq!(arena.size(), 2);
        assert!(arena.owns(second.memory.as_ptr()));

        unsafe { arena.deallocate_block() };
        assert_eq!(arena.size(), 1);
        assert_eq!(arena.cache_size(), 1);
        assert_eq!(arena.next_block_size(), second.size);
        assert!(!arena.owns(second.memory.as_ptr()));

        let again = arena.allocate_block().unwrap();
        assert_eq!(again, second);
        assert_eq!(arena.cache_size(), 0);
        assert_eq!(arena.current_block(), Some(again));
        assert!(arena.owns(first.memory.as_ptr()));
    }

    #[test]
    fn shrink_releases_cache() {
        let mut arena: MemoryArena<GrowingBlockAllocator> =
            MemoryArena::new(GrowingBlockAllocator::new(128));
        arena.allocate_block().unwrap();
        arena.allocate_block().unwrap();
        arena.allocate_block().unwrap();
        unsafe {
            arena.deallocate_block();
            arena.deallocate_block();
        }
        assert_eq!(arena.capacity(), 3);

        arena.shrink_to_fit();
        assert_eq!(arena.capacity(), 1);
        assert_eq!(arena.cache_size(), 0);
        assert_eq!(
            arena.next_block_size(),
            arena.allocator().block_size() - BLOCK_HEADER_SIZE
        );
    }

    #[test]
    fn blocks_without_usable_space_are_rejected() {
        for size in [0, 1, BLOCK_HEADER_SIZE] {
            let mut arena: MemoryArena<GrowingBlockAllocator> =
                MemoryArena::new(GrowingBlockAllocator::new(size));
            let error = arena.allocate_block().unwrap_err();
            assert!(matches!(error, MemoryError::InvalidConfig { .. }));
            assert_eq!(arena.size(), 0);
        }
    }

    #[test]
    fn uncached_arena_returns_blocks() {
        let mut arena: UncachedMemoryArena<GrowingBlockAllocator> =
            MemoryArena::new(GrowingBlockAllocator::new(128));
        arena.allocate_block().unwrap();
        unsafe { arena.deallocate_block() };
        assert_eq!(arena.capacity(), 0);
        assert_eq!(arena.cache_size(), 0);
    }
}

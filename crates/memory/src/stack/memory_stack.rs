//! Growing memory stack
//!
//! [`MemoryStack`] bump-allocates inside the current block of a cached
//! [`MemoryArena`]. When a request does not fit, the next block is pulled
//! from the arena and the bump pointer restarts at its beginning; this is
//! the only growth path.
//!
//! Memory is never returned individually. A [`StackMarker`] taken with
//! [`MemoryStack::top`] records the position, and [`MemoryStack::unwind`]
//! releases everything allocated after it, handing blocks allocated since
//! back to the arena cache.
//!
//! # Invariants
//!
//! - `stack.top()` always lies inside the current block, `end` is its end
//! - A marker's block index is the number of blocks in use when it was taken
//! - Markers must be unwound in LIFO order

use core::fmt;
use core::ptr::NonNull;

use crate::allocator::{ComposableAllocator, RawAllocator, StatefulHandle};
use crate::arena::{BLOCK_HEADER_SIZE, MemoryArena};
use crate::block::{BlockAllocator, GrowingBlockAllocator};
use crate::config::{DEBUG_FENCE_SIZE, MAX_ALIGNMENT};
use crate::debugging::{AllocatorInfo, DebugMagic, debug_check_pointer, debug_fill};
use crate::error::{MemoryError, MemoryResult};

use super::fixed::FixedMemoryStack;
use super::marker::StackMarker;

const NAME: &str = "foundation_memory::MemoryStack";

/// Block-growing stack allocator
pub struct MemoryStack<B: BlockAllocator = GrowingBlockAllocator> {
    arena: MemoryArena<B>,
    stack: FixedMemoryStack,
    end: *mut u8,
}

// SAFETY: the stack pointers refer into blocks owned by the arena.
unsafe impl<B: BlockAllocator + Send> Send for MemoryStack<B> {}

impl MemoryStack<GrowingBlockAllocator> {
    /// Creates a stack whose first block is `block_size` bytes
    pub fn new(block_size: usize) -> MemoryResult<Self> {
        Self::with_block_allocator(GrowingBlockAllocator::new(block_size))
    }

    /// Block size giving `size` bytes of stack memory in the first block
    pub const fn min_block_size(size: usize) -> usize {
        BLOCK_HEADER_SIZE + size
    }
}

impl<B: BlockAllocator> MemoryStack<B> {
    /// Creates a stack and allocates its first block
    pub fn with_block_allocator(block_allocator: B) -> MemoryResult<Self> {
        let mut arena = MemoryArena::new(block_allocator);
        let block = arena.allocate_block()?;
        Ok(Self {
            arena,
            stack: FixedMemoryStack::new(block.memory.as_ptr()),
            end: block.end(),
        })
    }

    /// Allocates `size` bytes aligned to `alignment`, growing if needed
    pub fn allocate(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            return Err(MemoryError::bad_alignment(NAME, alignment, self.max_alignment()));
        }
        if let Some(memory) = self.try_allocate(size, alignment) {
            return Ok(memory);
        }

        // New blocks start MAX_ALIGNMENT aligned, stricter requests pay padding.
        let padding = alignment.saturating_sub(MAX_ALIGNMENT);
        let needed = size
            .saturating_add(padding)
            .saturating_add(2 * DEBUG_FENCE_SIZE);
        let next = self.arena.next_block_size();
        if needed > next {
            return Err(MemoryError::bad_node_size(NAME, needed, next));
        }

        let block = self.arena.allocate_block()?;
        self.stack = FixedMemoryStack::new(block.memory.as_ptr());
        self.end = block.end();

        self.try_allocate(size, alignment)
            .ok_or_else(|| MemoryError::out_of_memory(NAME, size))
    }

    /// Allocates inside the current block only
    pub fn try_allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            return None;
        }
        // SAFETY: `[top, end)` is the unused part of the current block.
        unsafe {
            self.stack
                .allocate(self.end, size, alignment, DEBUG_FENCE_SIZE)
        }
    }

    /// Marker for the current position
    pub fn top(&self) -> StackMarker {
        StackMarker {
            index: self.arena.size(),
            top: self.stack.top(),
            end: self.end,
        }
    }

    /// Releases everything allocated after `marker`
    ///
    /// Blocks allocated since the marker go back to the arena cache. A
    /// marker newer than the current position is reported to the
    /// invalid-pointer handler and ignored.
    ///
    /// # Safety
    /// `marker` must come from this stack, and memory allocated after it
    /// must not be used afterwards.
    pub unsafe fn unwind(&mut self, marker: StackMarker) {
        if marker.index > self.arena.size() {
            debug_check_pointer(|| false, self.info(), marker.top);
            return;
        }

        if marker.index < self.arena.size() {
            while self.arena.size() > marker.index {
                // SAFETY: the blocks above the marker hold only memory
                // allocated after it.
                unsafe { self.arena.deallocate_block() };
            }
            let freed = marker.end.addr().saturating_sub(marker.top.addr());
            // SAFETY: the tail of the marker's block is stack memory.
            unsafe { debug_fill(marker.top, freed, DebugMagic::FreedMemory) };
            self.stack = FixedMemoryStack::new(marker.top);
            self.end = marker.end;
        } else if marker.top.addr() > self.stack.top().addr() {
            debug_check_pointer(|| false, self.info(), marker.top);
        } else {
            // SAFETY: same block, `marker.top` is a previous position.
            unsafe { self.stack.unwind(marker.top) };
        }
    }

    /// Bytes left in the current block
    pub fn capacity_left(&self) -> usize {
        self.stack.remaining(self.end)
    }

    /// Usable size of the block the stack grows into next
    pub fn next_capacity(&self) -> usize {
        self.arena.next_block_size()
    }

    /// Returns cached blocks to the block allocator
    pub fn shrink_to_fit(&mut self) {
        self.arena.shrink_to_fit();
    }

    /// Number of blocks in use
    pub fn block_count(&self) -> usize {
        self.arena.size()
    }

    /// Number of cached blocks
    pub fn cache_size(&self) -> usize {
        self.arena.cache_size()
    }

    /// Whether `ptr` lies inside a block in use
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.arena.owns(ptr)
    }

    /// The block allocator
    pub fn block_allocator(&self) -> &B {
        self.arena.allocator()
    }
}

/// Largest power of two not above `capacity`
fn alignment_limit(capacity: usize) -> usize {
    if capacity == 0 {
        1
    } else {
        1 << capacity.ilog2()
    }
}

// SAFETY: allocations are carved from blocks owned by the arena and stay
// valid until unwound.
unsafe impl<B: BlockAllocator> RawAllocator for MemoryStack<B> {
    type Handle<'a>
        = StatefulHandle<'a, Self>
    where
        Self: 'a;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        self.allocate(size, alignment)
    }

    unsafe fn deallocate_node(&mut self, _ptr: NonNull<u8>, _size: usize, _alignment: usize) {}

    fn max_node_size(&self) -> usize {
        self.next_capacity()
    }

    fn max_alignment(&self) -> usize {
        alignment_limit(self.next_capacity()).max(MAX_ALIGNMENT)
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of(NAME, self)
    }
}

// SAFETY: `try_allocate` never grows, ownership is checked against the arena.
unsafe impl<B: BlockAllocator> ComposableAllocator for MemoryStack<B> {
    fn try_allocate_node(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.try_allocate(size, alignment)
    }

    unsafe fn try_deallocate_node(
        &mut self,
        ptr: NonNull<u8>,
        _size: usize,
        _alignment: usize,
    ) -> bool {
        self.owns(ptr.as_ptr())
    }
}

impl<B: BlockAllocator> fmt::Debug for MemoryStack<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStack")
            .field("blocks", &self.arena.size())
            .field("capacity_left", &self.capacity_left())
            .field("next_capacity", &self.next_capacity())
            .finish()
    }
}

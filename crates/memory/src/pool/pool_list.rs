//! Bucketed pool of many node sizes
//!
//! [`MemoryPoolList`] keeps one free list per size class. Buckets start out
//! empty; the first request for a size class reserves a slice of the
//! current arena block through a [`FixedMemoryStack`] staging area and
//! seeds the bucket's free list with it. When the staging block runs out,
//! its remainder is handed to the largest bucket that can use it and the
//! next block is pulled from the arena.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::allocator::traits::{array_bytes, check_node_request};
use crate::allocator::{ComposableAllocator, RawAllocator, StatefulHandle};
use crate::arena::UncachedMemoryArena;
use crate::block::{BlockAllocator, GrowingBlockAllocator};
use crate::config::{DEBUG_FENCE_SIZE, MAX_ALIGNMENT};
use crate::debugging::{
    AllocatorInfo, LeakChecker, debug_check_pointer, debug_fill_free, debug_fill_new,
};
use crate::error::{MemoryError, MemoryResult};
use crate::free_list::FreeList;
use crate::stack::FixedMemoryStack;
use crate::utils::align_offset;

use super::{BucketType, IdentityBuckets, NodePool, PoolType};

const NAME: &str = "foundation_memory::MemoryPoolList";

/// Pool serving every node size up to a maximum
pub struct MemoryPoolList<
    P: PoolType = NodePool,
    K: BucketType = IdentityBuckets,
    B: BlockAllocator = GrowingBlockAllocator,
> {
    arena: UncachedMemoryArena<B>,
    stack: FixedMemoryStack,
    stack_end: *mut u8,
    pools: Box<[P::List]>,
    max_node_size: usize,
    leak: LeakChecker,
    _buckets: PhantomData<(P, K)>,
}

// SAFETY: the staging pointers refer into blocks owned by the arena.
unsafe impl<P, K, B> Send for MemoryPoolList<P, K, B>
where
    P: PoolType,
    P::List: Send,
    K: BucketType,
    B: BlockAllocator + Send,
{
}

impl<P: PoolType, K: BucketType> MemoryPoolList<P, K, GrowingBlockAllocator> {
    /// Creates a pool list for sizes up to `max_node_size`
    pub fn new(max_node_size: usize, block_size: usize) -> MemoryResult<Self> {
        Self::with_block_allocator(max_node_size, GrowingBlockAllocator::new(block_size))
    }
}

impl<P: PoolType, K: BucketType, B: BlockAllocator> MemoryPoolList<P, K, B> {
    /// Creates a pool list and pulls the first staging block
    pub fn with_block_allocator(max_node_size: usize, block_allocator: B) -> MemoryResult<Self> {
        if max_node_size == 0 {
            return Err(MemoryError::invalid_config("pool list maximum node size must be nonzero"));
        }

        let count = K::bucket_count(max_node_size);
        let pools = (0..count)
            .map(|index| P::List::new(K::size_from_index(index) + 2 * DEBUG_FENCE_SIZE))
            .collect();

        let mut arena = UncachedMemoryArena::new(block_allocator);
        let block = arena.allocate_block()?;
        Ok(Self {
            arena,
            stack: FixedMemoryStack::new(block.memory.as_ptr()),
            stack_end: block.end(),
            pools,
            max_node_size: K::size_from_index(count - 1),
            leak: LeakChecker::new(),
            _buckets: PhantomData,
        })
    }

    fn bucket(&self, node_size: usize) -> Option<usize> {
        (node_size <= self.max_node_size).then(|| K::index_from_size(node_size))
    }

    fn bucket_or_error(&self, node_size: usize) -> MemoryResult<usize> {
        self.bucket(node_size)
            .ok_or_else(|| MemoryError::bad_node_size(NAME, node_size, self.max_node_size))
    }

    /// Default number of bytes reserved for a bucket at once
    fn default_capacity(&self, index: usize) -> usize {
        let share = self.arena.next_block_size() / self.pools.len();
        share.max(self.pools[index].node_size())
    }

    /// Gives the unused staging bytes to the largest bucket that fits them
    fn donate_remainder(&mut self) {
        let top = self.stack.top();
        let remaining = self.stack.remaining(self.stack_end);

        for list in self.pools.iter_mut().rev() {
            let offset = align_offset(top, list.alignment());
            let usable = list.usable_size(remaining.saturating_sub(offset));
            if usable == 0 {
                continue;
            }
            // SAFETY: the staging area is the unused tail of an arena block.
            if let Some(memory) = unsafe {
                self.stack
                    .allocate(self.stack_end, usable, list.alignment(), 0)
            } {
                // SAFETY: `usable` bytes were just carved for this list.
                unsafe { list.insert(memory, usable) };
            }
            return;
        }
    }

    /// Seeds bucket `index` with `capacity` bytes from the staging area
    fn reserve_memory(&mut self, index: usize, capacity: usize) -> MemoryResult<()> {
        let alignment = self.pools[index].alignment();
        // SAFETY: the staging area is the unused tail of an arena block.
        let mut memory = unsafe { self.stack.allocate(self.stack_end, capacity, alignment, 0) };

        if memory.is_none() {
            self.donate_remainder();
            let block = self.arena.allocate_block()?;
            self.stack = FixedMemoryStack::new(block.memory.as_ptr());
            self.stack_end = block.end();
            // SAFETY: as above, on the fresh block.
            memory = unsafe { self.stack.allocate(self.stack_end, capacity, alignment, 0) };
        }

        let memory = memory.ok_or_else(|| MemoryError::out_of_memory(NAME, capacity))?;
        // SAFETY: `capacity` bytes were carved for this bucket.
        unsafe { self.pools[index].insert(memory, capacity) };
        Ok(())
    }

    fn hand_out(&mut self, node: NonNull<u8>, size: usize) -> NonNull<u8> {
        self.leak.on_allocate(size);
        // SAFETY: the node spans `size + 2 * DEBUG_FENCE_SIZE` bytes.
        unsafe {
            debug_fill_new(node.as_ptr(), size, DEBUG_FENCE_SIZE);
            node.add(DEBUG_FENCE_SIZE)
        }
    }

    unsafe fn take_back(&mut self, ptr: NonNull<u8>, size: usize) -> NonNull<u8> {
        debug_check_pointer(|| self.arena.owns(ptr.as_ptr()), self.info(), ptr.as_ptr());
        self.leak.on_deallocate(size);
        // SAFETY: the payload is surrounded by its fences.
        unsafe {
            debug_fill_free(ptr.as_ptr(), size, DEBUG_FENCE_SIZE);
            ptr.sub(DEBUG_FENCE_SIZE)
        }
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Allocates a node of `node_size` bytes, reserving memory if needed
    pub fn allocate(&mut self, node_size: usize) -> MemoryResult<NonNull<u8>> {
        let index = self.bucket_or_error(node_size)?;
        if self.pools[index].is_empty() {
            self.reserve_memory(index, self.default_capacity(index))?;
        }
        let node = self.pools[index]
            .allocate()
            .ok_or_else(|| MemoryError::out_of_memory(NAME, node_size))?;
        Ok(self.hand_out(node, K::size_from_index(index)))
    }

    /// Allocates from the bucket's free list only
    pub fn try_allocate(&mut self, node_size: usize) -> Option<NonNull<u8>> {
        let index = self.bucket(node_size)?;
        let node = self.pools[index].allocate()?;
        Some(self.hand_out(node, K::size_from_index(index)))
    }

    /// Returns a node
    ///
    /// # Safety
    /// `ptr` must come from `allocate(node_size)` on this pool list and not
    /// be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, node_size: usize) {
        let Some(index) = self.bucket(node_size) else {
            debug_check_pointer(|| false, self.info(), ptr.as_ptr());
            return;
        };
        // SAFETY: forwarded caller contract.
        unsafe {
            let node = self.take_back(ptr, K::size_from_index(index));
            self.pools[index].deallocate(node);
        }
    }

    /// Returns a node if the pool list owns it
    ///
    /// # Safety
    /// If the pool list owns `ptr` the [`deallocate`](Self::deallocate)
    /// contract applies.
    pub unsafe fn try_deallocate(&mut self, ptr: NonNull<u8>, node_size: usize) -> bool {
        if self.bucket(node_size).is_none() || !self.arena.owns(ptr.as_ptr()) {
            return false;
        }
        // SAFETY: owned by this pool list.
        unsafe { self.deallocate(ptr, node_size) };
        true
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    /// Allocates `count` contiguous nodes of `node_size` bytes
    pub fn allocate_nodes(&mut self, count: usize, node_size: usize) -> MemoryResult<NonNull<u8>> {
        let index = self.bucket_or_error(node_size)?;
        let bytes = array_bytes(NAME, count, K::size_from_index(index), self.max_array_size())?;
        let total = bytes + 2 * DEBUG_FENCE_SIZE;

        let node = match self.pools[index].allocate_array(total) {
            Some(node) => node,
            None => {
                let list_node = self.pools[index].node_size();
                let capacity = self
                    .default_capacity(index)
                    .max(total.div_ceil(list_node) * list_node);
                self.reserve_memory(index, capacity)?;
                self.pools[index]
                    .allocate_array(total)
                    .ok_or_else(|| MemoryError::out_of_memory(NAME, bytes))?
            }
        };
        Ok(self.hand_out(node, bytes))
    }

    /// Allocates `count` contiguous nodes from the bucket's free list only
    pub fn try_allocate_nodes(&mut self, count: usize, node_size: usize) -> Option<NonNull<u8>> {
        let index = self.bucket(node_size)?;
        let bytes = count.checked_mul(K::size_from_index(index))?;
        let node = self.pools[index].allocate_array(bytes + 2 * DEBUG_FENCE_SIZE)?;
        Some(self.hand_out(node, bytes))
    }

    /// Returns `count` contiguous nodes
    ///
    /// # Safety
    /// `ptr` must come from `allocate_nodes(count, node_size)` on this pool
    /// list and not be used afterwards.
    pub unsafe fn deallocate_nodes(&mut self, ptr: NonNull<u8>, count: usize, node_size: usize) {
        let Some(index) = self.bucket(node_size) else {
            debug_check_pointer(|| false, self.info(), ptr.as_ptr());
            return;
        };
        let bytes = count * K::size_from_index(index);
        // SAFETY: forwarded caller contract.
        unsafe {
            let node = self.take_back(ptr, bytes);
            self.pools[index].deallocate_array(node, bytes + 2 * DEBUG_FENCE_SIZE);
        }
    }

    /// Returns `count` contiguous nodes if the pool list owns them
    ///
    /// # Safety
    /// If the pool list owns `ptr` the
    /// [`deallocate_nodes`](Self::deallocate_nodes) contract applies.
    pub unsafe fn try_deallocate_nodes(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        node_size: usize,
    ) -> bool {
        if self.bucket(node_size).is_none() || !self.arena.owns(ptr.as_ptr()) {
            return false;
        }
        // SAFETY: owned by this pool list.
        unsafe { self.deallocate_nodes(ptr, count, node_size) };
        true
    }

    // ========================================================================
    // Capacity
    // ========================================================================

    /// Reserves `capacity` bytes for nodes of `node_size`
    pub fn reserve(&mut self, node_size: usize, capacity: usize) -> MemoryResult<()> {
        let index = self.bucket_or_error(node_size)?;
        self.reserve_memory(index, capacity)
    }

    /// Payload bytes available in the bucket serving `node_size`
    pub fn pool_capacity_left(&self, node_size: usize) -> usize {
        self.bucket(node_size).map_or(0, |index| {
            self.pools[index].capacity() * K::size_from_index(index)
        })
    }

    /// Bytes left in the staging area
    pub fn capacity_left(&self) -> usize {
        self.stack.remaining(self.stack_end)
    }

    /// Usable size of the next staging block
    pub fn next_capacity(&self) -> usize {
        self.arena.next_block_size()
    }

    /// Largest node size served
    pub fn max_node_size(&self) -> usize {
        self.max_node_size
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> usize {
        self.pools.len()
    }
}

// SAFETY: nodes are carved from arena blocks that live as long as the list.
unsafe impl<P: PoolType, K: BucketType, B: BlockAllocator> RawAllocator
    for MemoryPoolList<P, K, B>
{
    type Handle<'a>
        = StatefulHandle<'a, Self>
    where
        Self: 'a;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        let index = self.bucket_or_error(size)?;
        check_node_request(NAME, size, self.max_node_size, alignment, self.pools[index].alignment())?;
        self.allocate(size)
    }

    unsafe fn deallocate_node(&mut self, ptr: NonNull<u8>, size: usize, _alignment: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate(ptr, size) };
    }

    fn allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        let index = self.bucket_or_error(size)?;
        check_node_request(NAME, size, self.max_node_size, alignment, self.pools[index].alignment())?;
        self.allocate_nodes(count, size)
    }

    unsafe fn deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        _alignment: usize,
    ) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_nodes(ptr, count, size) };
    }

    fn max_node_size(&self) -> usize {
        self.max_node_size
    }

    fn max_array_size(&self) -> usize {
        self.arena
            .next_block_size()
            .saturating_sub(2 * DEBUG_FENCE_SIZE)
    }

    fn max_alignment(&self) -> usize {
        MAX_ALIGNMENT
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of(NAME, self)
    }
}

// SAFETY: `try_*` never reserve, ownership is checked against the arena.
unsafe impl<P: PoolType, K: BucketType, B: BlockAllocator> ComposableAllocator
    for MemoryPoolList<P, K, B>
{
    fn try_allocate_node(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        let index = self.bucket(size)?;
        if alignment > self.pools[index].alignment() {
            return None;
        }
        self.try_allocate(size)
    }

    fn try_allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        let index = self.bucket(size)?;
        if alignment > self.pools[index].alignment() {
            return None;
        }
        self.try_allocate_nodes(count, size)
    }

    unsafe fn try_deallocate_node(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        _alignment: usize,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.try_deallocate(ptr, size) }
    }

    unsafe fn try_deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        _alignment: usize,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.try_deallocate_nodes(ptr, count, size) }
    }
}

impl<P: PoolType, K: BucketType, B: BlockAllocator> Drop for MemoryPoolList<P, K, B> {
    fn drop(&mut self) {
        self.leak.check(self.info());
    }
}

impl<P: PoolType, K: BucketType, B: BlockAllocator> fmt::Debug for MemoryPoolList<P, K, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPoolList")
            .field("max_node_size", &self.max_node_size)
            .field("buckets", &self.pools.len())
            .field("capacity_left", &self.capacity_left())
            .finish()
    }
}

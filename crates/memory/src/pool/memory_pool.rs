//! Single-size memory pool
//!
//! [`MemoryPool`] owns an uncached [`MemoryArena`] and one free list. Every
//! block pulled from the arena is sliced into nodes and inserted into the
//! list; the list is refilled only when it runs empty, which is the single
//! growth path. The `try_*` operations never grow.
//!
//! With fences enabled each node is laid out as `[fence][payload][fence]`,
//! so the free list works with `node_size + 2 * DEBUG_FENCE_SIZE` nodes.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::allocator::traits::{array_bytes, check_node_request};
use crate::allocator::{ComposableAllocator, RawAllocator, StatefulHandle};
use crate::arena::{BLOCK_HEADER_SIZE, UncachedMemoryArena};
use crate::block::{BlockAllocator, GrowingBlockAllocator};
use crate::config::DEBUG_FENCE_SIZE;
use crate::debugging::{
    AllocatorInfo, LeakChecker, debug_check_pointer, debug_fill_free, debug_fill_new,
};
use crate::error::{MemoryError, MemoryResult};
use crate::free_list::FreeList;

use super::{NodePool, PoolType};

/// Pool of equally sized nodes
///
/// # Examples
///
/// ```
/// use foundation_memory::pool::{MemoryPool, NodePool};
///
/// let mut pool = MemoryPool::<NodePool>::new(16, 4096)?;
/// let node = pool.allocate()?;
/// unsafe { pool.deallocate(node) };
/// # Ok::<(), foundation_memory::MemoryError>(())
/// ```
pub struct MemoryPool<P: PoolType = NodePool, B: BlockAllocator = GrowingBlockAllocator> {
    arena: UncachedMemoryArena<B>,
    free_list: P::List,
    node_size: usize,
    leak: LeakChecker,
    _pool: PhantomData<P>,
}

impl<P: PoolType> MemoryPool<P, GrowingBlockAllocator> {
    /// Creates a pool of `node_size` nodes with a doubling block size
    pub fn new(node_size: usize, block_size: usize) -> MemoryResult<Self> {
        Self::with_block_allocator(node_size, GrowingBlockAllocator::new(block_size))
    }
}

impl<P: PoolType, B: BlockAllocator> MemoryPool<P, B> {
    /// Smallest node size the pool's free list supports
    pub const MIN_NODE_SIZE: usize = <P::List as FreeList>::MIN_ELEMENT_SIZE;

    /// Creates a pool and fills it with the first block
    pub fn with_block_allocator(node_size: usize, block_allocator: B) -> MemoryResult<Self> {
        if node_size == 0 {
            return Err(MemoryError::invalid_config("pool node size must be nonzero"));
        }

        let node_size = node_size.max(Self::MIN_NODE_SIZE);
        let mut pool = Self {
            arena: UncachedMemoryArena::new(block_allocator),
            free_list: P::List::new(node_size + 2 * DEBUG_FENCE_SIZE),
            node_size,
            leak: LeakChecker::new(),
            _pool: PhantomData,
        };
        pool.grow()?;
        Ok(pool)
    }

    /// Block size giving room for `count` nodes of `node_size` bytes
    pub fn min_block_size(node_size: usize, count: usize) -> usize {
        let node = node_size.max(Self::MIN_NODE_SIZE) + 2 * DEBUG_FENCE_SIZE;
        BLOCK_HEADER_SIZE + count * node
    }

    fn grow(&mut self) -> MemoryResult<()> {
        let block = self.arena.allocate_block()?;
        // SAFETY: the block is aligned and owned by the arena until the pool
        // is dropped.
        unsafe { self.free_list.insert(block.memory, block.size) };
        Ok(())
    }

    fn out_of_memory(&self, amount: usize) -> MemoryError {
        MemoryError::out_of_memory(P::NAME, amount)
    }

    /// Turns a free list node into a fenced payload
    fn hand_out(&mut self, node: NonNull<u8>, size: usize) -> NonNull<u8> {
        self.leak.on_allocate(size);
        // SAFETY: the node spans `size + 2 * DEBUG_FENCE_SIZE` bytes.
        unsafe {
            debug_fill_new(node.as_ptr(), size, DEBUG_FENCE_SIZE);
            node.add(DEBUG_FENCE_SIZE)
        }
    }

    /// Checks and poisons a returned payload, yielding its node
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

    /// Allocates one node, growing when the free list is empty
    pub fn allocate(&mut self) -> MemoryResult<NonNull<u8>> {
        if self.free_list.is_empty() {
            self.grow()?;
        }
        let node = self
            .free_list
            .allocate()
            .ok_or_else(|| self.out_of_memory(self.node_size))?;
        Ok(self.hand_out(node, self.node_size))
    }

    /// Allocates one node without growing
    pub fn try_allocate(&mut self) -> Option<NonNull<u8>> {
        let node = self.free_list.allocate()?;
        Some(self.hand_out(node, self.node_size))
    }

    /// Returns a node
    ///
    /// # Safety
    /// `ptr` must come from this pool's node allocation and not be used
    /// afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe {
            let node = self.take_back(ptr, self.node_size);
            self.free_list.deallocate(node);
        }
    }

    /// Returns a node if the pool owns it
    ///
    /// # Safety
    /// If the pool owns `ptr` the [`deallocate`](Self::deallocate) contract
    /// applies.
    pub unsafe fn try_deallocate(&mut self, ptr: NonNull<u8>) -> bool {
        if !self.arena.owns(ptr.as_ptr()) {
            return false;
        }
        // SAFETY: owned by this pool.
        unsafe { self.deallocate(ptr) };
        true
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    fn allocate_bytes(&mut self, bytes: usize) -> MemoryResult<NonNull<u8>> {
        let total = bytes + 2 * DEBUG_FENCE_SIZE;
        let node = match self.free_list.allocate_array(total) {
            Some(node) => node,
            None => {
                self.grow()?;
                self.free_list
                    .allocate_array(total)
                    .ok_or_else(|| self.out_of_memory(bytes))?
            }
        };
        Ok(self.hand_out(node, bytes))
    }

    fn try_allocate_bytes(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        let node = self
            .free_list
            .allocate_array(bytes + 2 * DEBUG_FENCE_SIZE)?;
        Some(self.hand_out(node, bytes))
    }

    unsafe fn deallocate_bytes(&mut self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe {
            let node = self.take_back(ptr, bytes);
            self.free_list
                .deallocate_array(node, bytes + 2 * DEBUG_FENCE_SIZE);
        }
    }

    /// Allocates `count` contiguous nodes, growing once if needed
    ///
    /// Reliable only for [`ArrayPool`](super::ArrayPool); a [`NodePool`]
    /// finds arrays only in memory that was never fragmented.
    pub fn allocate_nodes(&mut self, count: usize) -> MemoryResult<NonNull<u8>> {
        let bytes = array_bytes(P::NAME, count, self.node_size, self.max_array_size())?;
        self.allocate_bytes(bytes)
    }

    /// Allocates `count` contiguous nodes without growing
    pub fn try_allocate_nodes(&mut self, count: usize) -> Option<NonNull<u8>> {
        let bytes = count.checked_mul(self.node_size)?;
        self.try_allocate_bytes(bytes)
    }

    /// Returns `count` contiguous nodes
    ///
    /// # Safety
    /// `ptr` must come from `allocate_nodes(count)` on this pool and not be
    /// used afterwards.
    pub unsafe fn deallocate_nodes(&mut self, ptr: NonNull<u8>, count: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_bytes(ptr, count * self.node_size) };
    }

    /// Returns `count` contiguous nodes if the pool owns them
    ///
    /// # Safety
    /// If the pool owns `ptr` the [`deallocate_nodes`](Self::deallocate_nodes)
    /// contract applies.
    pub unsafe fn try_deallocate_nodes(&mut self, ptr: NonNull<u8>, count: usize) -> bool {
        if !self.arena.owns(ptr.as_ptr()) {
            return false;
        }
        // SAFETY: owned by this pool.
        unsafe { self.deallocate_nodes(ptr, count) };
        true
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Payload size of each node
    pub fn node_size(&self) -> usize {
        self.node_size
    }

    /// Alignment of every payload
    pub fn alignment(&self) -> usize {
        self.free_list.alignment()
    }

    /// Number of nodes available without growing
    pub fn free_nodes(&self) -> usize {
        self.free_list.capacity()
    }

    /// Payload bytes available without growing
    pub fn capacity_left(&self) -> usize {
        self.free_list.capacity() * self.node_size
    }

    /// Payload bytes the next growth adds
    pub fn next_capacity(&self) -> usize {
        let nodes = self.arena.next_block_size() / self.free_list.node_size();
        nodes * self.node_size
    }

    /// Number of blocks pulled from the block allocator
    pub fn block_count(&self) -> usize {
        self.arena.size()
    }

    /// The block allocator
    pub fn block_allocator(&self) -> &B {
        self.arena.allocator()
    }
}

// SAFETY: nodes are carved from arena blocks that live as long as the pool.
unsafe impl<P: PoolType, B: BlockAllocator> RawAllocator for MemoryPool<P, B> {
    type Handle<'a>
        = StatefulHandle<'a, Self>
    where
        Self: 'a;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        check_node_request(P::NAME, size, self.node_size, alignment, self.alignment())?;
        self.allocate()
    }

    unsafe fn deallocate_node(&mut self, ptr: NonNull<u8>, _size: usize, _alignment: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate(ptr) };
    }

    fn allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        check_node_request(P::NAME, size, self.node_size, alignment, self.alignment())?;
        let bytes = array_bytes(P::NAME, count, size, self.max_array_size())?;
        self.allocate_bytes(bytes)
    }

    unsafe fn deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        _alignment: usize,
    ) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate_bytes(ptr, count * size) };
    }

    fn max_node_size(&self) -> usize {
        self.node_size
    }

    fn max_array_size(&self) -> usize {
        self.arena
            .next_block_size()
            .saturating_sub(2 * DEBUG_FENCE_SIZE)
    }

    fn max_alignment(&self) -> usize {
        self.alignment()
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of(P::NAME, self)
    }
}

// SAFETY: `try_*` never grow, ownership is checked against the arena.
unsafe impl<P: PoolType, B: BlockAllocator> ComposableAllocator for MemoryPool<P, B> {
    fn try_allocate_node(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size > self.node_size || alignment > self.alignment() {
            return None;
        }
        self.try_allocate()
    }

    fn try_allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        if size > self.node_size || alignment > self.alignment() {
            return None;
        }
        self.try_allocate_bytes(count.checked_mul(size)?)
    }

    unsafe fn try_deallocate_node(
        &mut self,
        ptr: NonNull<u8>,
        _size: usize,
        _alignment: usize,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.try_deallocate(ptr) }
    }

    unsafe fn try_deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        _alignment: usize,
    ) -> bool {
        if !self.arena.owns(ptr.as_ptr()) {
            return false;
        }
        // SAFETY: owned by this pool.
        unsafe { self.deallocate_bytes(ptr, count * size) };
        true
    }
}

impl<P: PoolType, B: BlockAllocator> Drop for MemoryPool<P, B> {
    fn drop(&mut self) {
        self.leak.check(self.info());
    }
}

impl<P: PoolType, B: BlockAllocator> fmt::Debug for MemoryPool<P, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("kind", &P::NAME)
            .field("node_size", &self.node_size)
            .field("free_nodes", &self.free_nodes())
            .field("blocks", &self.block_count())
            .finish()
    }
}

//! Pool growth and pool list scenarios.

use std::cell::Cell;
use std::rc::Rc;

use foundation_memory::allocator::{ComposableAllocator, RawAllocator};
use foundation_memory::block::{BlockAllocator, GrowingBlockAllocator, MemoryBlock};
use foundation_memory::pool::{ArrayPool, Log2Buckets, MemoryPool, MemoryPoolList, NodePool};
use foundation_memory::utils::is_aligned_ptr;
use foundation_memory::{MemoryError, MemoryResult};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Test block allocator
// ---------------------------------------------------------------------------

/// Counts the blocks pulled from a growing allocator
struct CountingBlocks {
    inner: GrowingBlockAllocator,
    allocated: Rc<Cell<usize>>,
}

impl CountingBlocks {
    fn new(block_size: usize) -> (Self, Rc<Cell<usize>>) {
        let allocated = Rc::new(Cell::new(0));
        let blocks = Self {
            inner: GrowingBlockAllocator::new(block_size),
            allocated: Rc::clone(&allocated),
        };
        (blocks, allocated)
    }
}

impl BlockAllocator for CountingBlocks {
    fn allocate_block(&mut self) -> MemoryResult<MemoryBlock> {
        let block = self.inner.allocate_block()?;
        self.allocated.set(self.allocated.get() + 1);
        Ok(block)
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        unsafe { self.inner.deallocate_block(block) };
        self.allocated.set(self.allocated.get() - 1);
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }
}

// ---------------------------------------------------------------------------
// MemoryPool
// ---------------------------------------------------------------------------

#[test]
fn pool_grows_exactly_once_when_empty() {
    let (blocks, allocated) = CountingBlocks::new(1024);
    let mut pool = MemoryPool::<NodePool, _>::with_block_allocator(4, blocks).unwrap();
    assert_eq!(allocated.get(), 1);

    let initial = pool.free_nodes();
    assert!(initial > 0);
    assert!(initial <= 1024 / 4);

    let mut nodes: Vec<_> = (0..initial).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(pool.free_nodes(), 0);
    assert_eq!(allocated.get(), 1);

    nodes.push(pool.allocate().unwrap());
    assert_eq!(allocated.get(), 2);
    assert!(pool.free_nodes() > 0);

    for node in nodes {
        unsafe { pool.deallocate(node) };
    }
    drop(pool);
    assert_eq!(allocated.get(), 0);
}

#[test]
fn try_operations_never_grow() {
    let (blocks, allocated) = CountingBlocks::new(256);
    let mut pool = MemoryPool::<NodePool, _>::with_block_allocator(16, blocks).unwrap();

    let nodes: Vec<_> = std::iter::from_fn(|| pool.try_allocate_node(16, 8)).collect();
    assert!(!nodes.is_empty());
    assert_eq!(allocated.get(), 1);

    for node in nodes {
        assert!(unsafe { pool.try_deallocate_node(node, 16, 8) });
    }
}

#[test]
fn blocks_smaller_than_their_header_are_rejected() {
    let node_pool = MemoryPool::<NodePool>::new(8, 8);
    assert!(matches!(node_pool, Err(MemoryError::InvalidConfig { .. })));

    let array_pool = MemoryPool::<ArrayPool>::new(8, 0);
    assert!(matches!(array_pool, Err(MemoryError::InvalidConfig { .. })));

    let pools = MemoryPoolList::<NodePool>::new(64, 8);
    assert!(matches!(pools, Err(MemoryError::InvalidConfig { .. })));

    // One usable byte is accepted; the pool then has no room for a node.
    let block_size = MemoryPool::<NodePool>::min_block_size(8, 0) + 1;
    let mut tiny = MemoryPool::<NodePool>::new(8, block_size).unwrap();
    assert_eq!(tiny.free_nodes(), 0);
    assert!(tiny.try_allocate_node(8, 8).is_none());
}

#[test]
fn pool_capacity_round_trip_in_any_order() {
    let mut pool = MemoryPool::<ArrayPool>::new(24, 4096).unwrap();
    let initial = pool.free_nodes();

    let nodes: Vec<_> = (0..64).map(|_| pool.allocate().unwrap()).collect();
    for node in &nodes {
        assert!(is_aligned_ptr(node.as_ptr(), 8));
    }

    let mut order: Vec<usize> = (0..64).collect();
    order.rotate_left(17);
    order.swap(3, 40);
    for index in order {
        unsafe { pool.deallocate(nodes[index]) };
    }
    assert_eq!(pool.free_nodes(), initial);
}

#[test]
fn pool_as_raw_allocator_arrays() {
    let mut pool = MemoryPool::<ArrayPool>::new(16, 4096).unwrap();
    let array = pool.allocate_array(5, 16, 16).unwrap();
    assert!(is_aligned_ptr(array.as_ptr(), 16));
    assert!(pool.allocate_array(5, 32, 16).unwrap_err().is_bad_allocation_size());
    unsafe { pool.deallocate_array(array, 5, 16, 16) };
}

// ---------------------------------------------------------------------------
// MemoryPoolList
// ---------------------------------------------------------------------------

#[test]
fn pool_list_serves_every_size() {
    let mut pools = MemoryPoolList::<NodePool>::new(64, 4096).unwrap();
    let nodes: Vec<_> = (1..=64)
        .map(|size| (pools.allocate_node(size, 1).unwrap(), size))
        .collect();

    for (node, size) in &nodes {
        unsafe { node.as_ptr().write_bytes(0x5A, *size) };
    }
    for (node, size) in nodes.into_iter().rev() {
        unsafe { pools.deallocate_node(node, size, 1) };
    }
}

#[test]
fn pool_list_bucket_capacity_round_trip() {
    let mut pools = MemoryPoolList::<ArrayPool, Log2Buckets>::new(256, 4096).unwrap();
    pools.reserve(100, 1024).unwrap();
    let before = pools.pool_capacity_left(100);
    assert_eq!(before, 1024);

    let nodes: Vec<_> = (0..8).map(|_| pools.allocate(100).unwrap()).collect();
    assert_eq!(pools.pool_capacity_left(100), before - 8 * 128);
    for node in nodes {
        unsafe { pools.deallocate(node, 100) };
    }
    assert_eq!(pools.pool_capacity_left(100), before);
}

//! Memory pools
//!
//! A pool carves arena blocks into nodes of one size and recycles them
//! through a free list.
//!
//! - [`MemoryPool`]: a single node size
//! - [`MemoryPoolList`]: one free list per size class, selected by a
//!   [`BucketType`]
//!
//! The [`PoolType`] parameter chooses the free list: [`NodePool`] is fastest
//! for single nodes, [`ArrayPool`] keeps nodes sorted so multi-node arrays
//! are found reliably.

mod buckets;
mod memory_pool;
mod pool_list;

use crate::free_list::{FreeList, FreeMemoryList, OrderedFreeMemoryList};

pub use buckets::{BucketType, IdentityBuckets, Log2Buckets};
pub use memory_pool::MemoryPool;
pub use pool_list::MemoryPoolList;

/// Selects the free list backing a pool
pub trait PoolType {
    /// Free list implementation
    type List: FreeList;

    /// Allocator name reported in errors and diagnostics
    const NAME: &'static str;
}

/// Pool optimized for single-node allocations
#[derive(Debug, Clone, Copy, Default)]
pub struct NodePool;

impl PoolType for NodePool {
    type List = FreeMemoryList;
    const NAME: &'static str = "foundation_memory::MemoryPool<NodePool>";
}

/// Pool that also serves contiguous arrays of nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayPool;

impl PoolType for ArrayPool {
    type List = OrderedFreeMemoryList;
    const NAME: &'static str = "foundation_memory::MemoryPool<ArrayPool>";
}

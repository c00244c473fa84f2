//! # foundation-memory
//!
//! Composable memory allocators for performance-sensitive code.
//!
//! This crate provides building blocks that stack on top of each other:
//! - A small raw allocator contract ([`RawAllocator`]) with an optional
//!   composable `try_*` extension
//! - Block allocators and arenas that hand out and recycle large blocks
//! - Free lists, node pools and bucketed pool lists
//! - A growing memory stack with markers and RAII unwinding
//! - Per-thread scratch memory with scoped temporary allocators
//! - Storage wrappers that reference, share, lock or type-erase allocators
//!
//! ## Quick Start
//!
//! ```rust
//! use foundation_memory::prelude::*;
//!
//! // A pool of 32-byte nodes
//! let mut pool = MemoryPool::<NodePool>::new(32, 4096)?;
//! let node = pool.allocate()?;
//! unsafe { pool.deallocate(node) };
//!
//! // A stack unwound by marker
//! let mut stack = MemoryStack::new(4096)?;
//! let marker = stack.top();
//! stack.allocate(100, 8)?;
//! unsafe { stack.unwind(marker) };
//! # Ok::<(), MemoryError>(())
//! ```
//!
//! ## Features
//!
//! - `logging` (default): structured logging through `tracing`
//! - `leak-check` (default): report leaked bytes when allocators are dropped
//! - `debug-fill`, `debug-fence`, `debug-checks`: debug instrumentation,
//!   see [`config`]
//! - `temporary-stack-explicit`, `temporary-stack-disabled`: per-thread
//!   scratch stack lifetime
//!
//! ## Architecture
//!
//! Allocation fast paths are single threaded and unsynchronized. Thread
//! safety is added at the storage boundary by
//! [`ThreadSafeAllocator`](allocator::ThreadSafeAllocator), which wraps
//! every operation in a lock.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::perf)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Explicit lifetimes are clearer in unsafe allocator code even when elidable
#![allow(clippy::elidable_lifetime_names)]
// inline(always) on small alignment helpers is intentional for hot paths
#![allow(clippy::inline_always)]
// Cast truncation/sign-loss in memory code is reviewed per-site
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
// Links are stored unaligned inside nodes
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::return_self_not_must_use)]

// Error types
pub mod error;

// Configuration and instrumentation
pub mod config;
pub mod debugging;
pub mod utils;

// Core modules
pub mod allocator;
pub mod arena;
pub mod block;
pub mod free_list;
pub mod pool;
pub mod stack;
pub mod temporary;

pub use crate::allocator::{ComposableAllocator, RawAllocator};
pub use crate::error::{MemoryError, MemoryResult, Result};

// Public API exports
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error types
    pub use crate::error::{MemoryError, MemoryResult, Result};

    // Allocator contract and wrappers
    pub use crate::allocator::{
        AllocatorAdapter, AllocatorReference, AnyAllocatorReference, ComposableAllocator,
        FallbackAllocator, HeapAllocator, RawAllocator, StdAllocator, ThreadSafeAllocator,
        make_allocator_adapter, make_allocator_reference, make_thread_safe_allocator,
    };

    // Blocks and arenas
    pub use crate::arena::MemoryArena;
    pub use crate::block::{BlockAllocator, FixedBlockAllocator, GrowingBlockAllocator};

    // Pools
    pub use crate::pool::{
        ArrayPool, IdentityBuckets, Log2Buckets, MemoryPool, MemoryPoolList, NodePool,
    };

    // Stacks and scratch memory
    pub use crate::stack::{MemoryStack, MemoryStackUnwinder, StackMarker};
    pub use crate::temporary::{TemporaryAllocator, TemporaryStack, TemporaryStackInitializer};
}

//! Allocator abstraction layer
//!
//! - [`traits`]: the [`RawAllocator`] and [`ComposableAllocator`] contracts
//! - [`storage`]: owning, referencing and locked wrappers
//! - [`any`]: a type-erased reference with inline storage
//! - [`StdAllocator`]: element-typed facade for containers
//! - [`HeapAllocator`] and [`FallbackAllocator`]: basic building blocks

pub mod any;
pub mod fallback;
pub mod heap;
pub mod std_adapter;
pub mod storage;
pub mod traits;

pub use any::{ANY_REFERENCE_CAPACITY, AnyAllocatorReference};
pub use fallback::FallbackAllocator;
pub use heap::{HEAP_LEAK_COUNTER, HEAP_MAX_ALIGNMENT, HeapAllocator};
pub use std_adapter::StdAllocator;
pub use storage::{
    AllocatorAdapter, AllocatorReference, AllocatorStorage, DirectStorage, NoMutex,
    ReferenceStorage, SharedAllocator, SharedHandle, StatefulHandle, StatelessHandle,
    StoragePolicy, ThreadSafeAllocator, make_allocator_adapter, make_allocator_reference,
    make_thread_safe_allocator,
};
pub use traits::{AllocatorHandle, ComposableAllocator, RawAllocator};

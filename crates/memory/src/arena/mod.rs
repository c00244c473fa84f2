//! Block management shared by pools and stacks
//!
//! - [`BlockStack`]: intrusive LIFO list of blocks
//! - [`MemoryArena`]: owns blocks from a block allocator, with an optional
//!   cache of released blocks

#[allow(clippy::module_inception)]
mod arena;
mod block_stack;

pub use arena::{MemoryArena, UncachedMemoryArena};
pub use block_stack::{BLOCK_HEADER_SIZE, BlockStack};

//! Stack (bump pointer) allocation
//!
//! - [`FixedMemoryStack`]: bump pointer over one region, used on its own by
//!   pool lists as a staging area
//! - [`MemoryStack`]: grows block by block through a cached arena
//! - [`StackMarker`] and [`MemoryStackUnwinder`]: positions and RAII scopes

mod fixed;
mod marker;
mod memory_stack;
mod unwinder;

pub use fixed::FixedMemoryStack;
pub use marker::StackMarker;
pub use memory_stack::MemoryStack;
pub use unwinder::MemoryStackUnwinder;

//! Scope guard unwinding a memory stack

use core::fmt;

use crate::block::{BlockAllocator, GrowingBlockAllocator};

use super::marker::StackMarker;
use super::memory_stack::MemoryStack;

/// Unwinds a [`MemoryStack`] to the position it captured when dropped
///
/// # Examples
///
/// ```
/// use foundation_memory::stack::{MemoryStack, MemoryStackUnwinder};
///
/// let mut stack = MemoryStack::new(4096)?;
/// let before = stack.top();
/// {
///     let mut scope = MemoryStackUnwinder::new(&mut stack);
///     scope.stack().allocate(64, 8)?;
/// }
/// assert_eq!(stack.top(), before);
/// # Ok::<(), foundation_memory::MemoryError>(())
/// ```
pub struct MemoryStackUnwinder<'a, B: BlockAllocator = GrowingBlockAllocator> {
    stack: &'a mut MemoryStack<B>,
    marker: Option<StackMarker>,
}

impl<'a, B: BlockAllocator> MemoryStackUnwinder<'a, B> {
    /// Captures the current top of `stack`
    pub fn new(stack: &'a mut MemoryStack<B>) -> Self {
        let marker = stack.top();
        Self {
            stack,
            marker: Some(marker),
        }
    }

    /// Captured marker, `None` once released
    pub fn marker(&self) -> Option<StackMarker> {
        self.marker
    }

    /// Whether dropping the guard unwinds
    pub fn will_unwind(&self) -> bool {
        self.marker.is_some()
    }

    /// The guarded stack
    pub fn stack(&mut self) -> &mut MemoryStack<B> {
        &mut *self.stack
    }

    /// Unwinds now; the guard stays armed
    pub fn unwind(&mut self) {
        if let Some(marker) = self.marker {
            // SAFETY: the marker was taken from this stack, which is
            // borrowed exclusively for the guard's lifetime.
            unsafe { self.stack.unwind(marker) };
        }
    }

    /// Cancels the pending unwind
    pub fn release(&mut self) {
        self.marker = None;
    }
}

impl<B: BlockAllocator> Drop for MemoryStackUnwinder<'_, B> {
    fn drop(&mut self) {
        self.unwind();
    }
}

impl<B: BlockAllocator> fmt::Debug for MemoryStackUnwinder<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStackUnwinder")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

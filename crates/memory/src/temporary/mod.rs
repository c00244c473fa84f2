//! Scratch memory with stack lifetime
//!
//! A [`TemporaryAllocator`] is a scope object over a [`TemporaryStack`]. It
//! captures the stack's top on creation and unwinds back to it when
//! dropped, so everything allocated through it is released at once.
//! Temporary allocators nest: only the most recently created one on a
//! stack is active, and allocating through an inactive one is a contract
//! violation caught by a debug assertion. Dropping a scope also retires
//! every scope opened after it; a retired scope no longer unwinds.
//!
//! Each thread gets its own stack from a process-wide registry, governed by
//! [`TEMPORARY_STACK_MODE`]:
//! - `Automatic`: created lazily by the first [`TemporaryAllocator::new`]
//! - `Explicit`: the thread must hold a [`TemporaryStackInitializer`]
//! - `Disabled`: only [`TemporaryAllocator::with_stack`] is available
//!
//! Stacks of exited threads are recycled by other threads;
//! [`release_unused_temporary_stacks`] frees the idle ones.

mod registry;

use core::cell::{Cell, RefCell};
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::allocator::{RawAllocator, StatefulHandle};
use crate::config::{DEFAULT_TEMPORARY_STACK_SIZE, TEMPORARY_STACK_MODE, TemporaryStackMode};
use crate::debugging::AllocatorInfo;
use crate::error::{MemoryError, MemoryResult};
use crate::stack::{MemoryStack, StackMarker};

pub use registry::{registered_temporary_stacks, release_unused_temporary_stacks};

const NAME: &str = "foundation_memory::TemporaryAllocator";

/// Memory stack shared by nested temporary allocators
pub struct TemporaryStack {
    stack: RefCell<MemoryStack>,
    // Ids of the live scopes, innermost last.
    scopes: RefCell<Vec<usize>>,
    next_scope: Cell<usize>,
}

impl TemporaryStack {
    /// Creates a stack with `initial_size` bytes in its first block
    pub fn new(initial_size: usize) -> MemoryResult<Self> {
        Ok(Self {
            stack: RefCell::new(MemoryStack::new(MemoryStack::min_block_size(initial_size))?),
            scopes: RefCell::new(Vec::new()),
            next_scope: Cell::new(0),
        })
    }

    /// Current position
    pub fn top(&self) -> StackMarker {
        self.stack.borrow().top()
    }

    /// Bytes left in the current block
    pub fn capacity_left(&self) -> usize {
        self.stack.borrow().capacity_left()
    }

    /// Usable size of the next block
    pub fn next_capacity(&self) -> usize {
        self.stack.borrow().next_capacity()
    }

    /// Returns cached blocks to the heap
    pub fn shrink_to_fit(&self) {
        self.stack.borrow_mut().shrink_to_fit();
    }

    /// Number of live temporary allocators on this stack
    pub fn depth(&self) -> usize {
        self.scopes.borrow().len()
    }

    fn open_scope(&self) -> usize {
        let id = self.next_scope.get();
        self.next_scope.set(id.wrapping_add(1));
        self.scopes.borrow_mut().push(id);
        id
    }
}

impl fmt::Debug for TemporaryStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryStack")
            .field("stack", &*self.stack.borrow())
            .field("depth", &self.depth())
            .finish()
    }
}

/// Claims the calling thread's temporary stack while alive
///
/// Required before [`TemporaryAllocator::new`] in `Explicit` mode; in
/// `Automatic` mode it only chooses the stack's initial size. Dropping the
/// initializer releases the thread's stack if no temporary allocator uses
/// it.
#[must_use = "the thread's temporary stack is released when the initializer is dropped"]
pub struct TemporaryStackInitializer {
    _not_send: PhantomData<*const ()>,
}

impl TemporaryStackInitializer {
    /// Claims a stack with `initial_size` bytes for the calling thread
    pub fn new(initial_size: usize) -> MemoryResult<Self> {
        if TEMPORARY_STACK_MODE == TemporaryStackMode::Disabled {
            return Err(MemoryError::invalid_config("temporary stacks are disabled"));
        }
        registry::thread_stack(true, initial_size)?;
        Ok(Self {
            _not_send: PhantomData,
        })
    }

    /// Claims a stack of [`DEFAULT_TEMPORARY_STACK_SIZE`] bytes
    pub fn with_default_size() -> MemoryResult<Self> {
        Self::new(DEFAULT_TEMPORARY_STACK_SIZE)
    }
}

impl Drop for TemporaryStackInitializer {
    fn drop(&mut self) {
        registry::release_thread_stack();
    }
}

impl fmt::Debug for TemporaryStackInitializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryStackInitializer").finish()
    }
}

/// Scoped scratch allocator
///
/// # Examples
///
/// ```
/// use foundation_memory::temporary::{TemporaryAllocator, TemporaryStack};
///
/// let stack = TemporaryStack::new(1024)?;
/// let before = stack.top();
/// {
///     let mut scratch = TemporaryAllocator::with_stack(&stack);
///     scratch.allocate(128, 8)?;
/// }
/// assert_eq!(stack.top(), before);
/// # Ok::<(), foundation_memory::MemoryError>(())
/// ```
pub struct TemporaryAllocator<'s> {
    stack: &'s TemporaryStack,
    marker: StackMarker,
    id: usize,
}

impl TemporaryAllocator<'static> {
    /// Opens a scope on the calling thread's stack
    ///
    /// Fails when temporary stacks are disabled, when the thread has no
    /// initializer in `Explicit` mode, or during thread teardown.
    pub fn new() -> MemoryResult<Self> {
        let stack = match TEMPORARY_STACK_MODE {
            TemporaryStackMode::Disabled => {
                return Err(MemoryError::invalid_config("temporary stacks are disabled"));
            }
            TemporaryStackMode::Explicit => registry::thread_stack(false, 0)?,
            TemporaryStackMode::Automatic => {
                registry::thread_stack(true, DEFAULT_TEMPORARY_STACK_SIZE)?
            }
        };
        Ok(Self::with_stack(stack))
    }
}

impl<'s> TemporaryAllocator<'s> {
    /// Opens a scope on `stack`
    pub fn with_stack(stack: &'s TemporaryStack) -> Self {
        let marker = stack.top();
        Self {
            stack,
            marker,
            id: stack.open_scope(),
        }
    }

    /// Whether this is the innermost live scope on its stack
    pub fn is_active(&self) -> bool {
        self.stack.scopes.borrow().last() == Some(&self.id)
    }

    /// Whether an enclosing scope was dropped first and already unwound
    /// past this one
    pub fn is_retired(&self) -> bool {
        !self.stack.scopes.borrow().contains(&self.id)
    }

    /// Allocates `size` bytes, growing the stack if needed
    ///
    /// Fails once the scope is retired.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        if self.is_retired() {
            return Err(MemoryError::invalid_config(
                "allocation through a retired temporary allocator",
            ));
        }
        debug_assert!(self.is_active(), "allocation through an inactive temporary allocator");
        self.stack.stack.borrow_mut().allocate(size, alignment)
    }

    /// Allocates inside the stack's current block only
    pub fn try_allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if self.is_retired() {
            return None;
        }
        debug_assert!(self.is_active(), "allocation through an inactive temporary allocator");
        self.stack.stack.borrow_mut().try_allocate(size, alignment)
    }

    /// Position the scope unwinds to
    pub fn marker(&self) -> StackMarker {
        self.marker
    }

    /// Stack this scope allocates from
    pub fn stack(&self) -> &TemporaryStack {
        self.stack
    }
}

impl Drop for TemporaryAllocator<'_> {
    fn drop(&mut self) {
        let mut scopes = self.stack.scopes.borrow_mut();
        let Some(index) = scopes.iter().rposition(|&id| id == self.id) else {
            return;
        };
        scopes.truncate(index);
        drop(scopes);

        // SAFETY: the marker was taken from this stack when the scope
        // opened. Every position below it is still live: only a scope
        // opened earlier can unwind further, and that would have retired
        // this one.
        unsafe { self.stack.stack.borrow_mut().unwind(self.marker) };
    }
}

// SAFETY: memory comes from the scope's stack and stays valid until the
// scope is dropped.
unsafe impl<'s> RawAllocator for TemporaryAllocator<'s> {
    type Handle<'a>
        = StatefulHandle<'a, Self>
    where
        Self: 'a;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        self.allocate(size, alignment)
    }

    unsafe fn deallocate_node(&mut self, _ptr: NonNull<u8>, _size: usize, _alignment: usize) {}

    fn max_node_size(&self) -> usize {
        self.stack.stack.borrow().max_node_size()
    }

    fn max_alignment(&self) -> usize {
        self.stack.stack.borrow().max_alignment()
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of(NAME, self)
    }
}

impl fmt::Debug for TemporaryAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryAllocator")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("marker", &self.marker)
            .finish()
    }
}

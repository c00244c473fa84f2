//! Process-wide registry of per-thread temporary stacks
//!
//! Stacks are never freed when their thread exits. The exiting thread only
//! clears the node's `in_use` flag, and the next thread that needs a stack
//! claims it with a single compare-exchange. Registry mutations are rare,
//! so the list itself sits behind a plain mutex.
//! [`release_unused_temporary_stacks`] frees every unclaimed node and is
//! meant to run at shutdown.

use core::cell::Cell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{MemoryError, MemoryResult};

use super::TemporaryStack;

#[cfg(feature = "logging")]
use tracing::debug;

pub(super) struct TemporaryStackNode {
    in_use: AtomicBool,
    pub(super) stack: TemporaryStack,
}

struct NodePtr(NonNull<TemporaryStackNode>);

// SAFETY: a node is only touched by the thread that claimed it, the
// registry itself only reads the atomic flag.
unsafe impl Send for NodePtr {}

static REGISTRY: Mutex<Vec<NodePtr>> = parking_lot::const_mutex(Vec::new());

/// The calling thread's claimed node
struct ThreadSlot {
    node: Cell<Option<NonNull<TemporaryStackNode>>>,
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            // SAFETY: the node was claimed by this thread and is still
            // registered.
            unsafe { release(node) };
        }
    }
}

thread_local! {
    static THREAD_SLOT: ThreadSlot = const {
        ThreadSlot {
            node: Cell::new(None),
        }
    };
}

/// Claims an idle registered stack or registers a new one
fn claim(initial_size: usize) -> MemoryResult<NonNull<TemporaryStackNode>> {
    let mut registry = REGISTRY.lock();

    for node in registry.iter() {
        // SAFETY: registered nodes stay alive while they are in the registry.
        let claimed = unsafe { node.0.as_ref() }
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if claimed {
            #[cfg(feature = "logging")]
            debug!(registered = registry.len(), "reusing temporary stack");
            return Ok(node.0);
        }
    }

    let node = Box::new(TemporaryStackNode {
        in_use: AtomicBool::new(true),
        stack: TemporaryStack::new(initial_size)?,
    });
    let node = NonNull::from(Box::leak(node));
    registry.push(NodePtr(node));

    #[cfg(feature = "logging")]
    debug!(
        initial_size,
        registered = registry.len(),
        "created temporary stack"
    );

    Ok(node)
}

/// Makes a claimed node available to other threads
///
/// A stack with live temporary allocators stays claimed.
///
/// # Safety
/// `node` must be claimed by the calling thread.
unsafe fn release(node: NonNull<TemporaryStackNode>) -> bool {
    // SAFETY: guaranteed by the caller.
    let node = unsafe { node.as_ref() };
    if node.stack.depth() != 0 {
        return false;
    }
    node.stack.shrink_to_fit();
    node.in_use.store(false, Ordering::Release);

    #[cfg(feature = "logging")]
    debug!("released temporary stack");

    true
}

/// The calling thread's stack, claiming one if `create` is set
pub(super) fn thread_stack(create: bool, initial_size: usize) -> MemoryResult<&'static TemporaryStack> {
    THREAD_SLOT
        .try_with(|slot| {
            let node = match slot.node.get() {
                Some(node) => node,
                None if create => {
                    let node = claim(initial_size)?;
                    slot.node.set(Some(node));
                    node
                }
                None => {
                    return Err(MemoryError::invalid_config(
                        "no temporary stack initialized for this thread",
                    ));
                }
            };
            // SAFETY: a claimed node is neither freed nor claimed elsewhere
            // until this thread releases it.
            Ok(unsafe { &(*node.as_ptr()).stack })
        })
        .map_err(|_| MemoryError::invalid_config("thread is shutting down"))?
}

/// Releases the calling thread's stack if it is idle
pub(super) fn release_thread_stack() {
    let _ = THREAD_SLOT.try_with(|slot| {
        if let Some(node) = slot.node.get() {
            // SAFETY: the slot's node is claimed by this thread.
            if unsafe { release(node) } {
                slot.node.set(None);
            }
        }
    });
}

/// Frees every registered stack not claimed by a thread
///
/// Returns the number of stacks freed.
pub fn release_unused_temporary_stacks() -> usize {
    let mut registry = REGISTRY.lock();
    let before = registry.len();

    registry.retain(|node| {
        // SAFETY: registered nodes stay alive while they are in the registry.
        let claimed = unsafe { node.0.as_ref() }
            .in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if claimed {
            // SAFETY: created by `Box::leak` in `claim`, no thread holds it.
            drop(unsafe { Box::from_raw(node.0.as_ptr()) });
        }
        !claimed
    });

    let freed = before - registry.len();

    #[cfg(feature = "logging")]
    debug!(freed, remaining = registry.len(), "released unused temporary stacks");

    freed
}

/// Number of registered stacks, claimed or not
pub fn registered_temporary_stacks() -> usize {
    REGISTRY.lock().len()
}

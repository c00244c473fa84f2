//! Debug instrumentation shared by every allocator in the crate
//!
//! This module owns the cross-cutting debugging policy:
//! - [`AllocatorInfo`] tags passed to every diagnostic hook
//! - Fill patterns ([`DebugMagic`]) for new, freed and fence memory
//! - Fence writing and verification around payloads
//! - Per-object ([`LeakChecker`]) and reference-counted global
//!   ([`GlobalLeakCounter`]) leak detection
//! - Invalid-pointer and double-deallocation checks
//!
//! Every check is gated by a constant from [`crate::config`], so a disabled
//! check costs nothing. When a check fires it calls a replaceable,
//! process-global handler. The default invalid-pointer and buffer-overflow
//! handlers abort the process; the default leak handler only reports.

use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::config::{DEBUG_DOUBLE_DEALLOC_CHECK, DEBUG_FILL, DEBUG_LEAK_CHECK, DEBUG_POINTER_CHECK};

#[cfg(feature = "logging")]
use tracing::{error, warn};

/// Diagnostic tag identifying one allocator instance
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AllocatorInfo {
    /// Human readable allocator name
    pub name: &'static str,
    /// Address of the allocator object, used only as an identity
    pub allocator: *const (),
}

impl AllocatorInfo {
    /// Creates an info tag from a name and an identity address
    pub const fn new(name: &'static str, allocator: *const ()) -> Self {
        Self { name, allocator }
    }

    /// Creates an info tag identifying `allocator`
    pub fn of<T: ?Sized>(name: &'static str, allocator: &T) -> Self {
        Self::new(name, ptr::from_ref(allocator).cast())
    }
}

impl fmt::Debug for AllocatorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorInfo")
            .field("name", &self.name)
            .field("allocator", &self.allocator)
            .finish()
    }
}

/// Byte patterns written into memory in debug fill mode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMagic {
    /// Memory used by allocator bookkeeping
    InternalMemory = 0xAB,
    /// Bookkeeping memory that was released
    InternalFreedMemory = 0xFB,
    /// Freshly handed out memory
    NewMemory = 0xCD,
    /// Memory returned by the user
    FreedMemory = 0xDD,
    /// Padding inserted to satisfy an alignment request
    AlignmentMemory = 0xED,
    /// Guard bytes around a payload
    FenceMemory = 0xFD,
}

// ============================================================================
// Handlers
// ============================================================================

/// Called with the net number of leaked bytes (negative: more freed than allocated)
pub type LeakHandler = fn(AllocatorInfo, isize);

/// Called with the offending pointer on invalid or double deallocation
pub type InvalidPointerHandler = fn(AllocatorInfo, *const u8);

/// Called with the node, its size and the first overwritten fence byte
pub type BufferOverflowHandler = fn(*const u8, usize, *const u8);

fn default_leak_handler(info: AllocatorInfo, amount: isize) {
    #[cfg(feature = "logging")]
    warn!(
        allocator = info.name,
        address = ?info.allocator,
        amount,
        "memory leak detected"
    );
    #[cfg(not(feature = "logging"))]
    let _ = (info, amount);
}

fn default_invalid_pointer_handler(info: AllocatorInfo, ptr: *const u8) {
    #[cfg(feature = "logging")]
    error!(
        allocator = info.name,
        address = ?info.allocator,
        pointer = ?ptr,
        "deallocation of invalid pointer"
    );
    #[cfg(not(feature = "logging"))]
    let _ = (info, ptr);
    std::process::abort();
}

fn default_buffer_overflow_handler(memory: *const u8, node_size: usize, write: *const u8) {
    #[cfg(feature = "logging")]
    error!(
        node = ?memory,
        node_size,
        overwritten = ?write,
        "buffer overflow detected"
    );
    #[cfg(not(feature = "logging"))]
    let _ = (memory, node_size, write);
    std::process::abort();
}

static LEAK_HANDLER: RwLock<LeakHandler> =
    parking_lot::const_rwlock(default_leak_handler as LeakHandler);
static INVALID_POINTER_HANDLER: RwLock<InvalidPointerHandler> =
    parking_lot::const_rwlock(default_invalid_pointer_handler as InvalidPointerHandler);
static BUFFER_OVERFLOW_HANDLER: RwLock<BufferOverflowHandler> =
    parking_lot::const_rwlock(default_buffer_overflow_handler as BufferOverflowHandler);

/// Installs a leak handler, `None` restores the default. Returns the previous one.
pub fn set_leak_handler(handler: Option<LeakHandler>) -> LeakHandler {
    let handler = handler.unwrap_or(default_leak_handler);
    core::mem::replace(&mut *LEAK_HANDLER.write(), handler)
}

/// Currently installed leak handler
pub fn leak_handler() -> LeakHandler {
    *LEAK_HANDLER.read()
}

/// Installs an invalid-pointer handler, `None` restores the default. Returns the previous one.
pub fn set_invalid_pointer_handler(handler: Option<InvalidPointerHandler>) -> InvalidPointerHandler {
    let handler = handler.unwrap_or(default_invalid_pointer_handler);
    core::mem::replace(&mut *INVALID_POINTER_HANDLER.write(), handler)
}

/// Currently installed invalid-pointer handler
pub fn invalid_pointer_handler() -> InvalidPointerHandler {
    *INVALID_POINTER_HANDLER.read()
}

/// Installs a buffer-overflow handler, `None` restores the default. Returns the previous one.
pub fn set_buffer_overflow_handler(handler: Option<BufferOverflowHandler>) -> BufferOverflowHandler {
    let handler = handler.unwrap_or(default_buffer_overflow_handler);
    core::mem::replace(&mut *BUFFER_OVERFLOW_HANDLER.write(), handler)
}

/// Currently installed buffer-overflow handler
pub fn buffer_overflow_handler() -> BufferOverflowHandler {
    *BUFFER_OVERFLOW_HANDLER.read()
}

// ============================================================================
// Fill patterns and fences
// ============================================================================

/// Fills `size` bytes at `memory` with `magic` when debug fill is enabled
///
/// # Safety
/// `memory` must be valid for writes of `size` bytes.
#[inline]
pub unsafe fn debug_fill(memory: *mut u8, size: usize, magic: DebugMagic) {
    if DEBUG_FILL && size > 0 {
        // SAFETY: caller guarantees `memory` is writable for `size` bytes.
        unsafe { ptr::write_bytes(memory, magic as u8, size) };
    }
}

/// Returns the first byte in `[memory, memory + size)` that differs from `magic`
///
/// Always `None` when debug fill is disabled.
///
/// # Safety
/// `memory` must be valid for reads of `size` bytes.
#[inline]
pub unsafe fn debug_is_filled(memory: *const u8, size: usize, magic: DebugMagic) -> Option<*const u8> {
    if !DEBUG_FILL {
        return None;
    }
    (0..size)
        // SAFETY: caller guarantees `memory` is readable for `size` bytes.
        .map(|offset| unsafe { memory.add(offset) })
        .find(|byte| unsafe { **byte } != magic as u8)
}

/// Prepares a fenced node: `[fence | node_size | fence]`
///
/// Returns the start of the payload, `fence_size` bytes after `memory`.
///
/// # Safety
/// `memory` must be valid for writes of `node_size + 2 * fence_size` bytes.
#[inline]
pub unsafe fn debug_fill_new(memory: *mut u8, node_size: usize, fence_size: usize) -> *mut u8 {
    // SAFETY: all three ranges lie inside the caller-provided region.
    unsafe {
        debug_fill(memory, fence_size, DebugMagic::FenceMemory);
        let payload = memory.add(fence_size);
        debug_fill(payload, node_size, DebugMagic::NewMemory);
        debug_fill(payload.add(node_size), fence_size, DebugMagic::FenceMemory);
        payload
    }
}

/// Poisons a returned payload and verifies both of its fences
///
/// Returns the start of the whole fenced region, `fence_size` bytes before
/// `memory`. A damaged fence is reported to the buffer-overflow handler.
///
/// # Safety
/// `[memory - fence_size, memory + node_size + fence_size)` must be valid for
/// reads and writes.
#[inline]
pub unsafe fn debug_fill_free(memory: *mut u8, node_size: usize, fence_size: usize) -> *mut u8 {
    // SAFETY: all ranges lie inside the region described by the caller.
    unsafe {
        debug_fill(memory, node_size, DebugMagic::FreedMemory);

        let pre_fence = memory.sub(fence_size);
        if let Some(dirty) = debug_is_filled(pre_fence, fence_size, DebugMagic::FenceMemory) {
            buffer_overflow_handler()(memory, node_size, dirty);
        }

        let post_fence = memory.add(node_size);
        if let Some(dirty) = debug_is_filled(post_fence, fence_size, DebugMagic::FenceMemory) {
            buffer_overflow_handler()(memory, node_size, dirty);
        }

        debug_fill(pre_fence, fence_size, DebugMagic::FreedMemory);
        debug_fill(post_fence, fence_size, DebugMagic::FreedMemory);
        pre_fence
    }
}

// ============================================================================
// Pointer checks
// ============================================================================

/// Reports `ptr` to the invalid-pointer handler unless `valid` holds
#[inline]
pub fn debug_check_pointer(valid: impl FnOnce() -> bool, info: AllocatorInfo, ptr: *const u8) {
    if DEBUG_POINTER_CHECK && !valid() {
        invalid_pointer_handler()(info, ptr);
    }
}

/// Reports `ptr` to the invalid-pointer handler if it was already deallocated
#[inline]
pub fn debug_check_double_dealloc(
    not_freed: impl FnOnce() -> bool,
    info: AllocatorInfo,
    ptr: *const u8,
) {
    if DEBUG_DOUBLE_DEALLOC_CHECK && !not_freed() {
        invalid_pointer_handler()(info, ptr);
    }
}

// ============================================================================
// Leak checking
// ============================================================================

/// Per-object net allocation counter
///
/// The owner calls [`check`](Self::check) from its `Drop`.
#[derive(Debug, Default)]
pub struct LeakChecker {
    allocated: isize,
}

impl LeakChecker {
    /// Creates a counter with nothing outstanding
    pub const fn new() -> Self {
        Self { allocated: 0 }
    }

    /// Records `size` allocated bytes
    #[inline]
    pub fn on_allocate(&mut self, size: usize) {
        if DEBUG_LEAK_CHECK {
            self.allocated += size as isize;
        }
    }

    /// Records `size` deallocated bytes
    #[inline]
    pub fn on_deallocate(&mut self, size: usize) {
        if DEBUG_LEAK_CHECK {
            self.allocated -= size as isize;
        }
    }

    /// Net bytes still outstanding
    pub fn outstanding(&self) -> isize {
        self.allocated
    }

    /// Reports outstanding bytes to the leak handler; returns whether it fired
    pub fn check(&self, info: AllocatorInfo) -> bool {
        if DEBUG_LEAK_CHECK && self.allocated != 0 {
            leak_handler()(info, self.allocated);
            true
        } else {
            false
        }
    }
}

/// Net allocation counter shared by every instance of one allocator class
///
/// Users of the class hold a [`GlobalLeakGuard`]; when the last guard is
/// dropped the net balance is checked and reported.
#[derive(Debug)]
pub struct GlobalLeakCounter {
    name: &'static str,
    instances: AtomicUsize,
    allocated: AtomicIsize,
}

impl GlobalLeakCounter {
    /// Creates a counter, usually as a `static`
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            instances: AtomicUsize::new(0),
            allocated: AtomicIsize::new(0),
        }
    }

    /// Registers a user of the allocator class
    pub fn guard(&self) -> GlobalLeakGuard<'_> {
        self.instances.fetch_add(1, Ordering::Relaxed);
        GlobalLeakGuard { counter: self }
    }

    /// Records `size` allocated bytes
    #[inline]
    pub fn on_allocate(&self, size: usize) {
        if DEBUG_LEAK_CHECK {
            self.allocated.fetch_add(size as isize, Ordering::Relaxed);
        }
    }

    /// Records `size` deallocated bytes
    #[inline]
    pub fn on_deallocate(&self, size: usize) {
        if DEBUG_LEAK_CHECK {
            self.allocated.fetch_sub(size as isize, Ordering::Relaxed);
        }
    }

    /// Net bytes currently outstanding across all instances
    pub fn outstanding(&self) -> isize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of live guards
    pub fn instances(&self) -> usize {
        self.instances.load(Ordering::Relaxed)
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::of(self.name, self)
    }
}

/// Registration handed out by [`GlobalLeakCounter::guard`]
#[must_use = "the leak check runs when the last guard is dropped"]
#[derive(Debug)]
pub struct GlobalLeakGuard<'a> {
    counter: &'a GlobalLeakCounter,
}

impl Drop for GlobalLeakGuard<'_> {
    fn drop(&mut self) {
        if self.counter.instances.fetch_sub(1, Ordering::AcqRel) == 1 {
            let leaked = self.counter.outstanding();
            if DEBUG_LEAK_CHECK && leaked != 0 {
                leak_handler()(self.counter.info(), leaked);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEBUG_FENCE_SIZE;

    #[test]
    fn fill_new_and_free_roundtrip() {
        let fence = DEBUG_FENCE_SIZE;
        let mut buffer = vec![0u8; 32 + 2 * fence];

        unsafe {
            let payload = debug_fill_new(buffer.as_mut_ptr(), 32, fence);
            assert_eq!(payload, buffer.as_mut_ptr().add(fence));
            assert!(debug_is_filled(payload, 32, DebugMagic::NewMemory).is_none());

            let start = debug_fill_free(payload, 32, fence);
            assert_eq!(start, buffer.as_mut_ptr());
            assert!(debug_is_filled(payload, 32, DebugMagic::FreedMemory).is_none());
        }
    }

    #[test]
    fn is_filled_reports_first_mismatch() {
        let mut buffer = [DebugMagic::FenceMemory as u8; 16];
        buffer[5] = 0;
        let found = unsafe { debug_is_filled(buffer.as_ptr(), 16, DebugMagic::FenceMemory) };
        if DEBUG_FILL {
            assert_eq!(found, Some(buffer.as_ptr().wrapping_add(5)));
        } else {
            assert!(found.is_none());
        }
    }

    #[test]
    fn object_leak_checker_balances() {
        let mut checker = LeakChecker::new();
        checker.on_allocate(64);
        checker.on_deallocate(64);
        assert_eq!(checker.outstanding(), 0);
        assert!(!checker.check(AllocatorInfo::of("test", &checker)));
    }

    #[test]
    fn global_counter_tracks_instances() {
        static COUNTER: GlobalLeakCounter = GlobalLeakCounter::new("test::global");

        let first = COUNTER.guard();
        let second = COUNTER.guard();
        assert_eq!(COUNTER.instances(), 2);

        COUNTER.on_allocate(16);
        COUNTER.on_deallocate(16);
        drop(first);
        drop(second);

        assert_eq!(COUNTER.instances(), 0);
        assert_eq!(COUNTER.outstanding(), 0);
    }
}

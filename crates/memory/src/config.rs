//! Compile-time configuration
//!
//! Every switch here is resolved from Cargo features (and `debug_assertions`
//! for the cheap checks), so disabled instrumentation compiles away entirely.

use core::mem::size_of;

/// The strictest fundamental alignment; blocks are always aligned to it.
pub const MAX_ALIGNMENT: usize = 2 * size_of::<usize>();

/// Fill new and freed memory with [`DebugMagic`](crate::debugging::DebugMagic) patterns.
pub const DEBUG_FILL: bool = cfg!(any(debug_assertions, feature = "debug-fill"));

/// Size of the guard bytes placed before and after every payload.
pub const DEBUG_FENCE_SIZE: usize = if cfg!(feature = "debug-fence") {
    MAX_ALIGNMENT
} else {
    0
};

/// Validate pointers passed to deallocation functions.
pub const DEBUG_POINTER_CHECK: bool = cfg!(any(debug_assertions, feature = "debug-checks"));

/// Detect deallocating the same node twice.
pub const DEBUG_DOUBLE_DEALLOC_CHECK: bool =
    cfg!(any(debug_assertions, feature = "debug-checks"));

/// Report outstanding allocations when an allocator goes away.
pub const DEBUG_LEAK_CHECK: bool = cfg!(feature = "leak-check");

/// Initial size of a thread's temporary stack.
pub const DEFAULT_TEMPORARY_STACK_SIZE: usize = 4096;

/// How per-thread temporary stacks come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporaryStackMode {
    /// No per-thread stack; every temporary allocator needs an explicit stack.
    Disabled,
    /// The thread must hold a `TemporaryStackInitializer` before use.
    Explicit,
    /// The stack is created lazily on first use in a thread.
    Automatic,
}

/// Selected temporary stack lifetime strategy.
pub const TEMPORARY_STACK_MODE: TemporaryStackMode = if cfg!(feature = "temporary-stack-disabled")
{
    TemporaryStackMode::Disabled
} else if cfg!(feature = "temporary-stack-explicit") {
    TemporaryStackMode::Explicit
} else {
    TemporaryStackMode::Automatic
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_alignment_is_power_of_two() {
        assert!(MAX_ALIGNMENT.is_power_of_two());
        assert!(MAX_ALIGNMENT >= core::mem::align_of::<u64>());
    }

    #[test]
    fn fence_is_alignment_multiple() {
        assert_eq!(DEBUG_FENCE_SIZE % MAX_ALIGNMENT, 0);
    }
}

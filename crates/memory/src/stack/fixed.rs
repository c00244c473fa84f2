//! Bump pointer inside a single block

use core::ptr::{self, NonNull};

use crate::debugging::{DebugMagic, debug_fill, debug_fill_new};
use crate::utils::align_offset;

/// Bump pointer over memory whose end is tracked by the owner
///
/// Every allocation is laid out as
/// `[alignment padding][fence][payload][fence]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMemoryStack {
    cur: *mut u8,
}

impl FixedMemoryStack {
    /// Starts bumping at `memory`
    pub const fn new(memory: *mut u8) -> Self {
        Self { cur: memory }
    }

    /// A stack without memory; every allocation fails
    pub const fn empty() -> Self {
        Self::new(ptr::null_mut())
    }

    /// Current position
    #[inline]
    pub fn top(&self) -> *mut u8 {
        self.cur
    }

    /// Bytes left before `end`
    #[inline]
    pub fn remaining(&self, end: *const u8) -> usize {
        end.addr().saturating_sub(self.cur.addr())
    }

    /// Bumps past a fenced payload of `size` bytes aligned to `alignment`
    ///
    /// Returns `None` without moving when the allocation does not fit before
    /// `end`.
    ///
    /// # Safety
    /// `[top, end)` must be writable memory owned by the caller.
    pub unsafe fn allocate(
        &mut self,
        end: *mut u8,
        size: usize,
        alignment: usize,
        fence_size: usize,
    ) -> Option<NonNull<u8>> {
        if self.cur.is_null() {
            return None;
        }

        let offset = align_offset(self.cur.wrapping_add(fence_size), alignment);
        let needed = offset
            .checked_add(fence_size)?
            .checked_add(size)?
            .checked_add(fence_size)?;
        if needed > self.remaining(end) {
            return None;
        }

        // SAFETY: `needed` bytes starting at `cur` lie before `end`.
        unsafe {
            debug_fill(self.cur, offset, DebugMagic::AlignmentMemory);
            let start = self.cur.add(offset);
            let payload = debug_fill_new(start, size, fence_size);
            self.cur = start.add(needed - offset);
            NonNull::new(payload)
        }
    }

    /// Moves back to `top`, poisoning everything after it
    ///
    /// # Safety
    /// `top` must be a previous position of this stack inside the same block.
    pub unsafe fn unwind(&mut self, top: *mut u8) {
        let freed = self.cur.addr().saturating_sub(top.addr());
        // SAFETY: `[top, cur)` was handed out by this stack.
        unsafe { debug_fill(top, freed, DebugMagic::FreedMemory) };
        self.cur = top;
    }
}

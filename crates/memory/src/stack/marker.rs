//! Stack marker for position tracking

use core::cmp::Ordering;

/// Marker representing a position in a [`MemoryStack`](super::MemoryStack)
///
/// Can be used to unwind the stack to this position, deallocating
/// all allocations made after the marker was created. Markers of one stack
/// are totally ordered: a later position compares greater.
#[derive(Debug, Clone, Copy)]
pub struct StackMarker {
    /// Number of blocks in use when the marker was taken
    pub(super) index: usize,
    pub(super) top: *mut u8,
    pub(super) end: *mut u8,
}

impl StackMarker {
    /// Number of blocks the stack used at this position
    pub fn block_count(&self) -> usize {
        self.index
    }

    /// Address of the position
    pub fn position(&self) -> *const u8 {
        self.top
    }
}

impl PartialEq for StackMarker {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.top == other.top
    }
}

impl Eq for StackMarker {}

impl PartialOrd for StackMarker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StackMarker {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index
            .cmp(&other.index)
            .then_with(|| self.top.addr().cmp(&other.top.addr()))
    }
}

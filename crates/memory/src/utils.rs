//! Alignment and size helpers used throughout the crate

use crate::config::MAX_ALIGNMENT;

/// Aligns a value up to the nearest multiple of alignment
///
/// # Examples
/// ```
/// use foundation_memory::utils::align_up;
///
/// assert_eq!(align_up(7, 8), 8);
/// assert_eq!(align_up(8, 8), 8);
/// assert_eq!(align_up(9, 8), 16);
/// ```
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Checks if a value is aligned to the given alignment
///
/// # Examples
/// ```
/// use foundation_memory::utils::is_aligned;
///
/// assert!(is_aligned(16, 8));
/// assert!(!is_aligned(17, 8));
/// ```
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

/// Check if a pointer is properly aligned
#[inline(always)]
pub fn is_aligned_ptr<T>(ptr: *const T, alignment: usize) -> bool {
    is_aligned(ptr.addr(), alignment)
}

/// Number of bytes to add to `ptr` to make it `alignment`-aligned
#[inline(always)]
pub fn align_offset(ptr: *const u8, alignment: usize) -> usize {
    let addr = ptr.addr();
    align_up(addr, alignment) - addr
}

/// Smallest `n` with `2^n >= value`
///
/// # Examples
/// ```
/// use foundation_memory::utils::ilog2_ceil;
///
/// assert_eq!(ilog2_ceil(1), 0);
/// assert_eq!(ilog2_ceil(5), 3);
/// assert_eq!(ilog2_ceil(8), 3);
/// ```
#[inline]
pub const fn ilog2_ceil(value: usize) -> usize {
    debug_assert!(value > 0);
    if value <= 1 {
        0
    } else {
        (usize::BITS - (value - 1).leading_zeros()) as usize
    }
}

/// Natural alignment of an object of `size` bytes laid out back to back
///
/// This is the largest power of two dividing `size`, capped at
/// [`MAX_ALIGNMENT`].
#[inline]
pub const fn alignment_for(size: usize) -> usize {
    if size == 0 {
        return MAX_ALIGNMENT;
    }
    let natural = 1 << size.trailing_zeros();
    if natural > MAX_ALIGNMENT {
        MAX_ALIGNMENT
    } else {
        natural
    }
}

//! Alignment helpers
//!
//! Pools are carved at a per-pool alignment rather than a fixed page size,
//! so every helper takes the alignment explicitly. Alignments must be a
//! non-zero power of two; callers validate that once at pool bind time.

/// Default pool alignment (one cache line on the co-processor bus)
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Page size used when sizing firmware windows (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Round `value` up to the next multiple of `align`.
///
/// Returns `None` if the rounded value would overflow.
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// Round `value` down to the previous multiple of `align`.
pub fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check whether `value` is a multiple of `align`.
pub fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Number of whole pages needed to hold `size` bytes.
pub fn pages_needed(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE)
}

/// Validate a pool alignment: non-zero and a power of two.
pub fn valid_alignment(align: usize) -> bool {
    align != 0 && align.is_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), Some(0));
        assert_eq!(align_up(1, 64), Some(64));
        assert_eq!(align_up(64, 64), Some(64));
        assert_eq!(align_up(65, 64), Some(128));
        assert_eq!(align_up(3, 1), Some(3));
    }

    #[test]
    fn test_align_up_overflow() {
        assert_eq!(align_up(usize::MAX, 64), None);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0x1FFF, PAGE_SIZE), 0x1000);
        assert_eq!(align_down(0x2000, PAGE_SIZE), 0x2000);
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(0x4000, PAGE_SIZE));
        assert!(!is_aligned(0x4001, PAGE_SIZE));
    }

    #[test]
    fn test_pages_needed() {
        assert_eq!(pages_needed(0), 0);
        assert_eq!(pages_needed(1), 1);
        assert_eq!(pages_needed(PAGE_SIZE), 1);
        assert_eq!(pages_needed(PAGE_SIZE + 1), 2);
    }

    #[test]
    fn test_valid_alignment() {
        assert!(valid_alignment(1));
        assert!(valid_alignment(4096));
        assert!(!valid_alignment(0));
        assert!(!valid_alignment(48));
    }
}

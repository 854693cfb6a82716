//! Wrap-around arithmetic for sequence numbers and millisecond timestamps.
//!
//! Both sequence numbers and the host clock are 32-bit counters that are
//! allowed to roll over.  Ordering is therefore never decided by a raw
//! unsigned comparison; instead the two values are subtracted with wrapping
//! arithmetic and the result is reinterpreted as a signed distance.  This is
//! correct as long as the two values are less than `2^31` apart, which always
//! holds for window-bounded sequence numbers and for clocks sampled every few
//! seconds.

/// Signed distance `later - earlier` in wrap-around space.
#[inline]
pub fn diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// `a < b` in wrap-around space.
#[inline]
pub fn lt(a: u32, b: u32) -> bool {
    diff(a, b) < 0
}

/// `a <= b` in wrap-around space.
#[inline]
pub fn le(a: u32, b: u32) -> bool {
    diff(a, b) <= 0
}

/// `a > b` in wrap-around space.
#[inline]
pub fn gt(a: u32, b: u32) -> bool {
    diff(a, b) > 0
}

/// `a >= b` in wrap-around space.
#[inline]
pub fn ge(a: u32, b: u32) -> bool {
    diff(a, b) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ordering() {
        assert!(lt(1, 2));
        assert!(le(2, 2));
        assert!(gt(3, 2));
        assert!(ge(3, 3));
        assert_eq!(diff(10, 4), 6);
        assert_eq!(diff(4, 10), -6);
    }

    #[test]
    fn ordering_survives_rollover() {
        let before = u32::MAX - 1;
        let after = 3;
        assert!(lt(before, after));
        assert!(gt(after, before));
        assert_eq!(diff(after, before), 5);
    }

    #[test]
    fn raw_unsigned_comparison_would_be_wrong() {
        // Sanity check of why this module exists.
        let before = u32::MAX;
        let after = 0;
        assert!(before > after);
        assert!(lt(before, after));
    }
}

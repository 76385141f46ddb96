//! Debug assertion macros for ring buffer invariants.
//!
//! Active only in debug builds; release builds compile them away entirely.

/// Assert that the reserved span never exceeds the ring capacity.
macro_rules! debug_assert_bounded_len {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "reserved span {} exceeds ring capacity {}",
            $len,
            $capacity
        )
    };
}

/// Assert that the read position never advances past the write position.
macro_rules! debug_assert_head_order {
    ($new_read:expr, $write:expr) => {
        debug_assert!(
            $new_read <= $write,
            "read position {} advanced past write position {}",
            $new_read,
            $write
        )
    };
}

pub(crate) use debug_assert_bounded_len;
pub(crate) use debug_assert_head_order;

//! Debug assertion macros for queue invariants.
//!
//! Only active in debug builds, so there is zero overhead in release builds.

/// Assert that admitted occupancy does not exceed capacity.
///
/// **Invariant**: `0 < len ≤ capacity` right after a successful admission.
///
/// Used in: `BoundedQueue::admit()`
macro_rules! debug_assert_occupancy_bounded {
    ($occupancy:expr, $capacity:expr) => {
        debug_assert!(
            $occupancy > 0 && $occupancy <= $capacity,
            "occupancy {} outside (0, {}]",
            $occupancy,
            $capacity
        )
    };
}

/// Assert that a release never takes the counter below zero.
///
/// **Invariant**: every dequeued item was admitted, so the counter it
/// releases is at least one.
///
/// Used in: `BoundedQueue::pop()`
macro_rules! debug_assert_release_balanced {
    ($previous:expr) => {
        debug_assert!(
            $previous > 0,
            "released an item while occupancy was already zero"
        )
    };
}

/// Assert that a slot stamp belongs to the lap being read or written.
///
/// **Invariant**: a slot's stamp is either `pos` (free for `pos`) or
/// `pos + 1` (published at `pos`); anything else means two laps overlap.
///
/// Used in: `Drop for BoundedQueue`
macro_rules! debug_assert_stamp_in_lap {
    ($stamp:expr, $pos:expr) => {
        debug_assert!(
            $stamp == $pos || $stamp == $pos.wrapping_add(1),
            "slot stamp {} does not belong to position {}",
            $stamp,
            $pos
        )
    };
}

pub(crate) use debug_assert_occupancy_bounded;
pub(crate) use debug_assert_release_balanced;
pub(crate) use debug_assert_stamp_in_lap;

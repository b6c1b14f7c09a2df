use crate::invariants::{
    debug_assert_occupancy_bounded, debug_assert_release_balanced, debug_assert_stamp_in_lap,
};
use crate::QueueError;
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Largest capacity a queue can be built with.
pub const MAX_CAPACITY: usize = 1 << 30;

/// High bit of the admission counter; set once the queue is closed.
const CLOSED: usize = 1 << (usize::BITS - 1);

// =============================================================================
// ADMISSION & SLOT PROTOCOL
// =============================================================================
//
// ## Admission counter
//
// `len` is the occupancy counter. A producer first reserves one unit of it
// with a CAS loop that refuses to go past `capacity`; only then does it claim
// a position. The consumer gives the unit back after it has released the slot.
// Hence:
// - `len <= capacity` at every instant (the CAS never overshoots)
// - `len >= items readable by the consumer` (reserved before written,
//   released after read)
//
// Closing sets the `CLOSED` bit in the same word. Admission fails from then
// on, so once the closer observes the counter the set of admitted items is
// final and the consumer can wait for `len` to reach zero.
//
// ## Positions and stamps
//
// Positions are unbounded u64 sequence numbers; the slot index is
// `pos & mask`. Every slot carries a stamp:
// - `stamp == pos`      slot is free for the producer that claims `pos`
// - `stamp == pos + 1`  value for `pos` is published to the consumer
// After reading `pos`, the consumer stores `pos + slot_count`, freeing the
// slot for the next lap.
//
// Claimed-but-unreleased positions each hold a reservation, so at most
// `capacity <= slot_count` positions are in flight and the slot a producer
// claims has already been released by the consumer. The producer still waits
// for the stamp (Acquire) so the consumer's read of the previous lap
// happens-before the overwrite; that wait only spans the consumer's own
// release sequence.
//
// **Producer:** reserve `len` (AcqRel) → `tail.fetch_add` → wait stamp == pos
// (Acquire) → write value → store stamp pos+1 (Release).
//
// **Consumer:** load stamp (Acquire) == head+1 → read value → store stamp
// head+slot_count (Release) → bump `head` → `len.fetch_sub` (AcqRel).
//
// =============================================================================

struct Slot<T> {
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer single-consumer queue.
///
/// Producers share the queue through an `Arc` and call [`try_enqueue`] or
/// [`enqueue`]; neither ever blocks. The single [`QueueConsumer`] created
/// alongside it is the only way to take items out.
///
/// [`try_enqueue`]: BoundedQueue::try_enqueue
/// [`enqueue`]: BoundedQueue::enqueue
pub struct BoundedQueue<T> {
    /// Next position a producer claims.
    tail: CachePadded<AtomicU64>,
    /// Next position the consumer reads (written by the consumer only).
    head: CachePadded<AtomicU64>,
    /// Admission counter / occupancy.
    len: CachePadded<AtomicUsize>,
    capacity: usize,
    mask: usize,
    slots: Box<[Slot<T>]>,
}

// Safety: values cross threads only through the stamp protocol above; T is
// moved in by exactly one producer and moved out by exactly one consumer.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

/// Creates a queue holding at most `capacity` items.
///
/// Returns the shared producer side and the unique consumer handle.
pub fn bounded<T>(
    capacity: usize,
) -> Result<(Arc<BoundedQueue<T>>, QueueConsumer<T>), QueueError> {
    let queue = Arc::new(BoundedQueue::with_capacity(capacity)?);
    let consumer = QueueConsumer {
        queue: Arc::clone(&queue),
    };
    Ok((queue, consumer))
}

impl<T> BoundedQueue<T> {
    fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        if capacity > MAX_CAPACITY {
            return Err(QueueError::CapacityTooLarge {
                requested: capacity,
                max: MAX_CAPACITY,
            });
        }

        // Slot storage is a power of two so the index is a mask; admission
        // still stops at the exact requested capacity.
        let slot_count = capacity.next_power_of_two();
        let slots = (0..slot_count)
            .map(|i| Slot {
                stamp: AtomicU64::new(i as u64),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            len: CachePadded::new(AtomicUsize::new(0)),
            capacity,
            mask: slot_count - 1,
            slots,
        })
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    /// Maximum number of items the queue admits.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy (admitted and not yet released by the consumer).
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire) & !CLOSED
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Positions handed out to producers so far.
    ///
    /// Every position below this value is published, or is being written by a
    /// producer whose `try_enqueue` has not returned yet.
    #[inline]
    pub fn claimed(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Stops admission for good. Items already admitted stay readable.
    ///
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        (self.len.fetch_or(CLOSED, Ordering::AcqRel) & CLOSED) == 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        (self.len.load(Ordering::Acquire) & CLOSED) != 0
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Tries to enqueue `item` without blocking.
    ///
    /// On success returns the occupancy including this item, which callers
    /// can compare against a wake threshold. At capacity, or once closed, the
    /// item is handed back in `Err`.
    pub fn try_enqueue(&self, item: T) -> Result<usize, T> {
        let Some(occupancy) = self.admit() else {
            return Err(item);
        };

        let pos = self.tail.fetch_add(1, Ordering::Relaxed);
        let slot = &self.slots[(pos as usize) & self.mask];

        let backoff = Backoff::new();
        while slot.stamp.load(Ordering::Acquire) != pos {
            backoff.snooze();
        }

        // SAFETY: The stamp equals `pos`, so the consumer has moved out the
        // previous lap's value and no other producer owns this position
        // (positions are handed out once by fetch_add). The consumer will not
        // read the slot until the Release store of `pos + 1` below.
        unsafe {
            (*slot.value.get()).write(item);
        }
        slot.stamp.store(pos.wrapping_add(1), Ordering::Release);

        Ok(occupancy)
    }

    /// Enqueues `item`, dropping it if the queue is at capacity.
    ///
    /// Returns `false` when the item was dropped.
    #[inline]
    pub fn enqueue(&self, item: T) -> bool {
        self.try_enqueue(item).is_ok()
    }

    /// Reserves one unit of occupancy. Returns the new occupancy.
    fn admit(&self) -> Option<usize> {
        let mut current = self.len.load(Ordering::Relaxed);
        loop {
            if (current & CLOSED) != 0 || current >= self.capacity {
                return None;
            }
            match self.len.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    debug_assert_occupancy_bounded!(current + 1, self.capacity);
                    return Some(current + 1);
                }
                Err(actual) => current = actual,
            }
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER SIDE (reachable only through QueueConsumer)
    // ---------------------------------------------------------------------

    fn pop(&self) -> Option<T> {
        let pos = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[(pos as usize) & self.mask];

        if slot.stamp.load(Ordering::Acquire) != pos.wrapping_add(1) {
            // Empty, or the producer that claimed `pos` has not published yet.
            return None;
        }

        // SAFETY: The stamp is `pos + 1`, published with Release by the only
        // producer that claimed `pos`; the Acquire load makes its write
        // visible. Only the unique consumer reaches this code.
        let item = unsafe { (*slot.value.get()).assume_init_read() };

        slot.stamp
            .store(pos.wrapping_add(self.slots.len() as u64), Ordering::Release);
        self.head.store(pos.wrapping_add(1), Ordering::Relaxed);

        let previous = self.len.fetch_sub(1, Ordering::AcqRel);
        debug_assert_release_balanced!(previous & !CLOSED);

        Some(item)
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // Last handle is gone: no producer is mid-write, so every position in
        // [head, tail) is published.
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let mask = self.mask;

        let mut pos = head;
        while pos != tail {
            let slot = &mut self.slots[(pos as usize) & mask];
            let stamp = *slot.stamp.get_mut();
            debug_assert_stamp_in_lap!(stamp, pos);
            if stamp == pos.wrapping_add(1) {
                // SAFETY: published and never read by the consumer.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
            pos = pos.wrapping_add(1);
        }
    }
}

// ---------------------------------------------------------------------
// CONSUMER HANDLE
// ---------------------------------------------------------------------

/// The unique consumer of a [`BoundedQueue`].
///
/// Not `Clone`; every read goes through `&mut self`.
pub struct QueueConsumer<T> {
    queue: Arc<BoundedQueue<T>>,
}

impl<T> QueueConsumer<T> {
    /// Pops the oldest published item, if any.
    #[inline]
    pub fn try_dequeue(&mut self) -> Option<T> {
        self.queue.pop()
    }

    /// Moves up to `max` items into `handler`, oldest first.
    ///
    /// Stops early when the queue is observed empty. Returns the number of
    /// items handed over.
    pub fn drain_up_to<F>(&mut self, max: usize, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let mut count = 0;
        while count < max {
            match self.queue.pop() {
                Some(item) => {
                    handler(item);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Moves every currently published item into `handler`.
    pub fn drain<F>(&mut self, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.drain_up_to(usize::MAX, handler)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Claimed positions not yet read.
    ///
    /// Unlike [`len`](Self::len) this excludes producers that have reserved
    /// occupancy but not claimed a position, so reading exactly `backlog()`
    /// items takes everything whose `try_enqueue` returned before this call.
    pub fn backlog(&self) -> usize {
        let head = self.queue.head.load(Ordering::Relaxed);
        self.queue.claimed().wrapping_sub(head) as usize
    }
}

impl<T> fmt::Debug for QueueConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue", &self.queue)
            .finish()
    }
}

//! SpanRing - Bounded Lock-Free MPSC Queue
//!
//! A fixed-capacity multi-producer single-consumer queue built for hand-off
//! paths where producers must never wait: when the queue is at capacity the
//! caller gets its item back immediately and decides what to do with it
//! (usually: drop it and bump a counter).
//!
//! # Key Features
//!
//! - Exact admission: an occupancy counter is reserved *before* a slot is
//!   claimed, so the queue never holds more than `capacity` items and
//!   `len()` never under-reports what is stored
//! - Any number of producers, no registration step
//! - Single consumer enforced by the type system ([`QueueConsumer`] is not `Clone`
//!   and dequeues through `&mut self`)
//! - Per-slot sequence stamps (no ABA), 128-byte padded hot counters
//! - `close()` freezes admission so a final drain can wait for every admitted
//!   item to be published
//!
//! # Example
//!
//! ```
//! let (queue, mut consumer) = spanring::bounded::<u64>(2).unwrap();
//!
//! assert_eq!(queue.try_enqueue(1), Ok(1));
//! assert_eq!(queue.try_enqueue(2), Ok(2));
//! // At capacity: the item comes back.
//! assert_eq!(queue.try_enqueue(3), Err(3));
//!
//! assert_eq!(consumer.try_dequeue(), Some(1));
//! assert!(queue.enqueue(3));
//!
//! let mut out = Vec::new();
//! consumer.drain_up_to(8, |item| out.push(item));
//! assert_eq!(out, vec![2, 3]);
//! ```

mod error;
mod invariants;
mod queue;

pub use error::QueueError;
pub use queue::{bounded, BoundedQueue, QueueConsumer, MAX_CAPACITY};

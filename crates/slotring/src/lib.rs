//! Slotted lock-free ring buffer primitives for asynchronous log delivery.
//!
//! The building blocks in this crate sit between log producers (application
//! threads) and the reader threads that drain records towards a downstream
//! sink:
//!
//! - [`SlotRing`]: a fixed-capacity ring buffer whose entries carry their own
//!   atomic lifecycle state (`Vacant -> Writing -> Ready -> Reading`). This
//!   makes the ring safe for multiple producers reserving positions via
//!   atomic index arithmetic while a single consumer drains it, and lets the
//!   consumer detect "reserved but not yet published" gaps instead of
//!   silently skipping them.
//! - [`AtomicBitset`]: a cache-padded bitset used both as a thread-slot
//!   registry (bit-level compare-and-swap acquisition) and as a non-empty
//!   ring hint shared between producers and reader threads.
//! - [`Backoff`]: adaptive spin/yield backoff for the WAIT congestion policy
//!   and for short stabilization waits.
//! - [`CongestionPolicy`]: what a producer does when a ring is full.
//!
//! # Design
//!
//! Ring positions are unbounded `u64` counters; the backing array index is
//! `pos & mask` with a power-of-two capacity. With 2^64 positions wrap-around
//! is treated as impossible, which sidesteps the ABA problem entirely.
//!
//! No allocation happens on the hot path: entries are created once at
//! construction and reused forever.
//!
//! # Example
//!
//! ```
//! use slotring::{Pop, SlotRing};
//!
//! let ring = SlotRing::<u64>::with_capacity(8);
//! assert!(ring.try_push(7).is_ok());
//! match ring.try_pop() {
//!     Pop::Popped(v) => assert_eq!(v, 7),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

mod backoff;
mod bitset;
mod invariants;
mod policy;
mod ring;

pub use backoff::Backoff;
pub use bitset::AtomicBitset;
pub use policy::{Admission, CongestionPolicy};
pub use ring::{ForcedPush, Pop, SlotRing};

//! Asynchronous log delivery targets.
//!
//! This crate moves log I/O off the caller's thread. Application threads
//! hand a [`Record`] to an asynchronous target with sub-microsecond latency;
//! the target conveys it, in total timestamp order where requested, to a
//! subordinate [`Target`] (the *sub-target*) that performs the actual I/O.
//!
//! Four delivery strategies, in increasing order of sophistication:
//!
//! - [`DeferredTarget`]: mutex-and-condvar hand-off to one worker thread.
//!   The correctness baseline.
//! - [`QueuedTarget`]: same shape, plus size and age batch triggers with one
//!   sub-target flush per batch.
//! - [`QuantumTarget`]: a shared lock-free ring buffer drained by one reader
//!   thread. Built for log flooding scenarios.
//! - [`MultiQuantumTarget`]: one ring per producer thread, a reader pool and
//!   a sorting funnel that restores global timestamp order.
//!
//! Producers are never failed by the log path: when a ring is full the
//! configured [`CongestionPolicy`] decides between waiting and dropping, and
//! drops only surface through each target's [`StatsSnapshot`].
//!
//! # Example
//!
//! ```
//! use logflow::{Level, MultiQuantumConfig, MultiQuantumTarget, NullTarget, Record, Target};
//! use std::sync::Arc;
//!
//! let target = MultiQuantumTarget::new(
//!     Arc::new(NullTarget::new()),
//!     MultiQuantumConfig::default(),
//! )
//! .unwrap();
//! target.start().unwrap();
//! target.write(Record::message(Level::Info, "app", "hello".into()));
//! target.flush().unwrap();
//! target.stop().unwrap();
//! ```

mod admission;
mod deferred;
mod multi_quantum;
mod quantum;
mod queued;
mod record;
mod stats;
mod target;

pub use deferred::DeferredTarget;
pub use multi_quantum::{MultiQuantumConfig, MultiQuantumTarget};
pub use quantum::{QuantumConfig, QuantumTarget};
pub use queued::{QueuedConfig, QueuedTarget};
pub use record::{monotonic_nanos, Level, Record, RecordKind};
pub use stats::{AsyncStats, StatsSnapshot};
pub use target::{ConfigError, NullTarget, StdoutTarget, Target, TargetError};

// Re-exported so callers can configure targets without naming the
// primitives crate.
pub use slotring::CongestionPolicy;

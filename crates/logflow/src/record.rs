use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// What a record means to the delivery pipeline.
///
/// Sentinels are ordinary in-band records: they travel through the same
/// rings as messages so they keep their ordering position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A regular log message, destined for the sub-target's `write`.
    Message,
    /// Flush request; the sequence number lets synchronous flush callers
    /// wait for their own sentinel to be processed.
    Flush(u64),
    /// End-of-stream marker for a producer or the whole target.
    Poison,
}

/// A log record as the delivery core sees it.
///
/// Fixed-size value; the variable-length payload lives in the heap buffer
/// owned by `message`. Ownership moves producer -> ring -> (funnel) ->
/// consumer; the consumer that writes the record to the sub-target releases
/// the payload.
#[derive(Debug, Clone)]
pub struct Record {
    /// Nanoseconds since the process-wide monotonic epoch; monotone within
    /// a producer thread by construction.
    pub timestamp_nanos: u64,
    /// Producer identity: the thread-slot id inside a multi-quantum target,
    /// a process-wide thread ordinal elsewhere.
    pub thread: u64,
    pub level: Level,
    /// Originating component, typically a module path.
    pub source: &'static str,
    pub message: String,
    pub kind: RecordKind,
}

impl Record {
    /// Creates a message record stamped with the current monotonic time.
    pub fn message(level: Level, source: &'static str, message: String) -> Self {
        Self {
            timestamp_nanos: monotonic_nanos(),
            thread: thread_ordinal(),
            level,
            source,
            message,
            kind: RecordKind::Message,
        }
    }

    pub(crate) fn flush(seq: u64) -> Self {
        Self {
            timestamp_nanos: monotonic_nanos(),
            thread: thread_ordinal(),
            level: Level::Trace,
            source: "",
            message: String::new(),
            kind: RecordKind::Flush(seq),
        }
    }

    pub(crate) fn poison() -> Self {
        Self {
            timestamp_nanos: monotonic_nanos(),
            thread: thread_ordinal(),
            level: Level::Trace,
            source: "",
            message: String::new(),
            kind: RecordKind::Poison,
        }
    }

    /// Re-acquires the timestamp. Producers call this inside the ring
    /// reservation so that a thread's records carry non-decreasing stamps in
    /// ring order.
    #[inline]
    pub(crate) fn stamp_now(&mut self) {
        self.timestamp_nanos = monotonic_nanos();
    }

    #[inline]
    pub fn is_message(&self) -> bool {
        matches!(self.kind, RecordKind::Message)
    }

    #[inline]
    pub fn is_flush(&self) -> bool {
        matches!(self.kind, RecordKind::Flush(_))
    }

    #[inline]
    pub fn is_poison(&self) -> bool {
        matches!(self.kind, RecordKind::Poison)
    }
}

/// Nanoseconds since the process-wide monotonic epoch.
///
/// `Instant` is monotonic across threads, so timestamps taken by any two
/// threads are comparable and a single thread's stamps never go backwards.
pub fn monotonic_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Small process-wide thread ordinal, assigned on first use.
fn thread_ordinal() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    thread_local! {
        static ORDINAL: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ORDINAL.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_monotonic_within_thread() {
        let mut last = 0;
        for _ in 0..1000 {
            let now = monotonic_nanos();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_record_kinds() {
        let msg = Record::message(Level::Info, "core", "hello".into());
        assert!(msg.is_message() && !msg.is_flush() && !msg.is_poison());

        let flush = Record::flush(3);
        assert!(flush.is_flush());
        assert_eq!(flush.kind, RecordKind::Flush(3));

        assert!(Record::poison().is_poison());
    }

    #[test]
    fn test_thread_ordinals_differ() {
        let here = thread_ordinal();
        let there = std::thread::spawn(thread_ordinal).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::Warn.to_string(), "WARN");
        assert!(Level::Error > Level::Info);
    }
}

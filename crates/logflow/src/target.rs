use crate::record::Record;
use std::io::Write as _;
use std::time::Duration;
use thiserror::Error;

/// Error types for target lifecycle operations.
///
/// Note that [`Target::write`] deliberately does not return an error: log
/// producers must never be impeded by log infrastructure. Write failures are
/// reported as a zero byte count and tracked in the target's statistics.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The target has not been started.
    #[error("target is not running")]
    NotRunning,
    /// `start` was called on a running target.
    #[error("target is already running")]
    AlreadyRunning,
    /// A synchronous flush did not complete in time.
    #[error("flush did not complete within {0:?}")]
    FlushTimeout(Duration),
    /// Underlying I/O failure in a leaf target.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration validation errors, returned before any thread is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("ring buffer size must be at least 2 (got {0})")]
    RingBufferTooSmall(usize),
    #[error("reader count must be at least 1")]
    NoReaders,
    #[error("max threads must be at least 1")]
    NoThreadSlots,
    #[error("max batch size must be at least 1")]
    EmptyBatch,
    #[error("revisit periods must be at least 1")]
    ZeroRevisitPeriod,
}

/// A log sink.
///
/// Leaf implementations perform actual I/O; asynchronous targets wrap a
/// subordinate `Target` (the *sub-target*) and move the I/O off the caller's
/// thread. Targets form chains; [`Target::end_target`] walks to the last
/// link.
pub trait Target: Send + Sync {
    /// Prepares the target for writing (spawns worker threads, opens
    /// resources). Must be called before `write`.
    fn start(&self) -> Result<(), TargetError>;

    /// Drains in-flight records and releases resources. Idempotent.
    fn stop(&self) -> Result<(), TargetError>;

    /// Writes one record, returning the number of bytes written.
    ///
    /// Zero means failure for leaf targets and "dropped" for asynchronous
    /// targets; either way the caller gets no error and must not retry.
    fn write(&self, record: Record) -> u64;

    /// Flushes buffered output. Asynchronous targets document whether this
    /// waits for the in-band flush sentinel to be processed.
    fn flush(&self) -> Result<(), TargetError>;

    /// The last target in the chain (the one doing real I/O).
    fn end_target(&self) -> &dyn Target;
}

// ---------------------------------------------------------------------
// LEAF TARGETS
// ---------------------------------------------------------------------

/// Discards everything. Useful for benchmarks and as a chain terminator.
#[derive(Debug, Default)]
pub struct NullTarget;

impl NullTarget {
    pub fn new() -> Self {
        Self
    }
}

impl Target for NullTarget {
    fn start(&self) -> Result<(), TargetError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), TargetError> {
        Ok(())
    }

    fn write(&self, record: Record) -> u64 {
        // Pretend the payload was written so accounting stays meaningful.
        record.message.len() as u64
    }

    fn flush(&self) -> Result<(), TargetError> {
        Ok(())
    }

    fn end_target(&self) -> &dyn Target {
        self
    }
}

/// Writes one line per record to standard output.
#[derive(Debug, Default)]
pub struct StdoutTarget;

impl StdoutTarget {
    pub fn new() -> Self {
        Self
    }
}

impl Target for StdoutTarget {
    fn start(&self) -> Result<(), TargetError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), TargetError> {
        Ok(())
    }

    fn write(&self, record: Record) -> u64 {
        let line = format!(
            "{} [{}] {} {}\n",
            record.timestamp_nanos, record.level, record.source, record.message
        );
        match std::io::stdout().lock().write_all(line.as_bytes()) {
            Ok(()) => line.len() as u64,
            Err(_) => 0,
        }
    }

    fn flush(&self) -> Result<(), TargetError> {
        std::io::stdout().lock().flush()?;
        Ok(())
    }

    fn end_target(&self) -> &dyn Target {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;

    #[test]
    fn test_null_target_reports_payload_bytes() {
        let target = NullTarget::new();
        target.start().unwrap();
        let written = target.write(Record::message(Level::Info, "t", "12345".into()));
        assert_eq!(written, 5);
        target.flush().unwrap();
        target.stop().unwrap();
    }

    #[test]
    fn test_end_target_of_leaf_is_self() {
        let target = NullTarget::new();
        let end = target.end_target();
        assert_eq!(end.write(Record::message(Level::Info, "t", "xy".into())), 2);
    }
}

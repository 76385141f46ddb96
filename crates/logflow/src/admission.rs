use crate::record::Record;
use crate::stats::AsyncStats;
use slotring::{Admission, CongestionPolicy, ForcedPush, SlotRing};

/// Outcome of admitting a record into a ring under a congestion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admit {
    /// The record is in the ring. `ring_was_empty` is the producer-side
    /// hint used to raise the non-empty ring bit.
    Accepted { bytes: u64, ring_was_empty: bool },
    /// The record was dropped by the policy (and counted if it was a
    /// message).
    Rejected,
}

/// Shared producer-side admission path for the quantum and multi-quantum
/// targets.
///
/// The timestamp is re-acquired here, inside the reservation, so a thread's
/// records enter its ring with non-decreasing stamps. Poison is admitted
/// unconditionally, replacing the newest entry on a persistently full ring;
/// the displaced record is counted as dropped.
pub(crate) fn admit(
    ring: &SlotRing<Record>,
    policy: CongestionPolicy,
    mut record: Record,
    stats: &AsyncStats,
) -> Admit {
    record.stamp_now();
    let bytes = record.message.len() as u64;
    let is_message = record.is_message();
    let is_flush = record.is_flush();

    if record.is_poison() {
        force(ring, record, stats);
        return Admit::Accepted {
            bytes,
            ring_was_empty: false,
        };
    }

    if policy == CongestionPolicy::Wait {
        let ring_was_empty = ring.push_wait(record);
        if is_message {
            stats.add_write();
        }
        return Admit::Accepted {
            bytes,
            ring_was_empty,
        };
    }

    match ring.try_push(record) {
        Ok(ring_was_empty) => {
            if is_message {
                stats.add_write();
            }
            Admit::Accepted {
                bytes,
                ring_was_empty,
            }
        }
        Err(record) => match policy.on_full(is_flush, false) {
            Admission::Dropped => {
                if is_message {
                    stats.add_drops(1);
                }
                Admit::Rejected
            }
            Admission::Admitted | Admission::RetryAfterBackoff => {
                force(ring, record, stats);
                if is_message {
                    stats.add_write();
                }
                Admit::Accepted {
                    bytes,
                    ring_was_empty: false,
                }
            }
        },
    }
}

fn force(ring: &SlotRing<Record>, record: Record, stats: &AsyncStats) {
    match ring.push_forced(record) {
        ForcedPush::Queued => {}
        ForcedPush::Replaced(old) => {
            if old.is_message() {
                stats.add_drops(1);
            }
        }
    }
}

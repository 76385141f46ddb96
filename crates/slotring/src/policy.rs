/// Producer-side behavior when a ring buffer (or the thread-slot registry)
/// is full.
///
/// `Wait` preserves every record at the cost of coupling producer latency to
/// consumer throughput; prefer `DiscardLog` for strict-latency applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CongestionPolicy {
    /// Spin with adaptive backoff until space frees up.
    #[default]
    Wait,
    /// Drop normal log records; flush and poison sentinels are still
    /// admitted.
    DiscardLog,
    /// Drop everything, flush sentinels included. Only the terminal poison
    /// sentinel is admitted.
    DiscardAll,
}

/// Decision for a record that found its ring full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admit unconditionally (forced publication, possibly replacing the
    /// newest entry).
    Admitted,
    /// Drop the record and count it.
    Dropped,
    /// Back off and retry until space frees up.
    RetryAfterBackoff,
}

impl CongestionPolicy {
    /// Resolves what to do with a record of the given kind on a full ring.
    ///
    /// Poison is always admitted: the stop protocol depends on it reaching
    /// the reader. Flush sentinels ride in-band under `Wait`, are force-
    /// admitted under `DiscardLog`, and are dropped under `DiscardAll`.
    #[inline]
    pub fn on_full(self, is_flush: bool, is_poison: bool) -> Admission {
        if is_poison {
            return Admission::Admitted;
        }
        match self {
            Self::Wait => Admission::RetryAfterBackoff,
            Self::DiscardLog => {
                if is_flush {
                    Admission::Admitted
                } else {
                    Admission::Dropped
                }
            }
            Self::DiscardAll => Admission::Dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_always_admitted() {
        for policy in [
            CongestionPolicy::Wait,
            CongestionPolicy::DiscardLog,
            CongestionPolicy::DiscardAll,
        ] {
            assert_eq!(policy.on_full(false, true), Admission::Admitted);
        }
    }

    #[test]
    fn test_flush_dropped_only_under_discard_all() {
        assert_eq!(
            CongestionPolicy::Wait.on_full(true, false),
            Admission::RetryAfterBackoff
        );
        assert_eq!(
            CongestionPolicy::DiscardLog.on_full(true, false),
            Admission::Admitted
        );
        assert_eq!(
            CongestionPolicy::DiscardAll.on_full(true, false),
            Admission::Dropped
        );
    }

    #[test]
    fn test_normal_records_follow_policy() {
        assert_eq!(
            CongestionPolicy::Wait.on_full(false, false),
            Admission::RetryAfterBackoff
        );
        assert_eq!(
            CongestionPolicy::DiscardLog.on_full(false, false),
            Admission::Dropped
        );
        assert_eq!(
            CongestionPolicy::DiscardAll.on_full(false, false),
            Admission::Dropped
        );
    }
}

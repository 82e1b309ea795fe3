//! Lock-free delivery accounting.
//!
//! Every counter is a monotonically increasing [`AtomicU64`] on its own cache
//! line, so simulators bumping `submitted` never contend with the drain tasks
//! bumping `succeeded`/`failed`. Every field of [`DeliveryStats`] is therefore
//! non-decreasing across snapshots, which is what lets rates and metrics be
//! computed from plain differences.

use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicU64, Ordering};

/// Point-in-time view of the dispatcher counters.
///
/// `succeeded + failed <= accepted` and `accepted + dropped <= submitted`
/// hold for every snapshot. The gap in the latter is submits still in
/// progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events offered to the outbound queue, whatever the outcome.
    pub submitted: u64,
    /// Events admitted into the outbound queue.
    pub accepted: u64,
    /// Events the broker confirmed.
    pub succeeded: u64,
    /// Events that failed terminally after broker-level retries.
    pub failed: u64,
    /// Events rejected at submit time because the queue was full or closed.
    pub dropped: u64,
}

impl DeliveryStats {
    /// Accepted events with no completion yet.
    pub const fn in_flight(&self) -> u64 {
        self.accepted
            .saturating_sub(self.succeeded)
            .saturating_sub(self.failed)
    }

    /// Per-counter growth since an earlier snapshot.
    pub const fn since(&self, earlier: &Self) -> Self {
        Self {
            submitted: self.submitted.saturating_sub(earlier.submitted),
            accepted: self.accepted.saturating_sub(earlier.accepted),
            succeeded: self.succeeded.saturating_sub(earlier.succeeded),
            failed: self.failed.saturating_sub(earlier.failed),
            dropped: self.dropped.saturating_sub(earlier.dropped),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DeliveryCounters {
    submitted: CachePadded<AtomicU64>,
    accepted: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
    succeeded: CachePadded<AtomicU64>,
    failed: CachePadded<AtomicU64>,
}

impl DeliveryCounters {
    /// Called before a record is offered to the queue, so that any completion
    /// for it is ordered after this increment.
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    /// Reads completions first and `submitted` last, so every outcome
    /// observed was submitted before it.
    ///
    /// A completion can be drained before the submitting task gets to bump
    /// `accepted`. Such a record is already in the queue, so `accepted` is
    /// raised to cover it; both inputs only grow, so the result does too.
    pub(crate) fn snapshot(&self) -> DeliveryStats {
        let succeeded = self.succeeded.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        let accepted = self.accepted.load(Ordering::Acquire);
        let dropped = self.dropped.load(Ordering::Acquire);
        let submitted = self.submitted.load(Ordering::Acquire);

        DeliveryStats {
            submitted,
            accepted: accepted.max(succeeded.saturating_add(failed)),
            succeeded,
            failed,
            dropped,
        }
    }
}

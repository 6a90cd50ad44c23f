//! # Metrics Aggregator
//!
//! Collects the events emitted by every load-generator invocation and turns
//! them into per-operation counters and latency histograms.
//!
//! ## Data Flow
//!
//! Producers call [`MetricsAggregator::push_sent`] and
//! [`MetricsAggregator::push_completed`], which place an [`Event`] on a bounded
//! queue with `try_send`. A single consumer task drains the queue and applies
//! each event. Producers never wait: if the queue is full the event is dropped
//! and only the drop counter moves. Measuring must never slow down the thing
//! being measured, at the cost of slightly undercounting under overload.
//!
//! ## Shutdown
//!
//! [`MetricsAggregator::shutdown`] signals the consumer, which then flushes
//! whatever is already queued (bounded by a grace period) before exiting, so
//! the final report reflects nearly every completion.

use crate::histogram::{LatencyHistogram, LatencySummary};
use crate::operation::OperationKind;
use crate::reporter::{Snapshot, SnapshotMark};
use crate::results::{FinalReport, RunContext};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Which half of an invocation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sent,
    Completed,
}

/// One statistics event. `latency`, `priority` and `success` are only
/// meaningful for [`Phase::Completed`].
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub operation: OperationKind,
    pub phase: Phase,
    pub latency: Duration,
    pub priority: u8,
    pub success: bool,
}

impl Event {
    pub fn sent(operation: OperationKind) -> Self {
        Self {
            operation,
            phase: Phase::Sent,
            latency: Duration::ZERO,
            priority: 0,
            success: true,
        }
    }

    pub fn completed(operation: OperationKind, latency: Duration, priority: u8, success: bool) -> Self {
        Self {
            operation,
            phase: Phase::Completed,
            latency,
            priority,
            success,
        }
    }
}

/// Per-operation counters. A Completed event increments exactly one of
/// `completed` or `errors`.
#[derive(Debug, Default)]
pub struct OperationStats {
    sent: AtomicU64,
    completed: AtomicU64,
    errors: AtomicU64,
}

/// Plain copy of an [`OperationStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub sent: u64,
    pub completed: u64,
    pub errors: u64,
}

impl OperationStats {
    pub fn load(&self) -> OperationCounts {
        // Outcomes before sent: a Sent is always applied before its own
        // Completed, so this order never shows more outcomes than sends.
        let completed = self.completed.load(Ordering::Acquire);
        let errors = self.errors.load(Ordering::Acquire);
        let sent = self.sent.load(Ordering::Acquire);
        OperationCounts {
            sent,
            completed,
            errors,
        }
    }
}

/// Run-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub sent: u64,
    pub completed: u64,
    pub errors: u64,
    /// `sent - completed - errors`; signed so a defect stays visible
    pub pending: i64,
    /// Statistics events shed because the queue was full
    pub dropped_events: u64,
}

impl Totals {
    /// Verify the in-flight accounting.
    ///
    /// A negative pending count is tolerated only when events were shed,
    /// since a dropped Sent followed by an accepted Completed undercounts
    /// sends. Without drops it means something was counted twice.
    pub fn check(&self) -> Result<(), String> {
        if self.pending < 0 && self.dropped_events == 0 {
            return Err(format!(
                "negative pending count {} (sent={}, completed={}, errors={}) with no dropped events",
                self.pending, self.sent, self.completed, self.errors
            ));
        }
        Ok(())
    }
}

/// Counters and histogram for one operation kind.
#[derive(Debug, Default)]
struct OperationMetrics {
    stats: OperationStats,
    latency: LatencyHistogram,
}

/// State shared by producers (drop counter), the consumer (everything else)
/// and readers.
#[derive(Debug)]
struct AggregatorState {
    operations: [OperationMetrics; OperationKind::COUNT],
    dropped_events: AtomicU64,
}

impl AggregatorState {
    fn new() -> Self {
        Self {
            operations: std::array::from_fn(|_| OperationMetrics::default()),
            dropped_events: AtomicU64::new(0),
        }
    }

    fn apply(&self, event: Event) {
        let metrics = &self.operations[event.operation.index()];
        match event.phase {
            Phase::Sent => {
                metrics.stats.sent.fetch_add(1, Ordering::AcqRel);
            }
            Phase::Completed if event.success => {
                metrics.latency.record(event.latency, event.priority);
                metrics.stats.completed.fetch_add(1, Ordering::AcqRel);
            }
            Phase::Completed => {
                metrics.stats.errors.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

/// Owner of all per-operation statistics for one run.
///
/// Constructed once per run and shared by `Arc` with the load generator, the
/// rate controller and the reporter.
pub struct MetricsAggregator {
    sender: mpsc::Sender<Event>,
    state: Arc<AggregatorState>,
    shutdown: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
    capacity: usize,
}

impl MetricsAggregator {
    /// Create the aggregator and spawn its consumer task on the current
    /// Tokio runtime.
    ///
    /// `capacity` bounds the event queue; `drain_grace` bounds the final
    /// flush performed on shutdown.
    pub fn start(capacity: usize, drain_grace: Duration) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let state = Arc::new(AggregatorState::new());
        let shutdown = CancellationToken::new();

        let consumer = tokio::spawn(consume(
            receiver,
            Arc::clone(&state),
            shutdown.clone(),
            drain_grace,
        ));

        debug!(capacity, "Metrics aggregator started");

        Self {
            sender,
            state,
            shutdown,
            consumer: Mutex::new(Some(consumer)),
            started_at: Instant::now(),
            capacity,
        }
    }

    /// Record that a request is about to be sent. Non-blocking, best-effort.
    pub fn push_sent(&self, operation: OperationKind) {
        self.push(Event::sent(operation));
    }

    /// Record the outcome of a request. Non-blocking, best-effort.
    pub fn push_completed(&self, operation: OperationKind, latency: Duration, priority: u8, success: bool) {
        self.push(Event::completed(operation, latency, priority, success));
    }

    fn push(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.state.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Instant the aggregator was created; the run's time origin.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn operation_counts(&self, operation: OperationKind) -> OperationCounts {
        self.state.operations[operation.index()].stats.load()
    }

    pub fn latency(&self, operation: OperationKind) -> LatencySummary {
        self.state.operations[operation.index()].latency.snapshot()
    }

    pub fn high_priority_latency(&self, operation: OperationKind) -> LatencySummary {
        self.state.operations[operation.index()]
            .latency
            .high_priority_snapshot()
    }

    pub fn dropped_events(&self) -> u64 {
        self.state.dropped_events.load(Ordering::Acquire)
    }

    /// Per-operation counters read once each, indexed by [`OperationKind::index`].
    pub fn all_operation_counts(&self) -> [OperationCounts; OperationKind::COUNT] {
        OperationKind::ALL.map(|kind| self.operation_counts(kind))
    }

    /// Run-wide `(sent, completed, errors, pending)` plus the drop count.
    pub fn totals(&self) -> Totals {
        self.totals_of(&self.all_operation_counts())
    }

    /// Run-wide totals summed from an already loaded set of per-operation counts.
    pub fn totals_of(&self, counts: &[OperationCounts]) -> Totals {
        let mut totals = Totals::default();
        for c in counts {
            totals.sent += c.sent;
            totals.completed += c.completed;
            totals.errors += c.errors;
        }
        // Read after the counters: any drop that could explain a negative
        // pending happened before the Completed it orphaned was applied.
        totals.dropped_events = self.dropped_events();
        totals.pending = totals.sent as i64 - totals.completed as i64 - totals.errors as i64;

        let check = totals.check();
        if let Err(message) = &check {
            error!("{}", message);
        }
        debug_assert!(check.is_ok(), "{:?}", check);
        if check.is_ok() && totals.pending < 0 {
            warn!(
                pending = totals.pending,
                dropped = totals.dropped_events,
                "Pending count is negative because statistics events were shed"
            );
        }

        totals
    }

    /// Point-in-time derived view relative to a previous mark.
    pub fn snapshot(&self, previous: &SnapshotMark) -> Snapshot {
        Snapshot::capture(self, previous, Instant::now())
    }

    /// Serializable end-of-run report.
    pub fn final_report(&self, run: RunContext) -> FinalReport {
        FinalReport::build(self, run)
    }

    /// Stop the consumer after flushing already-queued events.
    ///
    /// Idempotent; later calls return immediately.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Metrics consumer task failed: {}", e);
            }
        }
    }
}

impl Drop for MetricsAggregator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn consume(
    mut receiver: mpsc::Receiver<Event>,
    state: Arc<AggregatorState>,
    shutdown: CancellationToken,
    drain_grace: Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => state.apply(event),
                None => return,
            },
        }
    }

    // Final flush of whatever is already queued, bounded by the grace period
    let deadline = Instant::now() + drain_grace;
    let mut flushed: u64 = 0;
    while let Ok(event) = receiver.try_recv() {
        state.apply(event);
        flushed += 1;
        if flushed % 1024 == 0 && Instant::now() >= deadline {
            warn!(flushed, "Drain grace period expired with statistics events still queued");
            break;
        }
    }
    debug!(flushed, "Metrics consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sent_and_completed_update_counters() {
        let metrics = MetricsAggregator::start(64, Duration::from_secs(1));

        metrics.push_sent(OperationKind::Query);
        metrics.push_completed(OperationKind::Query, Duration::from_millis(3), 1, true);
        metrics.push_sent(OperationKind::Query);
        metrics.push_completed(OperationKind::Query, Duration::from_millis(7), 3, false);
        metrics.push_sent(OperationKind::SensorUpload);
        metrics.shutdown().await;

        let query = metrics.operation_counts(OperationKind::Query);
        assert_eq!(
            query,
            OperationCounts {
                sent: 2,
                completed: 1,
                errors: 1
            }
        );

        // Failures never reach the histogram
        let latency = metrics.latency(OperationKind::Query);
        assert_eq!(latency.count, 1);
        assert_eq!(latency.max_ms, 3.0);
        assert_eq!(metrics.high_priority_latency(OperationKind::Query).count, 0);

        let totals = metrics.totals();
        assert_eq!(totals.sent, 3);
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.errors, 1);
        assert_eq!(totals.pending, 1);
        assert_eq!(totals.dropped_events, 0);
        assert!(totals.check().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let metrics = MetricsAggregator::start(8, Duration::from_millis(10));
        metrics.shutdown().await;
        metrics.shutdown().await;
        assert_eq!(metrics.totals(), Totals::default());
    }

    #[test]
    fn test_totals_check_flags_unexplained_negative_pending() {
        let defect = Totals {
            sent: 1,
            completed: 2,
            errors: 0,
            pending: -1,
            dropped_events: 0,
        };
        assert!(defect.check().is_err());

        let shed = Totals {
            dropped_events: 1,
            ..defect
        };
        assert!(shed.check().is_ok());
    }

    /// A burst larger than the queue drops exactly the excess and never waits.
    #[tokio::test(flavor = "current_thread")]
    async fn test_saturated_queue_drops_excess_without_blocking() {
        let capacity = 100;
        let metrics = MetricsAggregator::start(capacity, Duration::from_secs(1));

        // The current-thread runtime cannot run the consumer until we yield,
        // so the whole burst lands on a queue nobody is draining.
        let started = Instant::now();
        for _ in 0..(capacity * 3) {
            metrics.push_sent(OperationKind::ReadWrite);
        }
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(metrics.dropped_events(), (capacity * 2) as u64);

        metrics.shutdown().await;
        let totals = metrics.totals();
        assert_eq!(totals.sent, capacity as u64);
        assert_eq!(totals.dropped_events, (capacity * 2) as u64);
    }
}

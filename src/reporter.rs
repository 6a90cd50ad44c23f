//! # Periodic Reporting
//!
//! Read-only views over a [`MetricsAggregator`]. A [`Snapshot`] is a pure
//! function of the aggregated counters, the histograms and two timestamps;
//! taking one never mutates aggregator state. The [`Reporter`] emits one
//! snapshot per interval on its own cadence, independent of the admission
//! timer.

use crate::metrics::MetricsAggregator;
use crate::operation::OperationKind;
use crate::utils::{format_duration, format_request_rate, rate_per_second};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Counters and timestamp of the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMark {
    pub at: Instant,
    pub sent: u64,
    pub completed: u64,
}

impl SnapshotMark {
    /// Mark at the aggregator's start with zeroed counters.
    pub fn origin(metrics: &MetricsAggregator) -> Self {
        Self {
            at: metrics.started_at(),
            sent: 0,
            completed: 0,
        }
    }
}

/// Per-operation part of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSnapshot {
    pub operation: OperationKind,
    pub sent: u64,
    pub completed: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub high_priority_count: u64,
    pub high_priority_avg_ms: f64,
}

/// Point-in-time derived view of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub at: Instant,
    /// Seconds since the aggregator started
    pub elapsed_secs: f64,
    /// Seconds since the previous snapshot
    pub interval_secs: f64,
    pub sent: u64,
    pub completed: u64,
    pub errors: u64,
    pub pending: i64,
    pub dropped_events: u64,
    pub send_rate: f64,
    pub complete_rate: f64,
    pub avg_send_rate: f64,
    pub avg_complete_rate: f64,
    pub operations: Vec<OperationSnapshot>,
}

impl Snapshot {
    /// Build a snapshot at `now` relative to `previous`.
    ///
    /// Instantaneous rates use the delta since `previous`; cumulative rates
    /// use the time since the aggregator started. Both are zero when the
    /// respective window is empty.
    pub fn capture(metrics: &MetricsAggregator, previous: &SnapshotMark, now: Instant) -> Self {
        let elapsed_secs = now.saturating_duration_since(metrics.started_at()).as_secs_f64();
        let interval_secs = now.saturating_duration_since(previous.at).as_secs_f64();
        // One read per operation feeds both the rows and the totals line
        let counts = metrics.all_operation_counts();
        let totals = metrics.totals_of(&counts);

        let operations = OperationKind::ALL
            .iter()
            .zip(counts.iter())
            .map(|(&operation, counts)| {
                let latency = metrics.latency(operation);
                let high_priority = metrics.high_priority_latency(operation);
                OperationSnapshot {
                    operation,
                    sent: counts.sent,
                    completed: counts.completed,
                    errors: counts.errors,
                    avg_latency_ms: latency.avg_ms,
                    high_priority_count: high_priority.count,
                    high_priority_avg_ms: high_priority.avg_ms,
                }
            })
            .collect();

        Self {
            at: now,
            elapsed_secs,
            interval_secs,
            sent: totals.sent,
            completed: totals.completed,
            errors: totals.errors,
            pending: totals.pending,
            dropped_events: totals.dropped_events,
            send_rate: rate_per_second(totals.sent.saturating_sub(previous.sent), interval_secs),
            complete_rate: rate_per_second(
                totals.completed.saturating_sub(previous.completed),
                interval_secs,
            ),
            avg_send_rate: rate_per_second(totals.sent, elapsed_secs),
            avg_complete_rate: rate_per_second(totals.completed, elapsed_secs),
            operations,
        }
    }

    /// Mark to pass as `previous` to the next capture.
    pub fn mark(&self) -> SnapshotMark {
        SnapshotMark {
            at: self.at,
            sent: self.sent,
            completed: self.completed,
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>8}] sent {} ({}, avg {}) | completed {} ({}, avg {}) | pending {} | errors {}",
            format_duration(Duration::from_secs_f64(self.elapsed_secs)),
            self.sent,
            format_request_rate(self.send_rate),
            format_request_rate(self.avg_send_rate),
            self.completed,
            format_request_rate(self.complete_rate),
            format_request_rate(self.avg_complete_rate),
            self.pending,
            self.errors,
        )?;
        if self.dropped_events > 0 {
            write!(f, " | dropped events {}", self.dropped_events)?;
        }
        for op in self.operations.iter().filter(|op| op.sent > 0) {
            write!(
                f,
                "\n    {:<18} completed {:>8} errors {:>6} avg {:>8.2}ms",
                op.operation.as_str(),
                op.completed,
                op.errors,
                op.avg_latency_ms
            )?;
            if op.high_priority_count > 0 {
                write!(
                    f,
                    " | high priority {} avg {:.2}ms",
                    op.high_priority_count, op.high_priority_avg_ms
                )?;
            }
        }
        Ok(())
    }
}

/// Emits snapshots at a fixed interval.
pub struct Reporter {
    metrics: Arc<MetricsAggregator>,
    last: SnapshotMark,
}

impl Reporter {
    pub fn new(metrics: Arc<MetricsAggregator>) -> Self {
        let last = SnapshotMark::origin(&metrics);
        Self { metrics, last }
    }

    /// Capture a snapshot relative to the previous one and advance the mark.
    pub fn snapshot(&mut self) -> Snapshot {
        let snapshot = self.metrics.snapshot(&self.last);
        self.last = snapshot.mark();
        snapshot
    }

    /// Log a snapshot every `interval` until `cancel` fires.
    ///
    /// Returns the number of snapshots emitted.
    pub async fn run(mut self, interval: Duration, cancel: CancellationToken) -> u64 {
        let interval = interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut emitted = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = self.snapshot();
                    info!("{}", snapshot);
                    emitted += 1;
                }
            }
        }

        debug!(emitted, "Reporter stopped");
        emitted
    }
}

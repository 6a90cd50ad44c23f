use crate::config::LoadMode;
use crate::controller::ShutdownSummary;
use crate::error::LoadError;
use crate::histogram::{bucket_label, LatencySummary, BUCKET_COUNT};
use crate::metrics::MetricsAggregator;
use crate::operation::OperationKind;
use crate::utils::{format_request_rate, percentage, rate_per_second, share_bar};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Timeout for posting the report to a collector.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Width of the distribution bars in the human-readable report.
const BAR_WIDTH: usize = 30;

/// Facts about the run that the aggregator does not know itself.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub mode: LoadMode,
    /// Target rate in rate mode, loop count in concurrency mode
    pub target: u64,
    pub server_url: String,
    pub controller: ShutdownSummary,
}

/// Identification of the run that produced a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub version: String,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub mode: LoadMode,
    pub target: u64,
    pub server_url: String,
}

/// Final statistics for one operation kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    pub operation: OperationKind,
    pub sent: u64,
    pub completed: u64,
    pub errors: u64,
    pub latency: LatencySummary,
    /// Present only when at least one high-priority sample was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_priority: Option<LatencySummary>,
}

/// End-of-run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub metadata: ReportMetadata,
    pub elapsed_seconds: f64,
    pub total_sent: u64,
    pub total_completed: u64,
    pub total_errors: u64,
    pub pending: i64,
    pub dropped_events: u64,
    pub error_rate_percent: f64,
    pub avg_send_rate: f64,
    pub avg_complete_rate: f64,
    pub high_priority_count: u64,
    pub high_priority_percentage: f64,
    pub controller: ShutdownSummary,
    pub operations: Vec<OperationReport>,
}

impl FinalReport {
    /// Build the report from the aggregator's current state.
    ///
    /// Only operation kinds that saw at least one request are listed.
    pub fn build(metrics: &MetricsAggregator, run: RunContext) -> Self {
        let elapsed_seconds = metrics.started_at().elapsed().as_secs_f64();
        let totals = metrics.totals();

        let operations: Vec<OperationReport> = OperationKind::ALL
            .iter()
            .filter_map(|&operation| {
                let counts = metrics.operation_counts(operation);
                if counts.sent == 0 && counts.completed == 0 && counts.errors == 0 {
                    return None;
                }
                let high_priority = metrics.high_priority_latency(operation);
                Some(OperationReport {
                    operation,
                    sent: counts.sent,
                    completed: counts.completed,
                    errors: counts.errors,
                    latency: metrics.latency(operation),
                    high_priority: high_priority.has_data().then_some(high_priority),
                })
            })
            .collect();

        let high_priority_count = operations
            .iter()
            .filter_map(|op| op.high_priority.as_ref())
            .map(|summary| summary.count)
            .sum();

        Self {
            metadata: ReportMetadata {
                version: crate::VERSION.to_string(),
                run_id: run.run_id,
                timestamp: chrono::Utc::now(),
                mode: run.mode,
                target: run.target,
                server_url: run.server_url,
            },
            elapsed_seconds,
            total_sent: totals.sent,
            total_completed: totals.completed,
            total_errors: totals.errors,
            pending: totals.pending,
            dropped_events: totals.dropped_events,
            error_rate_percent: percentage(totals.errors, totals.completed + totals.errors),
            avg_send_rate: rate_per_second(totals.sent, elapsed_seconds),
            avg_complete_rate: rate_per_second(totals.completed, elapsed_seconds),
            high_priority_count,
            high_priority_percentage: percentage(high_priority_count, totals.completed),
            controller: run.controller,
            operations,
        }
    }

    pub fn operation(&self, operation: OperationKind) -> Option<&OperationReport> {
        self.operations.iter().find(|op| op.operation == operation)
    }
}

fn write_distribution(f: &mut fmt::Formatter<'_>, summary: &LatencySummary) -> fmt::Result {
    for index in 0..BUCKET_COUNT {
        let count = summary.buckets[index];
        writeln!(
            f,
            "    {:>8}: {:>10} ({:>5.1}%) {}",
            bucket_label(index),
            count,
            summary.bucket_percentage(index),
            share_bar(count, summary.count, BAR_WIDTH)
        )?;
    }
    Ok(())
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Final Report ({}) ===", self.metadata.run_id)?;
        writeln!(f, "Target: {} ({} {})", self.metadata.server_url, self.metadata.mode, self.metadata.target)?;
        writeln!(f, "Elapsed: {:.2}s", self.elapsed_seconds)?;
        writeln!(f, "Sent: {}", self.total_sent)?;
        writeln!(f, "Completed: {}", self.total_completed)?;
        for op in &self.operations {
            writeln!(f, "  {}: {} (errors: {})", op.operation, op.completed, op.errors)?;
        }
        writeln!(f, "Pending: {}", self.pending)?;
        writeln!(f, "Errors: {}", self.total_errors)?;
        if self.dropped_events > 0 {
            writeln!(f, "Dropped statistics events: {}", self.dropped_events)?;
        }
        if self.controller.shed > 0 || self.controller.abandoned > 0 {
            writeln!(
                f,
                "Admission: {} admitted, {} shed, {} abandoned at shutdown",
                self.controller.admitted, self.controller.shed, self.controller.abandoned
            )?;
        }

        if self.high_priority_count > 0 {
            writeln!(f, "\nHigh priority requests (priority >= 3):")?;
            for op in &self.operations {
                if let Some(hp) = &op.high_priority {
                    writeln!(f, "  {}: {}", op.operation, hp.count)?;
                }
            }
            writeln!(
                f,
                "  total: {} ({:.1}% of completed)",
                self.high_priority_count, self.high_priority_percentage
            )?;
        }

        if self.elapsed_seconds > 0.0 {
            writeln!(f, "\nAverage send rate: {}", format_request_rate(self.avg_send_rate))?;
            writeln!(f, "Average complete rate: {}", format_request_rate(self.avg_complete_rate))?;
            if self.total_completed + self.total_errors > 0 {
                writeln!(f, "Error rate: {:.2}%", self.error_rate_percent)?;
            }
        }

        writeln!(f, "\n=== Latency ===")?;
        for op in &self.operations {
            writeln!(f, "{}:", op.operation)?;
            writeln!(
                f,
                "  avg={:.2}ms min={:.2}ms max={:.2}ms",
                op.latency.avg_ms, op.latency.min_ms, op.latency.max_ms
            )?;
            write_distribution(f, &op.latency)?;
            if let Some(hp) = &op.high_priority {
                writeln!(f, "  high priority: {} requests", hp.count)?;
                writeln!(f, "  avg={:.2}ms min={:.2}ms max={:.2}ms", hp.avg_ms, hp.min_ms, hp.max_ms)?;
                write_distribution(f, hp)?;
            }
        }
        Ok(())
    }
}

/// Writes the final report to disk and to a remote collector
pub struct ResultsManager {
    report: FinalReport,
}

impl ResultsManager {
    pub fn new(report: FinalReport) -> Self {
        Self { report }
    }

    pub fn report(&self) -> &FinalReport {
        &self.report
    }

    pub fn to_json(&self) -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(&self.report)?)
    }

    /// Write the report as pretty JSON to `path`
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json().context("Failed to serialize final report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write final report to {}", path.display()))?;
        info!("Results written to: {:?}", path);
        Ok(())
    }

    /// POST the report to `url`, identifying the sender by `key`.
    ///
    /// Any status other than 200 is an error.
    pub async fn upload(&self, url: &str, key: &str) -> Result<(), LoadError> {
        let body = serde_json::to_vec(&self.report)?;
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| LoadError::Upload(e.to_string()))?;

        debug!(url, bytes = body.len(), "Uploading final report");
        let started = Instant::now();
        let response = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .header("X-Team-ID", key)
            .header("X-Team-Name", key)
            .body(body)
            .send()
            .await
            .map_err(|e| LoadError::Upload(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(LoadError::Upload(format!("collector returned status {}", status.as_u16())));
        }

        info!("Report uploaded to {} in {:?}", url, started.elapsed());
        Ok(())
    }
}

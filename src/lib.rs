//! # API Load Generator Library
//!
//! A synthetic load generator that drives a remote HTTP API at a controlled
//! rate and produces latency and throughput reports.
//!
//! ## Admission Modes
//!
//! - **Fixed rate**: one request per timer tick, with a counting gate that
//!   sheds ticks once too many requests are outstanding
//! - **Fixed concurrency**: a fixed number of loops issuing requests back to
//!   back, measuring maximum sustained throughput
//!
//! ## Architecture Overview
//!
//! - `histogram`: fixed-bucket concurrent latency histograms
//! - `metrics`: the aggregator owning every counter and histogram of a run
//! - `worker`: one unit of work (pick an operation, call the API, record it)
//! - `controller`: admission policies and the run lifecycle
//! - `reporter`: periodic snapshots
//! - `results`: the final report, its JSON file and its upload
//! - `client`, `payload`: the API and request-body collaborators
//! - `config`, `cli`, `logging`, `utils`: ambient plumbing for the binary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use api_loadgen::{
//!     AdmissionPolicy, HttpApiClient, LoadGenerator, MetricsAggregator, OperationMix,
//!     RateController, SensorPayloadGenerator,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let metrics = Arc::new(MetricsAggregator::start(1_000_000, Duration::from_millis(500)));
//!     let client = HttpApiClient::new("http://localhost:8080", Duration::from_secs(5))?;
//!     let generator = Arc::new(LoadGenerator::new(
//!         Arc::new(client),
//!         Arc::new(SensorPayloadGenerator::new(1000, 64, 64, 10)),
//!         Arc::clone(&metrics),
//!         OperationMix::default(),
//!     ));
//!
//!     let controller = RateController::new(
//!         AdmissionPolicy::fixed_rate(100)?,
//!         generator,
//!         Duration::from_secs(2),
//!     );
//!     let summary = controller
//!         .run_for(&CancellationToken::new(), Duration::from_secs(10))
//!         .await?;
//!
//!     metrics.shutdown().await;
//!     println!("admitted {} requests, {:?}", summary.admitted, metrics.totals());
//!     Ok(())
//! }
//! ```

/// HTTP client abstraction and its reqwest implementation
pub mod client;

/// Command-line interface
///
/// Provides argument parsing using clap. Every option is optional so that
/// only the values actually given override the configuration file.
pub mod cli;

/// Run configuration: JSON file, command-line overrides and validation
pub mod config;

/// Admission policies and the `Idle -> Running -> Stopping -> Stopped`
/// lifecycle of a run
pub mod controller;

pub mod error;

/// Fixed-bucket latency histograms
///
/// Lock-free recording from any number of producers, with a shadow
/// histogram for high-priority samples.
pub mod histogram;

pub mod logging;

/// Statistics aggregation
///
/// Producers push events onto a bounded queue without ever blocking; a
/// single consumer applies them to per-operation counters and histograms.
pub mod metrics;

pub mod operation;

/// Request body synthesis
pub mod payload;

/// Periodic snapshots of a running aggregator
pub mod reporter;

/// Final report, JSON output and upload to a collector
pub mod results;

pub mod utils;

/// One unit of load-generator work
pub mod worker;

pub use client::{ApiClient, ApiResponse, HttpApiClient};
pub use cli::Args;
pub use config::{LoadConfig, LoadMode};
pub use controller::{AdmissionPolicy, ControllerState, RateController, ShutdownSummary};
pub use error::{CallError, LoadError};
pub use histogram::{LatencyHistogram, LatencySummary};
pub use metrics::{MetricsAggregator, Totals};
pub use operation::{OperationKind, OperationMix};
pub use payload::{Payload, PayloadSource, SensorPayloadGenerator};
pub use reporter::{Reporter, Snapshot, SnapshotMark};
pub use results::{FinalReport, ResultsManager, RunContext};
pub use worker::LoadGenerator;

/// The current version of the load generator
///
/// Populated from Cargo.toml and written into every final report.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Base URL of the API under test
    pub const SERVER_URL: &str = "http://localhost:8080";

    /// Run duration in seconds
    pub const DURATION_SECONDS: f64 = 30.0;

    /// Target requests per second in rate mode
    pub const RATE: u32 = 100;

    /// Number of request loops in concurrency mode
    pub const CONCURRENCY: usize = 10;

    /// Size of the simulated device id space
    pub const KEY_RANGE: u32 = 1000;

    /// Synthetic payload size bounds in bytes
    pub const DATA_SIZE_MIN: usize = 64;
    pub const DATA_SIZE_MAX: usize = 64;

    /// Items per batch request
    pub const BATCH_SIZE: usize = 10;

    /// Seconds between progress snapshots
    pub const REPORT_INTERVAL_SECONDS: f64 = 1.0;

    /// Per-request HTTP timeout
    pub const REQUEST_TIMEOUT_MS: u64 = 5000;

    /// How long in-flight requests may take to finish after the run ends
    pub const SHUTDOWN_GRACE_MS: u64 = 2000;

    /// Bound of the statistics event queue
    ///
    /// Two events per request, so this absorbs roughly 500k outstanding
    /// requests worth of events before anything is dropped. The saturation
    /// test in `metrics` exercises the drop path with a small capacity.
    pub const QUEUE_CAPACITY: usize = 1_000_000;

    /// Bound on the final flush of queued statistics events
    pub const METRICS_DRAIN_GRACE_MS: u64 = 500;
}

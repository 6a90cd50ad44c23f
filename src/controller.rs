//! # Rate Controller
//!
//! Orchestrates [`LoadGenerator`] invocations under one admission policy and
//! owns the run lifecycle.
//!
//! ## Key Components
//!
//! - **AdmissionPolicy**: fixed-rate or fixed-concurrency strategy behind a
//!   single [`AdmissionPolicy::run`] entry point
//! - **RateController**: `Idle -> Running -> Stopping -> Stopped` state machine
//!   that starts the policy, propagates cancellation and drains in-flight work
//! - **ShutdownSummary**: what happened to the invocations once the run ended
//!
//! ## Admission Policies
//!
//! The fixed-rate policy fires a timer every `1/rate` seconds. Each tick
//! either takes a permit from a counting gate and launches one independent
//! invocation, or is shed when `max_in_flight` invocations are already
//! outstanding. Shedding keeps task count and memory bounded when the target
//! cannot keep up.
//!
//! The fixed-concurrency policy starts a fixed number of loops once; each
//! loop calls the generator back to back until cancelled.
//!
//! ## Shutdown
//!
//! Cancellation stops every admission loop before it starts another
//! invocation. In-flight calls are never aborted: the controller waits for
//! them up to a drain timeout and then gives up, reporting how many were
//! abandoned.

use crate::error::LoadError;
use crate::operation::OperationMix;
use crate::worker::LoadGenerator;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Hard ceiling on concurrently outstanding invocations in fixed-rate mode.
pub const MAX_IN_FLIGHT_CEILING: usize = 10_000;

/// Outstanding invocations allowed per unit of target rate.
const IN_FLIGHT_PER_RATE: usize = 2;

/// Lifecycle of a [`RateController`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Running => "running",
            ControllerState::Stopping => "stopping",
            ControllerState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Admission counters shared between a policy and its controller.
#[derive(Debug, Default)]
pub struct AdmissionCounters {
    admitted: AtomicU64,
    shed: AtomicU64,
}

/// Plain copy of [`AdmissionCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    pub admitted: u64,
    pub shed: u64,
}

impl AdmissionCounters {
    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            admitted: self.admitted.load(Ordering::Acquire),
            shed: self.shed.load(Ordering::Acquire),
        }
    }

    fn admit(&self) {
        self.admitted.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the shed count including this one.
    fn shed(&self) -> u64 {
        self.shed.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// The rule governing when new invocations may start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// One invocation per timer tick, shed when `max_in_flight` are outstanding
    FixedRate { rate: u32, max_in_flight: usize },
    /// `workers` persistent back-to-back loops
    FixedConcurrency { workers: usize },
}

impl AdmissionPolicy {
    /// Fixed-rate policy with `max_in_flight` derived from the rate.
    pub fn fixed_rate(rate: u32) -> Result<Self, LoadError> {
        if rate == 0 {
            return Err(LoadError::invalid_config("rate must be greater than 0"));
        }
        let max_in_flight = (rate as usize)
            .saturating_mul(IN_FLIGHT_PER_RATE)
            .min(MAX_IN_FLIGHT_CEILING);
        Ok(AdmissionPolicy::FixedRate {
            rate,
            max_in_flight,
        })
    }

    pub fn fixed_concurrency(workers: usize) -> Result<Self, LoadError> {
        if workers == 0 {
            return Err(LoadError::invalid_config("concurrency must be greater than 0"));
        }
        Ok(AdmissionPolicy::FixedConcurrency { workers })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdmissionPolicy::FixedRate { .. } => "fixed-rate",
            AdmissionPolicy::FixedConcurrency { .. } => "fixed-concurrency",
        }
    }

    /// Admit invocations until `cancel` fires.
    ///
    /// Every invocation is spawned on `tracker` so the caller can wait for
    /// in-flight work after this returns.
    pub async fn run(
        &self,
        generator: Arc<LoadGenerator>,
        cancel: CancellationToken,
        tracker: TaskTracker,
        counters: Arc<AdmissionCounters>,
    ) {
        match *self {
            AdmissionPolicy::FixedRate {
                rate,
                max_in_flight,
            } => run_fixed_rate(rate, max_in_flight, generator, cancel, tracker, counters).await,
            AdmissionPolicy::FixedConcurrency { workers } => {
                run_fixed_concurrency(workers, generator, cancel, tracker, counters).await
            }
        }
    }
}

impl std::fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionPolicy::FixedRate {
                rate,
                max_in_flight,
            } => write!(f, "{} req/s (max {} in flight)", rate, max_in_flight),
            AdmissionPolicy::FixedConcurrency { workers } => write!(f, "{} concurrent loops", workers),
        }
    }
}

async fn run_fixed_rate(
    rate: u32,
    max_in_flight: usize,
    generator: Arc<LoadGenerator>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Arc<AdmissionCounters>,
) {
    let period = Duration::from_secs_f64(1.0 / f64::from(rate.max(1))).max(Duration::from_nanos(1));
    let gate = Arc::new(Semaphore::new(max_in_flight.max(1)));
    // Missed ticks fire immediately afterwards; the gate bounds the burst
    let mut ticker = tokio::time::interval(period);

    debug!(rate, max_in_flight, ?period, "Fixed-rate admission started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match Arc::clone(&gate).try_acquire_owned() {
                    Ok(permit) => {
                        counters.admit();
                        let generator = Arc::clone(&generator);
                        tracker.spawn(async move {
                            generator.execute().await;
                            drop(permit);
                        });
                    }
                    Err(_) => {
                        let shed = counters.shed();
                        if shed == 1 || shed % 1000 == 0 {
                            debug!(shed, max_in_flight, "Admission gate full, shedding tick");
                        }
                    }
                }
            }
        }
    }

    debug!(stats = ?counters.stats(), "Fixed-rate admission stopped");
}

async fn run_fixed_concurrency(
    workers: usize,
    generator: Arc<LoadGenerator>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Arc<AdmissionCounters>,
) {
    debug!(workers, "Fixed-concurrency admission started");

    for worker_id in 0..workers {
        let generator = Arc::clone(&generator);
        let cancel = cancel.clone();
        let counters = Arc::clone(&counters);
        tracker.spawn(async move {
            while !cancel.is_cancelled() {
                counters.admit();
                generator.execute().await;
                // Let other loops and the aggregator run when calls complete
                // without ever suspending.
                tokio::task::yield_now().await;
            }
            debug!(worker_id, "Invocation loop exited");
        });
    }

    cancel.cancelled().await;
    debug!(stats = ?counters.stats(), "Fixed-concurrency admission stopped");
}

/// Outcome of [`RateController::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownSummary {
    /// Invocations started
    pub admitted: u64,
    /// Fixed-rate ticks dropped because the gate was full
    pub shed: u64,
    /// Invocations still outstanding when the drain timeout expired
    pub abandoned: u64,
    /// Whether every in-flight invocation finished within the drain timeout
    pub drained: bool,
}

struct Inner {
    state: ControllerState,
    cancel: Option<CancellationToken>,
    driver: Option<JoinHandle<()>>,
}

/// Drives one run under one [`AdmissionPolicy`].
pub struct RateController {
    policy: AdmissionPolicy,
    generator: Arc<LoadGenerator>,
    drain_timeout: Duration,
    tracker: TaskTracker,
    counters: Arc<AdmissionCounters>,
    inner: Mutex<Inner>,
}

impl RateController {
    pub fn new(policy: AdmissionPolicy, generator: Arc<LoadGenerator>, drain_timeout: Duration) -> Self {
        Self {
            policy,
            generator,
            drain_timeout,
            tracker: TaskTracker::new(),
            counters: Arc::new(AdmissionCounters::default()),
            inner: Mutex::new(Inner {
                state: ControllerState::Idle,
                cancel: None,
                driver: None,
            }),
        }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Current lifecycle state. A running controller whose cancellation
    /// signal has fired reports `Stopping`.
    pub fn state(&self) -> ControllerState {
        let inner = self.inner.lock();
        match (&inner.state, &inner.cancel) {
            (ControllerState::Running, Some(cancel)) if cancel.is_cancelled() => ControllerState::Stopping,
            (state, _) => *state,
        }
    }

    /// Operation mix the generator currently selects from.
    pub fn current_mix(&self) -> OperationMix {
        self.generator.mix()
    }

    /// Change the operation mix, including while running. Invocations
    /// admitted after the call select from `mix`.
    pub fn update_mix(&self, mix: OperationMix) -> Result<(), LoadError> {
        if self.state() == ControllerState::Stopped {
            return Err(LoadError::InvalidState {
                expected: ControllerState::Running,
                actual: ControllerState::Stopped,
            });
        }
        self.generator.set_mix(mix)
    }

    pub fn admission_stats(&self) -> AdmissionStats {
        self.counters.stats()
    }

    /// Invocations currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Enter `Running` and begin admitting invocations.
    ///
    /// The run stops when `ctx` is cancelled or [`RateController::cancel`]
    /// is called.
    pub fn start(&self, ctx: &CancellationToken) -> Result<(), LoadError> {
        let mut inner = self.inner.lock();
        if inner.state != ControllerState::Idle {
            return Err(LoadError::InvalidState {
                expected: ControllerState::Idle,
                actual: inner.state,
            });
        }

        let cancel = ctx.child_token();
        let policy = self.policy.clone();
        let generator = Arc::clone(&self.generator);
        let tracker = self.tracker.clone();
        let counters = Arc::clone(&self.counters);
        let policy_cancel = cancel.clone();
        let driver = tokio::spawn(async move {
            policy.run(generator, policy_cancel, tracker, counters).await;
        });

        inner.state = ControllerState::Running;
        inner.cancel = Some(cancel);
        inner.driver = Some(driver);

        info!("Rate controller running: {} ({})", self.policy, self.policy.name());
        Ok(())
    }

    /// Signal every admission loop to stop. Does not wait.
    pub fn cancel(&self) {
        if let Some(cancel) = &self.inner.lock().cancel {
            cancel.cancel();
        }
    }

    /// Cancel admission, wait for in-flight invocations up to the drain
    /// timeout and enter `Stopped`.
    pub async fn stop(&self) -> Result<ShutdownSummary, LoadError> {
        let (cancel, driver) = {
            let mut inner = self.inner.lock();
            if inner.state != ControllerState::Running {
                return Err(LoadError::InvalidState {
                    expected: ControllerState::Running,
                    actual: inner.state,
                });
            }
            inner.state = ControllerState::Stopping;
            (inner.cancel.clone(), inner.driver.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                error!("Admission task failed: {}", e);
            }
        }

        self.tracker.close();
        let outstanding = self.tracker.len();
        info!(
            outstanding,
            "Admission stopped, draining in-flight invocations (timeout {:?})", self.drain_timeout
        );

        let drained = tokio::time::timeout(self.drain_timeout, self.tracker.wait())
            .await
            .is_ok();
        let abandoned = if drained { 0 } else { self.tracker.len() as u64 };
        if !drained {
            warn!(abandoned, "Drain timeout expired with invocations still in flight");
        }

        self.inner.lock().state = ControllerState::Stopped;

        let stats = self.counters.stats();
        let summary = ShutdownSummary {
            admitted: stats.admitted,
            shed: stats.shed,
            abandoned,
            drained,
        };
        info!(
            admitted = summary.admitted,
            shed = summary.shed,
            abandoned = summary.abandoned,
            "Rate controller stopped"
        );
        Ok(summary)
    }

    /// Start, run until `duration` elapses or the run is cancelled, then stop.
    ///
    /// Cancelling `ctx` and calling [`RateController::cancel`] both end the
    /// run early.
    pub async fn run_for(&self, ctx: &CancellationToken, duration: Duration) -> Result<ShutdownSummary, LoadError> {
        self.start(ctx)?;
        // The run token is a child of `ctx`, so it fires on either signal
        let run_cancel = self.inner.lock().cancel.clone().unwrap_or_else(|| ctx.clone());
        tokio::select! {
            _ = tokio::time::sleep(duration) => debug!("Run duration elapsed"),
            _ = run_cancel.cancelled() => info!("Run cancelled before its deadline"),
        }
        self.stop().await
    }
}

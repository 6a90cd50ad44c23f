//! # Load Generator
//!
//! Executes one unit of work: pick an operation kind from the configured
//! mix, synthesize a payload, call the API and report the outcome to the
//! metrics aggregator.
//!
//! Exactly one Sent event is pushed immediately before the call and exactly
//! one Completed event immediately after it. Latency covers only the call
//! itself; payload generation happens before the clock starts. The generator
//! never retries.
//!
//! The operation mix can be replaced while a run is in progress; invocations
//! that already picked their operation are unaffected.

use crate::client::{ApiClient, ApiResponse};
use crate::error::{CallError, LoadError};
use crate::metrics::MetricsAggregator;
use crate::operation::{OperationKind, OperationMix};
use crate::payload::PayloadSource;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace};

/// Result of one [`LoadGenerator::execute`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub operation: OperationKind,
    pub latency: Duration,
    pub priority: u8,
    pub outcome: Result<ApiResponse, CallError>,
}

impl Invocation {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Executor shared by every admission loop.
pub struct LoadGenerator {
    client: Arc<dyn ApiClient>,
    payloads: Arc<dyn PayloadSource>,
    metrics: Arc<MetricsAggregator>,
    mix: RwLock<OperationMix>,
}

impl LoadGenerator {
    pub fn new(
        client: Arc<dyn ApiClient>,
        payloads: Arc<dyn PayloadSource>,
        metrics: Arc<MetricsAggregator>,
        mix: OperationMix,
    ) -> Self {
        Self {
            client,
            payloads,
            metrics,
            mix: RwLock::new(mix),
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// The mix currently used for selection.
    pub fn mix(&self) -> OperationMix {
        *self.mix.read()
    }

    /// Replace the operation mix. An invalid mix is rejected and the current
    /// one stays in effect.
    pub fn set_mix(&self, mix: OperationMix) -> Result<(), LoadError> {
        mix.validate().map_err(LoadError::InvalidConfig)?;
        *self.mix.write() = mix;
        info!(
            sensor_upload = mix.sensor_upload,
            read_write = mix.read_write,
            batch_read_write = mix.batch_read_write,
            query = mix.query,
            "Operation mix updated"
        );
        Ok(())
    }

    /// Draw an operation kind from the current mix.
    pub fn select_operation(&self) -> OperationKind {
        let draw: f64 = rand::thread_rng().gen();
        self.mix.read().select(draw)
    }

    /// Run one unit of work with a randomly selected operation kind.
    pub async fn execute(&self) -> Invocation {
        let operation = self.select_operation();
        self.execute_operation(operation).await
    }

    /// Run one unit of work for a given operation kind.
    pub async fn execute_operation(&self, operation: OperationKind) -> Invocation {
        let payload = self.payloads.generate(operation);

        self.metrics.push_sent(operation);
        let started = Instant::now();
        let response = self.client.call(operation, &payload).await;
        let latency = started.elapsed();

        let outcome = match response {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => Err(CallError::Application {
                status: response.status,
            }),
            Err(e) => Err(e),
        };
        self.metrics
            .push_completed(operation, latency, payload.priority, outcome.is_ok());

        if let Err(ref e) = outcome {
            trace!(operation = operation.as_str(), client = self.client.name(), "{}", e);
        }

        Invocation {
            operation,
            latency,
            priority: payload.priority,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticPayloads(u8);

    impl PayloadSource for StaticPayloads {
        fn generate(&self, _operation: OperationKind) -> Payload {
            Payload {
                body: json!({ "static": true }),
                priority: self.0,
            }
        }
    }

    enum Behaviour {
        Status(u16),
        Transport,
    }

    struct ScriptedClient {
        behaviour: Behaviour,
        latency: Duration,
    }

    #[async_trait]
    impl ApiClient for ScriptedClient {
        async fn call(&self, _operation: OperationKind, _payload: &Payload) -> Result<ApiResponse, CallError> {
            tokio::time::sleep(self.latency).await;
            match self.behaviour {
                Behaviour::Status(status) => Ok(ApiResponse::new(status)),
                Behaviour::Transport => Err(CallError::Transport("connection refused".into())),
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn generator(behaviour: Behaviour, metrics: Arc<MetricsAggregator>) -> LoadGenerator {
        LoadGenerator::new(
            Arc::new(ScriptedClient {
                behaviour,
                latency: Duration::from_millis(3),
            }),
            Arc::new(StaticPayloads(3)),
            metrics,
            OperationMix::only(OperationKind::SensorUpload),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_records_latency() {
        let metrics = Arc::new(MetricsAggregator::start(64, Duration::from_secs(1)));
        let gen = generator(Behaviour::Status(200), Arc::clone(&metrics));

        let invocation = gen.execute().await;
        assert_eq!(invocation.operation, OperationKind::SensorUpload);
        assert!(invocation.latency >= Duration::from_millis(3));
        assert!(invocation.latency < Duration::from_millis(4));
        assert!(invocation.is_success());

        metrics.shutdown().await;
        let counts = metrics.operation_counts(OperationKind::SensorUpload);
        assert_eq!((counts.sent, counts.completed, counts.errors), (1, 1, 0));
        assert_eq!(metrics.latency(OperationKind::SensorUpload).buckets[2], 1);
        assert_eq!(metrics.high_priority_latency(OperationKind::SensorUpload).count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_success_status_is_application_error() {
        let metrics = Arc::new(MetricsAggregator::start(64, Duration::from_secs(1)));
        let gen = generator(Behaviour::Status(503), Arc::clone(&metrics));

        let invocation = gen.execute().await;
        assert_eq!(invocation.outcome, Err(CallError::Application { status: 503 }));

        metrics.shutdown().await;
        let counts = metrics.operation_counts(OperationKind::SensorUpload);
        assert_eq!((counts.sent, counts.completed, counts.errors), (1, 0, 1));
        assert_eq!(metrics.latency(OperationKind::SensorUpload).count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_mix_switches_selection() {
        let metrics = Arc::new(MetricsAggregator::start(64, Duration::from_secs(1)));
        let gen = generator(Behaviour::Status(200), Arc::clone(&metrics));
        assert!((0..50).all(|_| gen.select_operation() == OperationKind::SensorUpload));

        gen.set_mix(OperationMix::only(OperationKind::Query)).unwrap();
        assert_eq!(gen.mix(), OperationMix::only(OperationKind::Query));
        assert!((0..50).all(|_| gen.select_operation() == OperationKind::Query));

        let zero = OperationMix {
            query: 0.0,
            ..OperationMix::only(OperationKind::Query)
        };
        assert!(matches!(gen.set_mix(zero), Err(LoadError::InvalidConfig(_))));
        assert_eq!(gen.mix(), OperationMix::only(OperationKind::Query));

        metrics.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_counts_as_error() {
        let metrics = Arc::new(MetricsAggregator::start(64, Duration::from_secs(1)));
        let gen = generator(Behaviour::Transport, Arc::clone(&metrics));

        let invocation = gen.execute_operation(OperationKind::Query).await;
        assert!(matches!(invocation.outcome, Err(CallError::Transport(_))));

        metrics.shutdown().await;
        let counts = metrics.operation_counts(OperationKind::Query);
        assert_eq!((counts.sent, counts.completed, counts.errors), (1, 0, 1));
    }
}

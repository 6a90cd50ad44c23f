//! # Request Payload Generation
//!
//! Synthesizes request bodies for each operation kind. The load generator
//! only needs the body and the request priority; everything else about the
//! payload is the business of the [`PayloadSource`] implementation.
//!
//! [`SensorPayloadGenerator`] models a fleet of factory sensors: device ids
//! spread over 3000 factories, a fixed set of metric names, readings that are
//! occasionally out of range, and a priority skewed towards "normal".

use crate::operation::OperationKind;
use chrono::{Duration as ChronoDuration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};

/// Number of simulated factories.
const FACTORY_COUNT: u32 = 3000;

/// Priority levels and their selection weights.
const PRIORITIES: [(u8, f64); 3] = [(1, 0.2), (2, 0.6), (3, 0.2)];

const METRIC_NAMES: [&str; 8] = [
    "temperature",
    "pressure",
    "humidity",
    "vibration",
    "voltage",
    "current",
    "power",
    "flow_rate",
];

/// A ready-to-send request body.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub body: Value,
    /// Request priority; `>= 3` marks the sample as high priority
    pub priority: u8,
}

/// Capability that produces request bodies for an operation kind.
pub trait PayloadSource: Send + Sync {
    fn generate(&self, operation: OperationKind) -> Payload;
}

/// Parameters of the synthetic sensor workload.
#[derive(Debug, Clone)]
pub struct SensorPayloadGenerator {
    key_range: u32,
    data_size_min: usize,
    data_size_max: usize,
    batch_size: usize,
}

impl SensorPayloadGenerator {
    /// Size bounds are clamped so that `1 <= min <= max`.
    pub fn new(key_range: u32, data_size_min: usize, data_size_max: usize, batch_size: usize) -> Self {
        let data_size_min = data_size_min.max(1);
        Self {
            key_range: key_range.max(1),
            data_size_min,
            data_size_max: data_size_max.max(data_size_min),
            batch_size: batch_size.max(1),
        }
    }

    fn device_id<R: Rng>(&self, rng: &mut R) -> String {
        let factory = rng.gen_range(1..=FACTORY_COUNT);
        let device = rng.gen_range(1..=self.key_range);
        format!("factory_{:03}_device_{:08}", factory, device)
    }

    fn metric_name<R: Rng>(rng: &mut R) -> &'static str {
        METRIC_NAMES[rng.gen_range(0..METRIC_NAMES.len())]
    }

    /// 99% of readings fall in `[0, 100)`; the rest in `[100, 200)` and
    /// trip the server-side threshold alarm.
    fn value<R: Rng>(rng: &mut R) -> f64 {
        if rng.gen_bool(0.99) {
            rng.gen_range(0.0..100.0)
        } else {
            rng.gen_range(100.0..200.0)
        }
    }

    fn priority<R: Rng>(rng: &mut R) -> u8 {
        let draw: f64 = rng.gen();
        let mut cumulative = 0.0;
        for (priority, weight) in PRIORITIES {
            cumulative += weight;
            if draw < cumulative {
                return priority;
            }
        }
        2
    }

    fn data<R: Rng>(&self, rng: &mut R) -> String {
        let size = rng.gen_range(self.data_size_min..=self.data_size_max);
        rng.sample_iter(&Alphanumeric)
            .take(size)
            .map(char::from)
            .collect()
    }

    fn read_write_item<R: Rng>(&self, rng: &mut R, priority: u8) -> Value {
        let write = rng.gen_bool(0.5);
        json!({
            "device_id": self.device_id(rng),
            "metric_name": Self::metric_name(rng),
            "operation": if write { "write" } else { "read" },
            "value": Self::value(rng),
            "priority": priority,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

impl PayloadSource for SensorPayloadGenerator {
    fn generate(&self, operation: OperationKind) -> Payload {
        let mut rng = rand::thread_rng();
        let priority = Self::priority(&mut rng);

        let body = match operation {
            OperationKind::SensorUpload => json!({
                "device_id": self.device_id(&mut rng),
                "metric_name": Self::metric_name(&mut rng),
                "value": Self::value(&mut rng),
                "timestamp": Utc::now().to_rfc3339(),
                "priority": priority,
                "data": self.data(&mut rng),
            }),
            OperationKind::ReadWrite => self.read_write_item(&mut rng, priority),
            OperationKind::BatchReadWrite => {
                let items: Vec<Value> = (0..self.batch_size)
                    .map(|_| self.read_write_item(&mut rng, priority))
                    .collect();
                json!({ "requests": items })
            }
            OperationKind::Query => {
                let end = Utc::now();
                let start = end - ChronoDuration::minutes(rng.gen_range(1..=60));
                json!({
                    "device_id": self.device_id(&mut rng),
                    "metric_name": Self::metric_name(&mut rng),
                    "start_time": start.to_rfc3339(),
                    "end_time": end.to_rfc3339(),
                    "limit": 100,
                })
            }
        };

        Payload { body, priority }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> SensorPayloadGenerator {
        SensorPayloadGenerator::new(1000, 64, 128, 10)
    }

    #[test]
    fn test_sensor_upload_shape() {
        let payload = generator().generate(OperationKind::SensorUpload);
        let body = payload.body.as_object().unwrap();

        let device_id = body["device_id"].as_str().unwrap();
        assert!(device_id.starts_with("factory_"));
        assert!(device_id.contains("_device_"));
        assert!(METRIC_NAMES.contains(&body["metric_name"].as_str().unwrap()));

        let data_len = body["data"].as_str().unwrap().len();
        assert!((64..=128).contains(&data_len));
        assert!((1..=3).contains(&payload.priority));
    }

    #[test]
    fn test_batch_has_configured_size() {
        let payload = generator().generate(OperationKind::BatchReadWrite);
        assert_eq!(payload.body["requests"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_query_has_time_window() {
        let payload = generator().generate(OperationKind::Query);
        assert!(payload.body["start_time"].is_string());
        assert!(payload.body["end_time"].is_string());
    }

    #[test]
    fn test_priority_distribution_is_skewed_to_normal() {
        let mut rng = rand::thread_rng();
        let mut counts = [0usize; 4];
        for _ in 0..10_000 {
            counts[SensorPayloadGenerator::priority(&mut rng) as usize] += 1;
        }
        assert_eq!(counts[0], 0);
        assert!(counts[2] > counts[1]);
        assert!(counts[2] > counts[3]);
    }

    #[test]
    fn test_new_clamps_degenerate_sizes() {
        let gen = SensorPayloadGenerator::new(0, 0, 0, 0);
        let payload = gen.generate(OperationKind::SensorUpload);
        assert_eq!(payload.body["data"].as_str().unwrap().len(), 1);
    }
}

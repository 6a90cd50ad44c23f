//! # Run Configuration
//!
//! [`LoadConfig`] is read from a JSON file, then overridden field by field
//! from the command line. Every field has a default, so a partial file (or
//! no file at all) is a valid configuration.
//!
//! ```json
//! {
//!   "server_url": "http://localhost:8080",
//!   "duration_seconds": 30,
//!   "mode": "rate",
//!   "rate": 100,
//!   "weights": { "sensor_upload": 0.7, "read_write": 0.2 }
//! }
//! ```
//!
//! Validation happens once, before any invocation is scheduled.

use crate::cli::Args;
use crate::controller::AdmissionPolicy;
use crate::defaults;
use crate::error::LoadError;
use crate::operation::OperationMix;
use crate::payload::SensorPayloadGenerator;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for the run duration and the report interval.
const MAX_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// How invocations are admitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Fixed arrival rate
    #[default]
    #[serde(alias = "qps")]
    #[value(alias = "qps")]
    Rate,

    /// Fixed number of back-to-back loops
    Concurrency,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Rate => write!(f, "rate"),
            LoadMode::Concurrency => write!(f, "concurrency"),
        }
    }
}

/// Complete configuration of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub server_url: String,
    pub duration_seconds: f64,
    pub mode: LoadMode,
    #[serde(alias = "qps")]
    pub rate: u32,
    pub concurrency: usize,
    pub weights: OperationMix,
    pub key_range: u32,
    pub data_size_min: usize,
    pub data_size_max: usize,
    pub batch_size: usize,
    pub report_interval_seconds: f64,
    pub request_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub queue_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_key: Option<String>,
    /// Final JSON report destination; command line only
    #[serde(skip)]
    pub output_file: Option<PathBuf>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            server_url: defaults::SERVER_URL.to_string(),
            duration_seconds: defaults::DURATION_SECONDS,
            mode: LoadMode::Rate,
            rate: defaults::RATE,
            concurrency: defaults::CONCURRENCY,
            weights: OperationMix::default(),
            key_range: defaults::KEY_RANGE,
            data_size_min: defaults::DATA_SIZE_MIN,
            data_size_max: defaults::DATA_SIZE_MAX,
            batch_size: defaults::BATCH_SIZE,
            report_interval_seconds: defaults::REPORT_INTERVAL_SECONDS,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE_MS,
            queue_capacity: defaults::QUEUE_CAPACITY,
            report_url: None,
            report_key: None,
            output_file: None,
        }
    }
}

impl LoadConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path`, falling back to defaults when it cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load configuration from {}: {}; using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), LoadError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Default configuration as pretty JSON.
    pub fn example_json() -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(&Self::default())?)
    }

    /// Overwrite fields with every value given on the command line.
    pub fn apply_overrides(&mut self, args: &Args) {
        if let Some(url) = &args.url {
            self.server_url = url.clone();
        }
        if let Some(mode) = args.mode {
            self.mode = mode;
        }
        if let Some(rate) = args.rate {
            self.rate = rate;
        }
        if let Some(concurrency) = args.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(duration) = args.duration {
            self.duration_seconds = duration.as_secs_f64();
        }
        if let Some(interval) = args.report_interval {
            self.report_interval_seconds = interval.as_secs_f64();
        }
        if let Some(report_url) = &args.report_url {
            self.report_url = Some(report_url.clone());
        }
        if let Some(report_key) = &args.report_key {
            self.report_key = Some(report_key.clone());
        }
        if let Some(output_file) = &args.output_file {
            self.output_file = Some(output_file.clone());
        }
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(LoadError::invalid_config(format!(
                "server_url must be an http(s) URL, got '{}'",
                self.server_url
            )));
        }
        if !(self.duration_seconds.is_finite() && self.duration_seconds > 0.0) {
            return Err(LoadError::invalid_config("duration must be greater than 0"));
        }
        if self.duration_seconds > MAX_SECONDS || self.report_interval_seconds > MAX_SECONDS {
            return Err(LoadError::invalid_config("duration and report interval must not exceed one year"));
        }
        match self.mode {
            LoadMode::Rate if self.rate == 0 => {
                return Err(LoadError::invalid_config("rate must be greater than 0"));
            }
            LoadMode::Concurrency if self.concurrency == 0 => {
                return Err(LoadError::invalid_config("concurrency must be greater than 0"));
            }
            _ => {}
        }
        self.weights.validate().map_err(LoadError::InvalidConfig)?;
        if self.data_size_min == 0 || self.data_size_min > self.data_size_max {
            return Err(LoadError::invalid_config(format!(
                "invalid data size range: min={}, max={}",
                self.data_size_min, self.data_size_max
            )));
        }
        if self.key_range == 0 {
            return Err(LoadError::invalid_config("key_range must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(LoadError::invalid_config("batch_size must be greater than 0"));
        }
        if !(self.report_interval_seconds.is_finite() && self.report_interval_seconds > 0.0) {
            return Err(LoadError::invalid_config("report interval must be greater than 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(LoadError::invalid_config("request_timeout_ms must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(LoadError::invalid_config("queue_capacity must be greater than 0"));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_seconds.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.report_interval_seconds.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Rate in rate mode, loop count in concurrency mode.
    pub fn target(&self) -> u64 {
        match self.mode {
            LoadMode::Rate => u64::from(self.rate),
            LoadMode::Concurrency => self.concurrency as u64,
        }
    }

    pub fn admission_policy(&self) -> Result<AdmissionPolicy, LoadError> {
        match self.mode {
            LoadMode::Rate => AdmissionPolicy::fixed_rate(self.rate),
            LoadMode::Concurrency => AdmissionPolicy::fixed_concurrency(self.concurrency),
        }
    }

    pub fn payload_generator(&self) -> SensorPayloadGenerator {
        SensorPayloadGenerator::new(
            self.key_range,
            self.data_size_min,
            self.data_size_max,
            self.batch_size,
        )
    }
}

impl fmt::Display for LoadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Load Configuration ===")?;
        writeln!(f, "Server URL: {}", self.server_url)?;
        writeln!(f, "Duration: {}s", self.duration_seconds)?;
        writeln!(f, "Mode: {}", self.mode)?;
        match self.mode {
            LoadMode::Rate => writeln!(f, "Target rate: {} req/s", self.rate)?,
            LoadMode::Concurrency => writeln!(f, "Concurrent loops: {}", self.concurrency)?,
        }
        writeln!(f, "Operation weights:")?;
        writeln!(f, "  sensor-upload:    {:.2}", self.weights.sensor_upload)?;
        writeln!(f, "  read-write:       {:.2}", self.weights.read_write)?;
        writeln!(f, "  batch-read-write: {:.2}", self.weights.batch_read_write)?;
        writeln!(f, "  query:            {:.2}", self.weights.query)?;
        writeln!(f, "  total:            {:.2}", self.weights.total())?;
        writeln!(f, "Device id range: {}", self.key_range)?;
        writeln!(f, "Data size: {} - {} bytes", self.data_size_min, self.data_size_max)?;
        writeln!(f, "Batch size: {}", self.batch_size)?;
        writeln!(f, "Report interval: {}s", self.report_interval_seconds)?;
        write!(f, "==========================")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = LoadConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, LoadMode::Rate);
        assert_eq!(config.rate, 100);
        assert_eq!(config.queue_capacity, 1_000_000);
    }

    #[test]
    fn test_partial_file_uses_defaults_and_qps_aliases() {
        let json = r#"{ "mode": "qps", "qps": 250, "weights": { "query": 1.0 } }"#;
        let config: LoadConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.mode, LoadMode::Rate);
        assert_eq!(config.rate, 250);
        assert_eq!(config.concurrency, defaults::CONCURRENCY);
        assert_eq!(config.weights.query, 1.0);
        assert_eq!(config.weights.sensor_upload, 0.7);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_file = NamedTempFile::new().unwrap();
        let config = LoadConfig {
            mode: LoadMode::Concurrency,
            concurrency: 32,
            report_key: Some("team-7".to_string()),
            ..LoadConfig::default()
        };

        config.save_to_file(temp_file.path()).unwrap();
        let loaded = LoadConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = LoadConfig::load_or_default(Path::new("/nonexistent/loadgen.json"));
        assert_eq!(config, LoadConfig::default());
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let mut config = LoadConfig::default();
        let args = Args {
            url: Some("http://10.0.0.1:9000".to_string()),
            mode: Some(LoadMode::Concurrency),
            concurrency: Some(8),
            duration: Some(Duration::from_millis(1500)),
            ..Args::default()
        };

        config.apply_overrides(&args);
        assert_eq!(config.server_url, "http://10.0.0.1:9000");
        assert_eq!(config.mode, LoadMode::Concurrency);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.duration(), Duration::from_millis(1500));
        assert_eq!(config.rate, defaults::RATE);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            LoadConfig {
                rate: 0,
                ..LoadConfig::default()
            },
            LoadConfig {
                mode: LoadMode::Concurrency,
                concurrency: 0,
                ..LoadConfig::default()
            },
            LoadConfig {
                weights: OperationMix {
                    sensor_upload: 0.0,
                    read_write: 0.0,
                    batch_read_write: 0.0,
                    query: 0.0,
                },
                ..LoadConfig::default()
            },
            LoadConfig {
                data_size_min: 128,
                data_size_max: 64,
                ..LoadConfig::default()
            },
            LoadConfig {
                key_range: 0,
                ..LoadConfig::default()
            },
            LoadConfig {
                queue_capacity: 0,
                ..LoadConfig::default()
            },
            LoadConfig {
                duration_seconds: 0.0,
                ..LoadConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(LoadError::InvalidConfig(_))),
                "{:?} should be rejected",
                config
            );
        }

        // The unused target of the other mode is not checked
        let config = LoadConfig {
            mode: LoadMode::Concurrency,
            rate: 0,
            ..LoadConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_admission_policy_follows_mode() {
        let rate = LoadConfig::default();
        assert_eq!(rate.admission_policy().unwrap().name(), "fixed-rate");
        assert_eq!(rate.target(), 100);

        let concurrency = LoadConfig {
            mode: LoadMode::Concurrency,
            ..LoadConfig::default()
        };
        assert_eq!(
            concurrency.admission_policy().unwrap(),
            AdmissionPolicy::FixedConcurrency { workers: 10 }
        );
    }

    #[test]
    fn test_example_json_parses() {
        let json = LoadConfig::example_json().unwrap();
        let parsed: LoadConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, LoadConfig::default());
    }
}

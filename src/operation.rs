//! # Operation Kinds and Weighted Selection
//!
//! Every unit of work issued by the load generator exercises exactly one API
//! surface, identified by an [`OperationKind`]. The mix of kinds is controlled
//! by an [`OperationMix`] of non-negative weights that do not need to sum to 1.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// A named category of request the load generator can issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Single sensor reading upload
    #[clap(name = "sensor-upload")]
    SensorUpload,

    /// Read-modify-write of one sensor record
    #[clap(name = "read-write")]
    ReadWrite,

    /// Batch of read-write items in one request
    #[clap(name = "batch-read-write")]
    BatchReadWrite,

    /// Time-window query over one device metric
    #[clap(name = "query")]
    Query,
}

impl OperationKind {
    /// All kinds, in the order used for per-operation storage and reports.
    pub const ALL: [OperationKind; 4] = [
        OperationKind::SensorUpload,
        OperationKind::ReadWrite,
        OperationKind::BatchReadWrite,
        OperationKind::Query,
    ];

    /// Number of distinct operation kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// Dense index into per-operation arrays.
    pub fn index(self) -> usize {
        match self {
            OperationKind::SensorUpload => 0,
            OperationKind::ReadWrite => 1,
            OperationKind::BatchReadWrite => 2,
            OperationKind::Query => 3,
        }
    }

    /// Stable tag used in logs and serialized reports.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::SensorUpload => "sensor-upload",
            OperationKind::ReadWrite => "read-write",
            OperationKind::BatchReadWrite => "batch-read-write",
            OperationKind::Query => "query",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::SensorUpload => write!(f, "Sensor Upload"),
            OperationKind::ReadWrite => write!(f, "Read-Write"),
            OperationKind::BatchReadWrite => write!(f, "Batch Read-Write"),
            OperationKind::Query => write!(f, "Query"),
        }
    }
}

/// Relative weights for each operation kind.
///
/// Weights are scaled by their total at selection time, so `{1, 1, 0, 0}` and
/// `{0.5, 0.5, 0, 0}` describe the same mix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationMix {
    pub sensor_upload: f64,
    pub read_write: f64,
    pub batch_read_write: f64,
    pub query: f64,
}

impl Default for OperationMix {
    fn default() -> Self {
        Self {
            sensor_upload: 0.7,
            read_write: 0.2,
            batch_read_write: 0.05,
            query: 0.05,
        }
    }
}

impl OperationMix {
    /// A mix that always selects `kind`.
    pub fn only(kind: OperationKind) -> Self {
        let mut mix = Self {
            sensor_upload: 0.0,
            read_write: 0.0,
            batch_read_write: 0.0,
            query: 0.0,
        };
        *mix.weight_mut(kind) = 1.0;
        mix
    }

    pub fn weight(&self, kind: OperationKind) -> f64 {
        match kind {
            OperationKind::SensorUpload => self.sensor_upload,
            OperationKind::ReadWrite => self.read_write,
            OperationKind::BatchReadWrite => self.batch_read_write,
            OperationKind::Query => self.query,
        }
    }

    fn weight_mut(&mut self, kind: OperationKind) -> &mut f64 {
        match kind {
            OperationKind::SensorUpload => &mut self.sensor_upload,
            OperationKind::ReadWrite => &mut self.read_write,
            OperationKind::BatchReadWrite => &mut self.batch_read_write,
            OperationKind::Query => &mut self.query,
        }
    }

    pub fn total(&self) -> f64 {
        OperationKind::ALL.iter().map(|&k| self.weight(k)).sum()
    }

    /// Check that every weight is finite and non-negative and that at least
    /// one of them is positive.
    pub fn validate(&self) -> Result<(), String> {
        for kind in OperationKind::ALL {
            let w = self.weight(kind);
            if !w.is_finite() || w < 0.0 {
                return Err(format!("weight for {} must be >= 0 (got {})", kind.as_str(), w));
            }
        }
        if self.total() <= 0.0 {
            return Err("at least one operation weight must be positive".to_string());
        }
        Ok(())
    }

    /// Map a uniform draw in `[0, 1)` onto an operation kind.
    ///
    /// The draw is scaled by the total weight and walked through the running
    /// cumulative sum; the first interval containing it wins. Draws landing
    /// past the last positive interval (rounding) fall back to the last kind
    /// with a positive weight.
    pub fn select(&self, draw: f64) -> OperationKind {
        let mut remaining = draw * self.total();
        let mut fallback = OperationKind::Query;

        for kind in OperationKind::ALL {
            let w = self.weight(kind);
            if w <= 0.0 {
                continue;
            }
            fallback = kind;
            if remaining < w {
                return kind;
            }
            remaining -= w;
        }

        fallback
    }
}

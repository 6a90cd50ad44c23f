//! # Formatting and Arithmetic Helpers
//!
//! Shared by the reporter, the final report and the binary. The arithmetic
//! helpers return zero instead of dividing by zero, so report code never has
//! to special-case an empty run or a zero-length interval.
//!
//! ```rust
//! use api_loadgen::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_request_rate(1500.0), "1.50K req/s");
//! assert_eq!(rate_per_second(10, 0.0), 0.0);
//! ```

use std::time::Duration;
use uuid::Uuid;

/// Sub-minute units, largest first: (nanoseconds per unit, suffix).
const SHORT_UNITS: [(f64, &str); 3] = [(1e9, "s"), (1e6, "ms"), (1e3, "μs")];

/// Rate prefixes, largest first: (requests per unit, prefix).
const RATE_UNITS: [(f64, &str); 2] = [(1e6, "M"), (1e3, "K")];

/// UUID v4 correlating the logs, the JSON report and the uploaded copy of one run.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Render `duration` in the largest unit that keeps it at or above 1.
///
/// Sub-minute values get two decimals (`"25.75ms"`); from one minute up the
/// value is split into whole `h`/`m`/`s` parts (`"2h 15m 30s"`).
///
/// ```rust
/// # use api_loadgen::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
        return if h > 0 {
            format!("{}h {}m {}s", h, m, s)
        } else {
            format!("{}m {}s", m, s)
        };
    }

    let nanos = duration.as_nanos() as f64;
    SHORT_UNITS
        .iter()
        .find(|(scale, _)| nanos >= *scale)
        .map(|(scale, suffix)| format!("{:.2}{}", nanos / scale, suffix))
        .unwrap_or_else(|| format!("{}ns", duration.as_nanos()))
}

/// Render a request rate with a decimal `K`/`M` prefix.
pub fn format_request_rate(requests_per_second: f64) -> String {
    RATE_UNITS
        .iter()
        .find(|(scale, _)| requests_per_second >= *scale)
        .map(|(scale, prefix)| format!("{:.2}{} req/s", requests_per_second / scale, prefix))
        .unwrap_or_else(|| format!("{:.0} req/s", requests_per_second))
}

/// `count / seconds`, or zero when the window is empty or negative.
pub fn rate_per_second(count: u64, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        0.0
    } else {
        count as f64 / seconds
    }
}

/// `part * 100 / whole`, or zero when `whole` is zero.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Bar of `width` cells with `part / whole` of them filled, rounded down.
///
/// Draws the bucket rows of a latency distribution.
pub fn share_bar(part: u64, whole: u64, width: usize) -> String {
    let filled = match whole {
        0 => 0,
        _ => ((part.min(whole) as f64 / whole as f64) * width as f64) as usize,
    };
    let mut bar = "#".repeat(filled.min(width));
    bar.push_str(&".".repeat(width - filled.min(width)));
    bar
}

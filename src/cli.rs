use crate::config::LoadMode;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// API Load Generator - drives an HTTP API at a controlled rate and reports latency
///
/// Values given here override the configuration file.
#[derive(Parser, Debug, Clone, Default)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file
    #[clap(short = 'c', long, help_heading = "Core Options")]
    pub config: Option<PathBuf>,

    /// Base URL of the API under test
    #[clap(long, help_heading = "Core Options")]
    pub url: Option<String>,

    /// Admission mode: fixed arrival rate or fixed concurrency
    #[clap(short = 'm', long, value_enum, help_heading = "Core Options")]
    pub mode: Option<LoadMode>,

    /// Target requests per second (rate mode)
    #[clap(short = 'r', long, alias = "qps", help_heading = "Core Options")]
    pub rate: Option<u32>,

    /// Number of back-to-back request loops (concurrency mode)
    #[clap(short = 'n', long, help_heading = "Core Options")]
    pub concurrency: Option<usize>,

    /// How long to run (e.g. 30s, 500ms, 5m, 1h)
    #[clap(short = 'd', long, value_parser = parse_duration, help_heading = "Core Options")]
    pub duration: Option<Duration>,

    /// Interval between progress snapshots
    #[clap(long, value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// Output file for the final report (JSON format)
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Collector URL the final report is posted to
    #[clap(long)]
    pub report_url: Option<String>,

    /// Identifying token sent with the uploaded report
    #[clap(long)]
    pub report_key: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count, help_heading = "Logging")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[clap(short = 'q', long, default_value_t = false, help_heading = "Logging")]
    pub quiet: bool,

    /// Also write logs to this file
    #[clap(long, help_heading = "Logging")]
    pub log_file: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[clap(long, default_value_t = false)]
    pub print_config: bool,
}

/// Milliseconds per unit for each accepted suffix. `ms` precedes `m` and `s`
/// so the longest suffix matches first.
const DURATION_UNITS: [(&str, f64); 4] = [("ms", 1.0), ("h", 3_600_000.0), ("m", 60_000.0), ("s", 1000.0)];

/// Parse a duration such as `30s`, `1.5s`, `500ms`, `5m` or `1h`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, scale) = DURATION_UNITS
        .iter()
        .find_map(|(suffix, scale)| s.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((s, 1000.0));

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a duration (expected e.g. 30s, 500ms, 5m, 1h)", s))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("duration must be a non-negative number: {}", s));
    }

    Duration::try_from_secs_f64(value * scale / 1000.0).map_err(|_| format!("duration out of range: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-3s").is_err());
    }

    #[test]
    fn test_args_parse_overrides() {
        let args = Args::try_parse_from([
            "api-loadgen",
            "--url",
            "http://127.0.0.1:8080",
            "-m",
            "qps",
            "--qps",
            "250",
            "-d",
            "2m",
            "-vv",
        ])
        .unwrap();

        assert_eq!(args.url.as_deref(), Some("http://127.0.0.1:8080"));
        assert_eq!(args.mode, Some(LoadMode::Rate));
        assert_eq!(args.rate, Some(250));
        assert_eq!(args.duration, Some(Duration::from_secs(120)));
        assert_eq!(args.verbose, 2);
        assert!(args.concurrency.is_none());
        assert!(!args.quiet);
    }

    #[test]
    fn test_args_defaults_leave_config_untouched() {
        let args = Args::try_parse_from(["api-loadgen"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.mode.is_none());
        assert!(args.rate.is_none());
        assert_eq!(args.verbose, 0);
    }
}

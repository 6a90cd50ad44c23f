//! Log output: a colorized console formatter and subscriber initialisation.
//!
//! Console lines are coloured by level and carry no metadata beyond an
//! optional wall-clock time and a tag for warnings and errors. The optional
//! log file gets plain, uncoloured lines through a non-blocking writer so a
//! slow disk never stalls the load loops.

use anyhow::{Context, Result};
use colored::*;
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// A tracing event formatter that colours the whole line by level.
pub struct ColorizedFormatter {
    timestamps: bool,
}

impl ColorizedFormatter {
    pub fn new(timestamps: bool) -> Self {
        Self { timestamps }
    }
}

/// Prefix marking lines that need attention.
pub fn level_tag(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR ",
        Level::WARN => "WARN  ",
        _ => "",
    }
}

/// Default filter for a `-v` count, used when `RUST_LOG` is unset.
pub fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "warn";
    }
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the fields so the colour covers the entire line
        let mut buffer = String::new();
        if self.timestamps {
            buffer.push_str(&chrono::Local::now().format("%H:%M:%S%.3f ").to_string());
        }
        let level = event.metadata().level();
        buffer.push_str(level_tag(level));
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *level {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Install the global subscriber.
///
/// Console output goes to stderr so the final report on stdout stays clean.
/// When `log_file` is set the returned guard must be held until exit, or
/// buffered lines are lost.
pub fn init(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let directive = default_directive(verbosity, quiet);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .event_format(ColorizedFormatter::new(verbosity > 0));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_level(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_follows_flags() {
        assert_eq!(default_directive(0, false), "info");
        assert_eq!(default_directive(1, false), "debug");
        assert_eq!(default_directive(5, false), "trace");
        assert_eq!(default_directive(3, true), "warn");
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(level_tag(&Level::ERROR), "ERROR ");
        assert_eq!(level_tag(&Level::WARN), "WARN  ");
        assert_eq!(level_tag(&Level::INFO), "");
    }
}

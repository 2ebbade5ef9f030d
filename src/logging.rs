//! Structured logging for spillway
//!
//! All logs use structured fields so spill and table activity can be
//! filtered and aggregated.
//!
//! # Log Format Conventions
//!
//! - `operation`: The operation being performed (e.g., "spill", "save")
//! - `status`: The result status ("success", "error")
//! - `path`: Spill directory or table directory involved
//! - `type_id`: Id of the payload type
//! - `rows`: Number of table rows touched
//!
//! # Examples
//!
//! ```rust
//! use spillway::logging::{operations, status};
//! use tracing::debug;
//!
//! debug!(
//!     operation = operations::SPILL,
//!     status = status::SUCCESS,
//!     type_id = "blob",
//!     "spilled item"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter that shows "spillway" instead of the full module path
struct SpillwayFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for SpillwayFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(spillway)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(spillway): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Same layout without colors (CI)
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Parse a format name; unknown names yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// Read `SPILLWAY_LOG_FORMAT`, falling back to `fallback` and then to
    /// compact under CI or pretty otherwise
    pub fn from_env(fallback: Option<&str>) -> Self {
        let from_env = std::env::var("SPILLWAY_LOG_FORMAT").ok();
        from_env
            .as_deref()
            .and_then(Self::parse)
            .or_else(|| fallback.and_then(Self::parse))
            .unwrap_or_else(|| {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            })
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Log filter (e.g., "debug", "spillway=trace"); overrides `default_level`
/// - `SPILLWAY_LOG_FORMAT`: Format ("pretty", "compact", "json"); overrides `format`
/// - `CI`: If set, defaults to compact format
///
/// Calling this twice is harmless; the second call keeps the first subscriber.
pub fn init(default_level: &str, format: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match LogFormat::from_env(format) {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(SpillwayFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(SpillwayFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!("logging already initialized: {}", e);
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const OPEN: &str = "open";
    pub const ALLOCATE: &str = "allocate";
    pub const SPILL: &str = "spill";
    pub const LOAD: &str = "load";
    pub const MATERIALIZE: &str = "materialize";
    pub const CLOSE: &str = "close";
    pub const CLEAN: &str = "clean";
    pub const MERGE: &str = "merge";
    pub const CONVERT: &str = "convert";
    pub const DESTROY: &str = "destroy";
    pub const SAVE: &str = "save";
    pub const IMPORT: &str = "import";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_log_format_from_env() {
        std::env::set_var("SPILLWAY_LOG_FORMAT", "json");
        assert_eq!(LogFormat::from_env(Some("pretty")), LogFormat::Json);

        std::env::set_var("SPILLWAY_LOG_FORMAT", "bogus");
        assert_eq!(LogFormat::from_env(Some("compact")), LogFormat::Compact);

        std::env::remove_var("SPILLWAY_LOG_FORMAT");
        assert_eq!(LogFormat::from_env(Some("PRETTY")), LogFormat::Pretty);
    }

    #[test]
    #[serial]
    fn test_log_format_ci_default() {
        std::env::remove_var("SPILLWAY_LOG_FORMAT");
        std::env::set_var("CI", "true");
        assert_eq!(LogFormat::from_env(None), LogFormat::Compact);
        std::env::remove_var("CI");
        assert_eq!(LogFormat::from_env(None), LogFormat::Pretty);
    }
}

//! Logging setup.
//!
//! Library code only emits through `tracing` macros. Binaries and tests that
//! want output call [`init_tracing`] once.

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "circuitflow=info";

/// Installs a global fmt subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(format: LogFormat) -> bool {
    try_install(format, std::io::stderr)
}

fn try_install<W>(format: LogFormat, writer: W) -> bool
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_thread_names(true);

    match format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing_subscriber::fmt::TestWriter;

    #[test]
    fn test_second_init_reports_false() {
        // Test writer keeps output inside libtest's capture.
        let _ = try_install(LogFormat::Text, TestWriter::new());
        assert!(!try_install(LogFormat::Json, TestWriter::new()));
        assert!(!init_tracing(LogFormat::Text));
    }

    #[test]
    fn test_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}

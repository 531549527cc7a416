//! Pipeline configuration.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a [`Pipeline`](crate::pipeline::Pipeline) and its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Delay before a dispatched request is sent, in milliseconds.
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,
    /// Name of the engine worker thread.
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
    /// Extension tried for imports written without one. Empty disables it.
    #[serde(default = "default_extension")]
    pub default_extension: String,
    /// Location of the root module.
    #[serde(default = "default_root_location")]
    pub root_location: String,
}

fn default_dispatch_delay_ms() -> u64 {
    200
}

fn default_worker_name() -> String {
    "circuitflow-engine".to_string()
}

fn default_extension() -> String {
    "zok".to_string()
}

fn default_root_location() -> String {
    "main.zok".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dispatch_delay_ms: default_dispatch_delay_ms(),
            worker_name: default_worker_name(),
            default_extension: default_extension(),
            root_location: default_root_location(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Sets the dispatch delay.
    #[must_use]
    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets the default import extension.
    #[must_use]
    pub fn with_default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = extension.into();
        self
    }

    /// Sets the root module location.
    #[must_use]
    pub fn with_root_location(mut self, location: impl Into<String>) -> Self {
        self.root_location = location.into();
        self
    }

    /// Gets the dispatch delay as a Duration.
    #[must_use]
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    /// Returns the default extension, if enabled.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let ext = self.default_extension.trim_start_matches('.');
        (!ext.is_empty()).then_some(ext)
    }

    /// Checks the configuration for unusable values.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.worker_name.trim().is_empty() {
            return Err(PipelineError::Config("worker_name must not be empty".into()));
        }
        if self.worker_name.contains('\0') {
            return Err(PipelineError::Config(
                "worker_name must not contain NUL bytes".into(),
            ));
        }
        if self.root_location.trim().is_empty() {
            return Err(PipelineError::Config("root_location must not be empty".into()));
        }
        if self.default_extension.contains('/') {
            return Err(PipelineError::Config(format!(
                "default_extension '{}' must not contain a path separator",
                self.default_extension
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.dispatch_delay(), Duration::from_millis(200));
        assert_eq!(config.worker_name, "circuitflow-engine");
        assert_eq!(config.extension(), Some("zok"));
        assert_eq!(config.root_location, "main.zok");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(r#"{"dispatch_delay_ms": 0}"#).unwrap();
        assert_eq!(config.dispatch_delay_ms, 0);
        assert_eq!(config.worker_name, "circuitflow-engine");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PipelineConfig::from_json_str(r#"{"worker_name": " "}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = PipelineConfig::new()
            .with_default_extension("a/b")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("path separator"));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = PipelineConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }

    #[test]
    fn test_empty_extension_disables_fallback() {
        let config = PipelineConfig::new().with_default_extension("");
        assert_eq!(config.extension(), None);
        assert_eq!(
            PipelineConfig::new().with_default_extension(".zok").extension(),
            Some("zok")
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"root_location": "src/main.zok"}}"#).unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.root_location, "src/main.zok");
        assert_eq!(config.dispatch_delay_ms, 200);
    }
}

//! Error types for circuitflow.
//!
//! Pipeline calls fail on dispatch gating (`DependencyNotReady`) or engine
//! availability (`EngineUnavailable`). Import resolution has its own error,
//! reported to the engine and surfaced as a stage error message.

use crate::core::StageId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for circuitflow operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage was dispatched before its upstream stages succeeded.
    #[error("{0}")]
    DependencyNotReady(#[from] DependencyNotReadyError),

    /// The dependency graph is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The isolated execution context is gone or never came up.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when a stage is dispatched while an upstream stage is not in success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' is not ready: waiting on {}", format_stages(.missing))]
pub struct DependencyNotReadyError {
    /// The stage that was dispatched.
    pub stage: StageId,
    /// Upstream stages that are not in success.
    pub missing: Vec<StageId>,
}

impl DependencyNotReadyError {
    /// Creates a new dependency error.
    #[must_use]
    pub fn new(stage: StageId, missing: Vec<StageId>) -> Self {
        Self { stage, missing }
    }
}

fn format_stages(stages: &[StageId]) -> String {
    stages
        .iter()
        .copied()
        .map(StageId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Import resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolveError {
    /// Neither the standard library nor the project files contain the import.
    #[error("Could not resolve import '{import_path}' from '{location}'")]
    Unresolved {
        /// The path as written in the import statement.
        import_path: String,
        /// The location of the importing module.
        location: String,
    },

    /// The import would re-enter a module that is still being resolved.
    #[error("Cyclic import: {}", .chain.join(" -> "))]
    Cyclic {
        /// The in-flight resolution chain, ending with the re-entered location.
        chain: Vec<String>,
    },
}

impl ResolveError {
    /// Creates an unresolved import error.
    #[must_use]
    pub fn unresolved(import_path: impl Into<String>, location: impl Into<String>) -> Self {
        Self::Unresolved {
            import_path: import_path.into(),
            location: location.into(),
        }
    }

    /// Creates a cyclic import error.
    #[must_use]
    pub fn cyclic(chain: Vec<String>) -> Self {
        Self::Cyclic { chain }
    }
}

/// Error raised when the stage dependency graph fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<StageId>,
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in stage graph: {}", format_path(.cycle_path))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<StageId>,
}

fn format_path(path: &[StageId]) -> String {
    path.iter()
        .copied()
        .map(StageId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<StageId>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        PipelineValidationError {
            message: err.to_string(),
            stages: err.cycle_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_not_ready_message() {
        let err = DependencyNotReadyError::new(
            StageId::GenerateProof,
            vec![StageId::Setup, StageId::ComputeWitness],
        );
        assert_eq!(
            err.to_string(),
            "Stage 'generate_proof' is not ready: waiting on setup, compute_witness"
        );
    }

    #[test]
    fn test_resolve_error_messages() {
        let err = ResolveError::unresolved("./missing.zok", "main.zok");
        assert_eq!(
            err.to_string(),
            "Could not resolve import './missing.zok' from 'main.zok'"
        );

        let err = ResolveError::cyclic(vec!["a.zok".into(), "b.zok".into(), "a.zok".into()]);
        assert!(err.to_string().contains("a.zok -> b.zok -> a.zok"));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![StageId::Setup, StageId::Verify, StageId::Setup]);
        assert!(err.to_string().contains("setup -> verify -> setup"));

        let validation: PipelineValidationError = err.into();
        assert_eq!(validation.stages.len(), 3);
    }

    #[test]
    fn test_pipeline_error_from_conversions() {
        let err: PipelineError = DependencyNotReadyError::new(StageId::Setup, vec![StageId::Compile]).into();
        assert!(matches!(err, PipelineError::DependencyNotReady(_)));

        let err: PipelineError = PipelineValidationError::from(CycleDetectedError::new(vec![
            StageId::Compile,
            StageId::Compile,
        ]))
        .into();
        assert_eq!(
            err.to_string(),
            "Cycle detected in stage graph: compile -> compile"
        );
    }
}

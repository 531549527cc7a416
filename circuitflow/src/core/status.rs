//! Stage identifiers and status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A step of the pipeline.
///
/// The stage identifier doubles as the operation kind carried on the wire,
/// so a response is routed to a stage by its kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Compiles the program source into an artifact.
    Compile,
    /// Generates the proving/verification key pair for a compiled program.
    Setup,
    /// Exports a verifier contract embedding the verification key.
    ExportVerifier,
    /// Computes a witness from a compiled program and its arguments.
    ComputeWitness,
    /// Generates a proof from program, witness and proving key.
    GenerateProof,
    /// Verifies a proof against the verification key.
    Verify,
}

impl StageId {
    /// Every stage, listed so that each appears after its dependencies.
    pub const ALL: [Self; 6] = [
        Self::Compile,
        Self::Setup,
        Self::ExportVerifier,
        Self::ComputeWitness,
        Self::GenerateProof,
        Self::Verify,
    ];

    /// Returns the stages whose success this stage requires.
    ///
    /// The relation is fixed; it is not configurable at runtime.
    #[must_use]
    pub const fn dependencies(self) -> &'static [Self] {
        match self {
            Self::Compile => &[],
            Self::Setup | Self::ComputeWitness => &[Self::Compile],
            Self::ExportVerifier => &[Self::Setup],
            Self::GenerateProof => &[Self::Compile, Self::Setup, Self::ComputeWitness],
            Self::Verify => &[Self::Setup, Self::GenerateProof],
        }
    }

    /// Returns the position of the stage in [`StageId::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns the wire name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Setup => "setup",
            Self::ExportVerifier => "export_verifier",
            Self::ComputeWitness => "compute_witness",
            Self::GenerateProof => "generate_proof",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The coarse status of a stage, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Nothing dispatched, or the result was discarded.
    Idle,
    /// A request is outstanding.
    Loading,
    /// The latest request produced a result.
    Success,
    /// The latest request failed.
    Error,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

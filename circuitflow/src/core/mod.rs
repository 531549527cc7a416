//! Core domain model types for circuitflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage identifiers, the fixed dependency relation and status enums
//! - Stage artifacts and their content identities
//! - The per-stage state machine values

mod artifact;
mod state;
mod status;

pub(crate) use artifact::base64_bytes;
pub use artifact::{
    AbiVersion, CompiledProgram, Keypair, Proof, ResultId, StageArtifact, Verification,
    VerifierContract, Witness,
};
pub use state::{Published, StageState, Transition};
pub use status::{StageId, StageStatus};

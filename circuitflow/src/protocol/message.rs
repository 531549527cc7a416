//! Request and response envelopes exchanged with the worker.
//!
//! Envelopes use adjacently tagged serialization:
//! ```json
//! {
//!   "id": 7,
//!   "type": "export_verifier",
//!   "payload": { "verification_key": "...", "abi_version": "v2" }
//! }
//! ```

use crate::core::{
    base64_bytes, AbiVersion, CompiledProgram, Keypair, Proof, StageArtifact, StageId,
    Verification, VerifierContract, Witness,
};
use crate::errors::ResolveError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Channel-wide identifier of a request, echoed by its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a request id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Compile request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileInput {
    /// Program source text.
    pub source: String,
    /// Location of the root module, used for relative imports.
    pub location: String,
    /// Prefetched project files keyed by location.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// Setup request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupInput {
    /// The compiled program.
    pub program: CompiledProgram,
}

/// Verifier export request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportVerifierInput {
    /// Verification key to embed.
    #[serde(with = "base64_bytes")]
    pub verification_key: Vec<u8>,
    /// Requested ABI version.
    pub abi_version: AbiVersion,
}

/// Witness computation request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeWitnessInput {
    /// The compiled program.
    pub program: CompiledProgram,
    /// Program arguments in declaration order.
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Proof generation request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateProofInput {
    /// The compiled program.
    pub program: CompiledProgram,
    /// The computed witness.
    pub witness: Witness,
    /// The proving key.
    #[serde(with = "base64_bytes")]
    pub proving_key: Vec<u8>,
}

/// Verification request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyInput {
    /// The verification key.
    #[serde(with = "base64_bytes")]
    pub verification_key: Vec<u8>,
    /// The proof to check.
    pub proof: Proof,
}

/// An operation for the engine, one variant per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    /// Compile a program.
    Compile(CompileInput),
    /// Generate keys.
    Setup(SetupInput),
    /// Export a verifier contract.
    ExportVerifier(ExportVerifierInput),
    /// Compute a witness.
    ComputeWitness(ComputeWitnessInput),
    /// Generate a proof.
    GenerateProof(GenerateProofInput),
    /// Verify a proof.
    Verify(VerifyInput),
}

impl Operation {
    /// Returns the stage this operation belongs to.
    #[must_use]
    pub fn kind(&self) -> StageId {
        match self {
            Self::Compile(_) => StageId::Compile,
            Self::Setup(_) => StageId::Setup,
            Self::ExportVerifier(_) => StageId::ExportVerifier,
            Self::ComputeWitness(_) => StageId::ComputeWitness,
            Self::GenerateProof(_) => StageId::GenerateProof,
            Self::Verify(_) => StageId::Verify,
        }
    }
}

/// A request sent to the worker. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id.
    pub id: RequestId,
    /// The operation to run.
    #[serde(flatten)]
    pub operation: Operation,
}

impl Request {
    /// Creates a new request.
    #[must_use]
    pub fn new(id: RequestId, operation: Operation) -> Self {
        Self { id, operation }
    }

    /// Returns the stage this request belongs to.
    #[must_use]
    pub fn kind(&self) -> StageId {
        self.operation.kind()
    }
}

/// Machine-readable classification of an engine-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// An import could not be resolved.
    UnresolvedImport,
    /// An import cycle was detected.
    CyclicImport,
    /// The worker is gone or failed to start.
    EngineUnavailable,
    /// The engine was used before initialization.
    NotInitialized,
    /// Any other engine-reported failure.
    Engine,
}

impl From<&ResolveError> for ErrorCode {
    fn from(err: &ResolveError) -> Self {
        match err {
            ResolveError::Unresolved { .. } => Self::UnresolvedImport,
            ResolveError::Cyclic { .. } => Self::CyclicImport,
        }
    }
}

/// Error payload of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// The stage whose request failed.
    pub stage: StageId,
    /// Failure classification.
    pub code: ErrorCode,
    /// Human-readable message, shown verbatim.
    pub message: String,
}

impl Failure {
    /// Creates a new failure payload.
    #[must_use]
    pub fn new(stage: StageId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stage,
            code,
            message: message.into(),
        }
    }
}

/// The result carried by a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Outcome {
    /// Compilation succeeded.
    Compile(CompiledProgram),
    /// Setup succeeded.
    Setup(Keypair),
    /// Verifier export succeeded.
    ExportVerifier(VerifierContract),
    /// Witness computation succeeded.
    ComputeWitness(Witness),
    /// Proof generation succeeded.
    GenerateProof(Proof),
    /// Verification finished.
    Verify(Verification),
    /// The operation failed.
    Error(Failure),
}

impl From<StageArtifact> for Outcome {
    fn from(artifact: StageArtifact) -> Self {
        match artifact {
            StageArtifact::Program(p) => Self::Compile(p),
            StageArtifact::Keypair(k) => Self::Setup(k),
            StageArtifact::Verifier(v) => Self::ExportVerifier(v),
            StageArtifact::Witness(w) => Self::ComputeWitness(w),
            StageArtifact::Proof(p) => Self::GenerateProof(p),
            StageArtifact::Verification(v) => Self::Verify(v),
        }
    }
}

/// A response delivered by the worker channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers.
    pub id: RequestId,
    /// The outcome.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: RequestId, artifact: StageArtifact) -> Self {
        Self {
            id,
            outcome: artifact.into(),
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn failure(id: RequestId, failure: Failure) -> Self {
        Self {
            id,
            outcome: Outcome::Error(failure),
        }
    }

    /// Returns the stage this response is routed to.
    ///
    /// Errors are routed to the stage that issued the failed request.
    #[must_use]
    pub fn kind(&self) -> StageId {
        match &self.outcome {
            Outcome::Compile(_) => StageId::Compile,
            Outcome::Setup(_) => StageId::Setup,
            Outcome::ExportVerifier(_) => StageId::ExportVerifier,
            Outcome::ComputeWitness(_) => StageId::ComputeWitness,
            Outcome::GenerateProof(_) => StageId::GenerateProof,
            Outcome::Verify(_) => StageId::Verify,
            Outcome::Error(failure) => failure.stage,
        }
    }

    /// Returns true if this is an error response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    /// Splits the response into an artifact or a failure.
    pub fn into_result(self) -> Result<StageArtifact, Failure> {
        match self.outcome {
            Outcome::Compile(p) => Ok(StageArtifact::Program(p)),
            Outcome::Setup(k) => Ok(StageArtifact::Keypair(k)),
            Outcome::ExportVerifier(v) => Ok(StageArtifact::Verifier(v)),
            Outcome::ComputeWitness(w) => Ok(StageArtifact::Witness(w)),
            Outcome::GenerateProof(p) => Ok(StageArtifact::Proof(p)),
            Outcome::Verify(v) => Ok(StageArtifact::Verification(v)),
            Outcome::Error(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_envelope_shape() {
        let request = Request::new(
            RequestId::new(3),
            Operation::ExportVerifier(ExportVerifierInput {
                verification_key: b"vk".to_vec(),
                abi_version: AbiVersion::V2,
            }),
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 3,
                "type": "export_verifier",
                "payload": { "verification_key": "dms=", "abi_version": "v2" }
            })
        );
    }

    #[test]
    fn test_error_response_shape_and_routing() {
        let response = Response::failure(
            RequestId::new(9),
            Failure::new(StageId::Setup, ErrorCode::EngineUnavailable, "worker exited"),
        );
        assert_eq!(response.kind(), StageId::Setup);
        assert!(response.is_error());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["stage"], "setup");
        assert_eq!(json["payload"]["code"], "engine_unavailable");
    }

    #[test]
    fn test_response_from_json() {
        let json = r#"{"id":1,"type":"verify","payload":{"valid":true}}"#;
        let response: Response = serde_json::from_str(json).unwrap();
        assert_eq!(response.id, RequestId::new(1));
        assert_eq!(response.kind(), StageId::Verify);
        assert_eq!(
            response.into_result().unwrap(),
            StageArtifact::Verification(Verification { valid: true })
        );
    }

    #[test]
    fn test_operation_kind_matches_outcome_kind() {
        let op = Operation::Setup(SetupInput {
            program: CompiledProgram {
                program: vec![1, 2, 3],
                abi: serde_json::Value::Null,
            },
        });
        let response = Response::success(
            RequestId::new(2),
            StageArtifact::Keypair(Keypair {
                proving_key: vec![],
                verification_key: vec![],
            }),
        );
        assert_eq!(op.kind(), response.kind());
    }

    #[test]
    fn test_error_code_from_resolve_error() {
        assert_eq!(
            ErrorCode::from(&ResolveError::cyclic(vec![])),
            ErrorCode::CyclicImport
        );
        assert_eq!(
            ErrorCode::from(&ResolveError::unresolved("a", "b")),
            ErrorCode::UnresolvedImport
        );
    }
}

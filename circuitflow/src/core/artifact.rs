//! Stage result types produced by the engine.

use super::StageId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Serde adapter encoding byte buffers as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledProgram {
    /// Opaque engine artifact.
    #[serde(with = "base64_bytes")]
    pub program: Vec<u8>,
    /// Engine-defined interface description of the program.
    #[serde(default)]
    pub abi: serde_json::Value,
}

/// Proving and verification keys produced by setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    /// The proving key.
    #[serde(with = "base64_bytes")]
    pub proving_key: Vec<u8>,
    /// The verification key.
    #[serde(with = "base64_bytes")]
    pub verification_key: Vec<u8>,
}

/// ABI flavour of an exported verifier contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbiVersion {
    /// The original contract ABI.
    #[default]
    V1,
    /// ABI coder v2, structured arguments.
    V2,
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

/// Verifier contract source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierContract {
    /// Contract source.
    pub source: String,
    /// ABI version the contract was generated for.
    pub abi_version: AbiVersion,
}

/// A computed witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    /// Serialized witness.
    pub witness: String,
    /// Program output for the supplied arguments.
    pub output: String,
}

/// A generated proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Opaque proof bytes.
    #[serde(with = "base64_bytes")]
    pub proof: Vec<u8>,
    /// Public inputs the proof attests to.
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// Outcome of proof verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Whether the proof verified.
    pub valid: bool,
}

/// A stage result of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageArtifact {
    /// Output of [`StageId::Compile`].
    Program(CompiledProgram),
    /// Output of [`StageId::Setup`].
    Keypair(Keypair),
    /// Output of [`StageId::ExportVerifier`].
    Verifier(VerifierContract),
    /// Output of [`StageId::ComputeWitness`].
    Witness(Witness),
    /// Output of [`StageId::GenerateProof`].
    Proof(Proof),
    /// Output of [`StageId::Verify`].
    Verification(Verification),
}

impl StageArtifact {
    /// Returns the stage that produces this kind of artifact.
    #[must_use]
    pub fn stage(&self) -> StageId {
        match self {
            Self::Program(_) => StageId::Compile,
            Self::Keypair(_) => StageId::Setup,
            Self::Verifier(_) => StageId::ExportVerifier,
            Self::Witness(_) => StageId::ComputeWitness,
            Self::Proof(_) => StageId::GenerateProof,
            Self::Verification(_) => StageId::Verify,
        }
    }

    /// Returns the content identity of the artifact.
    #[must_use]
    pub fn result_id(&self) -> ResultId {
        let mut hasher = Sha256::new();
        hasher.update(self.stage().as_str().as_bytes());
        match self {
            Self::Program(p) => {
                update_framed(&mut hasher, &p.program);
                update_framed(&mut hasher, p.abi.to_string().as_bytes());
            }
            Self::Keypair(k) => {
                update_framed(&mut hasher, &k.proving_key);
                update_framed(&mut hasher, &k.verification_key);
            }
            Self::Verifier(v) => {
                update_framed(&mut hasher, v.source.as_bytes());
                update_framed(&mut hasher, v.abi_version.to_string().as_bytes());
            }
            Self::Witness(w) => {
                update_framed(&mut hasher, w.witness.as_bytes());
                update_framed(&mut hasher, w.output.as_bytes());
            }
            Self::Proof(p) => {
                update_framed(&mut hasher, &p.proof);
                for input in &p.inputs {
                    update_framed(&mut hasher, input.as_bytes());
                }
            }
            Self::Verification(v) => hasher.update([u8::from(v.valid)]),
        }
        ResultId(hex::encode(hasher.finalize()))
    }

    /// Returns the compiled program, if this is one.
    #[must_use]
    pub fn as_program(&self) -> Option<&CompiledProgram> {
        match self {
            Self::Program(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the key pair, if this is one.
    #[must_use]
    pub fn as_keypair(&self) -> Option<&Keypair> {
        match self {
            Self::Keypair(k) => Some(k),
            _ => None,
        }
    }

    /// Returns the verifier contract, if this is one.
    #[must_use]
    pub fn as_verifier(&self) -> Option<&VerifierContract> {
        match self {
            Self::Verifier(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the witness, if this is one.
    #[must_use]
    pub fn as_witness(&self) -> Option<&Witness> {
        match self {
            Self::Witness(w) => Some(w),
            _ => None,
        }
    }

    /// Returns the proof, if this is one.
    #[must_use]
    pub fn as_proof(&self) -> Option<&Proof> {
        match self {
            Self::Proof(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the verification outcome, if this is one.
    #[must_use]
    pub fn as_verification(&self) -> Option<&Verification> {
        match self {
            Self::Verification(v) => Some(v),
            _ => None,
        }
    }
}

// Length-prefixed so adjacent fields cannot alias each other.
fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Content identity of a published stage result (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(String);

impl ResultId {
    /// Returns the digest as a hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form for log output.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

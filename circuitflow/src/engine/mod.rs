//! Boundary to the native compiler/prover engine.
//!
//! The engine is a black box with blocking calls. It only ever runs on the
//! worker thread owned by [`crate::channel::WorkerChannel`], wrapped in an
//! [`EngineHost`] that enforces the initialization contract and turns
//! requests into responses.

mod host;

pub use host::{EngineHost, HostOptions};

use crate::core::{
    AbiVersion, CompiledProgram, Keypair, Proof, Verification, VerifierContract, Witness,
};
use crate::errors::ResolveError;
use crate::resolver::ImportResolver;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors reported by an engine or its host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The resolver callback failed.
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// The engine rejected the operation.
    #[error("{0}")]
    Failed(String),

    /// An operation ran before `initialize`.
    #[error("Engine is not initialized")]
    NotInitialized,

    /// `initialize` ran twice.
    #[error("Engine is already initialized")]
    AlreadyInitialized,
}

impl EngineError {
    /// Creates a generic failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// The compiler/prover engine.
///
/// Calls block; they are only made from the worker thread.
pub trait Engine: Send {
    /// Returns the engine name.
    fn name(&self) -> &str;

    /// Installs the import resolver. Called exactly once, before any compile.
    fn initialize(&mut self, resolver: Box<dyn ImportResolver>) -> Result<(), EngineError>;

    /// Returns the standard library, keyed by logical module name.
    fn std_lib(&self) -> BTreeMap<String, String>;

    /// Compiles a program whose root module lives at `location`.
    ///
    /// Invokes the resolver for each import, depth-first in source order.
    fn compile(&mut self, source: &str, location: &str) -> Result<CompiledProgram, EngineError>;

    /// Generates a key pair for a program.
    fn setup(&mut self, program: &CompiledProgram) -> Result<Keypair, EngineError>;

    /// Produces verifier contract source for a verification key.
    fn export_verifier(
        &mut self,
        verification_key: &[u8],
        abi_version: AbiVersion,
    ) -> Result<VerifierContract, EngineError>;

    /// Computes a witness.
    fn compute_witness(
        &mut self,
        program: &CompiledProgram,
        arguments: &[String],
    ) -> Result<Witness, EngineError>;

    /// Generates a proof.
    fn generate_proof(
        &mut self,
        program: &CompiledProgram,
        witness: &Witness,
        proving_key: &[u8],
    ) -> Result<Proof, EngineError>;

    /// Verifies a proof.
    fn verify(&mut self, verification_key: &[u8], proof: &Proof)
        -> Result<Verification, EngineError>;
}

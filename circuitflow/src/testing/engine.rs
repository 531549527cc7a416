//! A deterministic in-process engine for tests.
//!
//! Compilation flattens the program by following `import "path"` and
//! `from "path" import ...` lines through the resolver. Keys, proofs and
//! verification are derived from SHA-256 digests so results are stable and
//! content dependent.

use crate::channel::EngineFactory;
use crate::core::{
    AbiVersion, CompiledProgram, Keypair, Proof, StageId, Verification, VerifierContract, Witness,
};
use crate::engine::{Engine, EngineError};
use crate::resolver::ImportResolver;
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^\s*(?:from\s+"([^"]+)"\s+import\b.*|import\s+"([^"]+)".*)$"#)
            .expect("import pattern is valid")
    })
}

/// Shared record of the operations that reached an engine.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<StageId>>>);

impl CallLog {
    /// Returns every recorded call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<StageId> {
        self.0.lock().clone()
    }

    /// Returns how many times a stage's operation ran.
    #[must_use]
    pub fn count(&self, stage: StageId) -> usize {
        self.0.lock().iter().filter(|s| **s == stage).count()
    }

    fn record(&self, stage: StageId) {
        self.0.lock().push(stage);
    }
}

/// Configuration for mock engine behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Standard library modules to report.
    pub std_lib: BTreeMap<String, String>,
    /// Compile fails with this message.
    pub compile_error: Option<String>,
    /// Setup fails with this message.
    pub setup_error: Option<String>,
    /// The engine panics when running this stage.
    pub panic_on: Option<StageId>,
    /// `initialize` fails.
    pub init_fails: bool,
    /// Artificial delay for every operation.
    pub latency: Duration,
    /// Operations that reached the engine.
    pub call_log: CallLog,
}

impl MockConfig {
    /// Creates a config with a small standard library.
    #[must_use]
    pub fn new() -> Self {
        let mut std_lib = BTreeMap::new();
        std_lib.insert(
            "ecc/babyjubjubParams.zok".to_string(),
            "def params() -> field { return 168700; }".to_string(),
        );
        std_lib.insert(
            "hashes/sha256/512bit.zok".to_string(),
            "import \"../utils.zok\"\ndef sha256() {}".to_string(),
        );
        std_lib.insert("hashes/utils.zok".to_string(), "def pad() {}".to_string());
        Self {
            std_lib,
            ..Self::default()
        }
    }

    /// Adds a standard library module.
    #[must_use]
    pub fn with_std_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.std_lib.insert(name.into(), source.into());
        self
    }

    /// Makes compile fail.
    #[must_use]
    pub fn compile_fails(mut self, message: impl Into<String>) -> Self {
        self.compile_error = Some(message.into());
        self
    }

    /// Makes setup fail.
    #[must_use]
    pub fn setup_fails(mut self, message: impl Into<String>) -> Self {
        self.setup_error = Some(message.into());
        self
    }

    /// Makes the engine panic while running a stage.
    #[must_use]
    pub fn panics_on(mut self, stage: StageId) -> Self {
        self.panic_on = Some(stage);
        self
    }

    /// Makes initialization fail.
    #[must_use]
    pub fn init_fails(mut self) -> Self {
        self.init_fails = true;
        self
    }

    /// Sets the per-operation delay.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns a handle to the call log.
    #[must_use]
    pub fn call_log(&self) -> CallLog {
        self.call_log.clone()
    }
}

/// Mock engine for unit and integration tests.
pub struct MockEngine {
    config: MockConfig,
    resolver: Option<Box<dyn ImportResolver>>,
}

impl MockEngine {
    /// Creates a new mock engine.
    #[must_use]
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    /// Returns a factory producing fresh engines from the config.
    #[must_use]
    pub fn factory(config: MockConfig) -> EngineFactory {
        Arc::new(move || Ok(Box::new(Self::new(config.clone())) as Box<dyn Engine>))
    }

    fn enter(&self, stage: StageId) {
        self.config.call_log.record(stage);
        if !self.config.latency.is_zero() {
            std::thread::sleep(self.config.latency);
        }
        if self.config.panic_on == Some(stage) {
            panic!("mock engine crashed during {stage}");
        }
    }

    fn flatten(&self, source: &str, location: &str, out: &mut String) -> Result<(), EngineError> {
        let resolver = self.resolver.as_ref().ok_or(EngineError::NotInitialized)?;
        for line in source.lines() {
            let import = import_pattern()
                .captures(line)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
                .map(|m| m.as_str().to_string());

            match import {
                Some(path) => {
                    let resolved = resolver.resolve(location, &path)?;
                    self.flatten(&resolved.source, &resolved.location, out)?;
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        Ok(())
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl Engine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn initialize(&mut self, resolver: Box<dyn ImportResolver>) -> Result<(), EngineError> {
        if self.config.init_fails {
            return Err(EngineError::failed("mock engine failed to initialize"));
        }
        self.resolver = Some(resolver);
        Ok(())
    }

    fn std_lib(&self) -> BTreeMap<String, String> {
        self.config.std_lib.clone()
    }

    fn compile(&mut self, source: &str, location: &str) -> Result<CompiledProgram, EngineError> {
        self.enter(StageId::Compile);
        let mut flattened = String::new();
        self.flatten(source, location, &mut flattened)?;
        if let Some(message) = &self.config.compile_error {
            return Err(EngineError::failed(message.clone()));
        }
        Ok(CompiledProgram {
            program: flattened.into_bytes(),
            abi: serde_json::json!({ "root": location }),
        })
    }

    fn setup(&mut self, program: &CompiledProgram) -> Result<Keypair, EngineError> {
        self.enter(StageId::Setup);
        if let Some(message) = &self.config.setup_error {
            return Err(EngineError::failed(message.clone()));
        }
        let key = digest(&program.program);
        Ok(Keypair {
            proving_key: format!("pk:{key}").into_bytes(),
            verification_key: format!("vk:{key}").into_bytes(),
        })
    }

    fn export_verifier(
        &mut self,
        verification_key: &[u8],
        abi_version: AbiVersion,
    ) -> Result<VerifierContract, EngineError> {
        self.enter(StageId::ExportVerifier);
        let pragma = match abi_version {
            AbiVersion::V1 => "",
            AbiVersion::V2 => "pragma experimental ABIEncoderV2;\n",
        };
        Ok(VerifierContract {
            source: format!(
                "pragma solidity ^0.8.0;\n{pragma}contract Verifier {{\n    bytes constant VK = hex\"{}\";\n}}\n",
                hex::encode(verification_key)
            ),
            abi_version,
        })
    }

    fn compute_witness(
        &mut self,
        program: &CompiledProgram,
        arguments: &[String],
    ) -> Result<Witness, EngineError> {
        self.enter(StageId::ComputeWitness);
        let mut lines = vec![format!("~program {}", digest(&program.program))];
        lines.extend(
            arguments
                .iter()
                .enumerate()
                .map(|(i, arg)| format!("~in_{i} {arg}")),
        );
        Ok(Witness {
            witness: lines.join("\n"),
            output: arguments.join(" "),
        })
    }

    fn generate_proof(
        &mut self,
        _program: &CompiledProgram,
        witness: &Witness,
        proving_key: &[u8],
    ) -> Result<Proof, EngineError> {
        self.enter(StageId::GenerateProof);
        let key = proving_key
            .strip_prefix(b"pk:")
            .ok_or_else(|| EngineError::failed("invalid proving key"))?;
        let mut proof = key.to_vec();
        proof.push(b':');
        proof.extend_from_slice(digest(witness.witness.as_bytes()).as_bytes());
        Ok(Proof {
            proof,
            inputs: witness.output.split_whitespace().map(str::to_string).collect(),
        })
    }

    fn verify(
        &mut self,
        verification_key: &[u8],
        proof: &Proof,
    ) -> Result<Verification, EngineError> {
        self.enter(StageId::Verify);
        let key = verification_key
            .strip_prefix(b"vk:")
            .ok_or_else(|| EngineError::failed("invalid verification key"))?;
        let valid = proof.proof.starts_with(key) && proof.proof.get(key.len()) == Some(&b':');
        Ok(Verification { valid })
    }
}

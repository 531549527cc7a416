//! # Circuitflow
//!
//! Pipeline coordination for zero-knowledge circuit tooling.
//!
//! A program goes through compile, setup, verifier export, witness
//! computation, proof generation and verification. Circuitflow runs each
//! step on an engine in a dedicated worker thread and keeps the stages
//! consistent:
//!
//! - **Worker channel**: fire-and-forget requests, kind-routed responses
//! - **Import resolution**: a synchronous resolver callback with cycle detection
//! - **Stage controllers**: only the response to the latest request is applied
//! - **Invalidation**: a changed result resets everything derived from it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use circuitflow::prelude::*;
//!
//! let mut pipeline = Pipeline::spawn(engine_factory, PipelineConfig::default())?;
//!
//! pipeline.compile(source, "main.zok")?;
//! pipeline.settle().await;
//! pipeline.setup()?;
//! pipeline.compute_witness(["3", "9"])?;
//! pipeline.settle().await;
//! pipeline.generate_proof()?;
//! pipeline.settle().await;
//!
//! let proof = pipeline.snapshot().proof().cloned();
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod channel;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod resolver;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channel::{EngineFactory, WorkerChannel, WorkerOptions};
    pub use crate::config::PipelineConfig;
    pub use crate::core::{
        AbiVersion, CompiledProgram, Keypair, Proof, ResultId, StageArtifact, StageId,
        StageState, StageStatus, Verification, VerifierContract, Witness,
    };
    pub use crate::engine::{Engine, EngineError};
    pub use crate::errors::{DependencyNotReadyError, PipelineError, ResolveError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        DispatchOptions, Pipeline, PipelineSnapshot, ResponseDisposition, StageInput,
    };
    pub use crate::resolver::{DirectorySource, FileSource, ImportResolver, ProjectFiles};
    pub use crate::utils::{generate_uuid, iso_timestamp};
}

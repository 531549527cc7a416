//! Engine host: initialization guard and request execution.

use super::{Engine, EngineError};
use crate::core::StageArtifact;
use crate::protocol::{ErrorCode, Failure, Operation, Request, Response};
use crate::resolver::{normalize, ProjectFiles, ResolverBridge, StdLib};
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

/// Options the host applies to its resolver bridge.
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    /// Extension tried for imports written without one.
    pub default_extension: Option<String>,
}

/// Owns an engine inside the isolated execution context.
pub struct EngineHost {
    engine: Box<dyn Engine>,
    options: HostOptions,
    bridge: Option<ResolverBridge>,
}

impl std::fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHost")
            .field("engine", &self.engine.name())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl EngineHost {
    /// Wraps an engine. Call [`EngineHost::initialize`] before executing.
    #[must_use]
    pub fn new(engine: Box<dyn Engine>, options: HostOptions) -> Self {
        Self {
            engine,
            options,
            bridge: None,
        }
    }

    /// Returns true once initialization succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.bridge.is_some()
    }

    /// Returns the installed resolver bridge.
    #[must_use]
    pub fn bridge(&self) -> Option<&ResolverBridge> {
        self.bridge.as_ref()
    }

    /// Builds the resolver bridge over the engine's standard library and
    /// installs it.
    ///
    /// A second call is rejected with [`EngineError::AlreadyInitialized`]
    /// and leaves the installed resolver untouched.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.bridge.is_some() {
            warn!(engine = %self.engine.name(), "Rejected repeated engine initialization");
            return Err(EngineError::AlreadyInitialized);
        }

        let stdlib = StdLib::new(self.engine.std_lib());
        let modules = stdlib.len();
        let bridge = ResolverBridge::new(stdlib)
            .with_default_extension(self.options.default_extension.clone());

        self.engine.initialize(Box::new(bridge.clone()))?;
        self.bridge = Some(bridge);

        info!(engine = %self.engine.name(), stdlib_modules = modules, "Engine initialized");
        Ok(())
    }

    /// Runs a request to completion and builds its response.
    pub fn execute(&mut self, request: Request) -> Response {
        let kind = request.kind();
        let span = info_span!("engine.execute", stage = %kind, request = %request.id);
        let _guard = span.enter();
        let start = Instant::now();

        let response = match self.run(request.operation) {
            Ok(artifact) => Response::success(request.id, artifact),
            Err(err) => {
                let code = match &err {
                    EngineError::Resolve(resolve) => ErrorCode::from(resolve),
                    EngineError::NotInitialized => ErrorCode::NotInitialized,
                    EngineError::Failed(_) | EngineError::AlreadyInitialized => ErrorCode::Engine,
                };
                Response::failure(request.id, Failure::new(kind, code, err.to_string()))
            }
        };

        debug!(
            error = response.is_error(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Operation finished"
        );
        response
    }

    fn run(&mut self, operation: Operation) -> Result<StageArtifact, EngineError> {
        let Some(bridge) = self.bridge.clone() else {
            return Err(EngineError::NotInitialized);
        };

        match operation {
            Operation::Compile(input) => {
                let location = normalize(&input.location);
                bridge.begin_compile(&location, ProjectFiles::from(input.files));
                let compiled = self.engine.compile(&input.source, &location);
                let resolution = bridge.finish_compile();
                debug!(resolutions = bridge.resolution_count(), "Compile finished");

                // The bridge's record wins over however the engine worded it.
                if let Some(err) = resolution {
                    return Err(EngineError::Resolve(err));
                }
                compiled.map(StageArtifact::Program)
            }
            Operation::Setup(input) => self.engine.setup(&input.program).map(StageArtifact::Keypair),
            Operation::ExportVerifier(input) => self
                .engine
                .export_verifier(&input.verification_key, input.abi_version)
                .map(StageArtifact::Verifier),
            Operation::ComputeWitness(input) => self
                .engine
                .compute_witness(&input.program, &input.arguments)
                .map(StageArtifact::Witness),
            Operation::GenerateProof(input) => self
                .engine
                .generate_proof(&input.program, &input.witness, &input.proving_key)
                .map(StageArtifact::Proof),
            Operation::Verify(input) => self
                .engine
                .verify(&input.verification_key, &input.proof)
                .map(StageArtifact::Verification),
        }
    }
}

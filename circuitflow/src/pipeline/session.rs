//! The pipeline facade: dispatch, response handling and invalidation.

use super::controller::StageController;
use super::invalidation::{DependencyGraph, InvalidationCoordinator};
use crate::channel::{EngineFactory, WorkerChannel, WorkerOptions};
use crate::config::PipelineConfig;
use crate::core::{
    AbiVersion, CompiledProgram, Keypair, Proof, Published, ResultId, StageArtifact, StageId,
    StageState, StageStatus, Transition, Verification, VerifierContract, Witness,
};
use crate::errors::{DependencyNotReadyError, PipelineError, PipelineValidationError};
use crate::events::{self, EventSink, NoOpEventSink, PipelineEvent};
use crate::protocol::{
    CompileInput, ComputeWitnessInput, ExportVerifierInput, GenerateProofInput, Operation,
    Request, RequestId, Response, SetupInput, VerifyInput,
};
use crate::resolver::{FileSource, ProjectFiles};
use crate::utils::generate_uuid;
use futures::future::poll_fn;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a caller asks a stage to do.
///
/// Upstream artifacts are taken from the pipeline; only caller-supplied
/// values appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    /// Compile a program.
    Compile {
        /// Program source.
        source: String,
        /// Location of the root module. Empty uses the configured root.
        location: String,
    },
    /// Generate keys for the compiled program.
    Setup,
    /// Export a verifier contract for the current keys.
    ExportVerifier {
        /// Requested ABI version.
        abi_version: AbiVersion,
    },
    /// Compute a witness for the compiled program.
    ComputeWitness {
        /// Program arguments in declaration order.
        arguments: Vec<String>,
    },
    /// Generate a proof.
    GenerateProof,
    /// Verify the current proof.
    Verify,
}

impl StageInput {
    /// Returns the stage this input is for.
    #[must_use]
    pub fn stage(&self) -> StageId {
        match self {
            Self::Compile { .. } => StageId::Compile,
            Self::Setup => StageId::Setup,
            Self::ExportVerifier { .. } => StageId::ExportVerifier,
            Self::ComputeWitness { .. } => StageId::ComputeWitness,
            Self::GenerateProof => StageId::GenerateProof,
            Self::Verify => StageId::Verify,
        }
    }
}

/// Per-dispatch options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Delay before the request is sent. `None` uses the configured delay.
    pub delay: Option<Duration>,
}

impl DispatchOptions {
    /// Sends without delay.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            delay: Some(Duration::ZERO),
        }
    }

    /// Sends after the given delay.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

/// What happened to a delivered response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    /// The response answered the outstanding request and was applied.
    Accepted,
    /// The response was stale and dropped.
    Stale,
}

/// A read-only copy of every stage's state.
///
/// Typed accessors only ever expose results of stages in success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSnapshot {
    session_id: Uuid,
    states: [StageState; 6],
}

impl PipelineSnapshot {
    /// Returns the id of the pipeline session.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns a stage's state.
    #[must_use]
    pub fn state(&self, stage: StageId) -> &StageState {
        &self.states[stage.index()]
    }

    /// Returns a stage's status.
    #[must_use]
    pub fn status(&self, stage: StageId) -> StageStatus {
        self.state(stage).status()
    }

    /// Returns a stage's error message.
    #[must_use]
    pub fn error(&self, stage: StageId) -> Option<&str> {
        self.state(stage).error()
    }

    fn artifact(&self, stage: StageId) -> Option<&StageArtifact> {
        self.state(stage).published().map(|p| p.artifact.as_ref())
    }

    /// The compiled program.
    #[must_use]
    pub fn program(&self) -> Option<&CompiledProgram> {
        self.artifact(StageId::Compile)?.as_program()
    }

    /// The key pair.
    #[must_use]
    pub fn keypair(&self) -> Option<&Keypair> {
        self.artifact(StageId::Setup)?.as_keypair()
    }

    /// The exported verifier contract.
    #[must_use]
    pub fn verifier(&self) -> Option<&VerifierContract> {
        self.artifact(StageId::ExportVerifier)?.as_verifier()
    }

    /// The computed witness.
    #[must_use]
    pub fn witness(&self) -> Option<&Witness> {
        self.artifact(StageId::ComputeWitness)?.as_witness()
    }

    /// The generated proof.
    #[must_use]
    pub fn proof(&self) -> Option<&Proof> {
        self.artifact(StageId::GenerateProof)?.as_proof()
    }

    /// The verification result.
    #[must_use]
    pub fn verification(&self) -> Option<&Verification> {
        self.artifact(StageId::Verify)?.as_verification()
    }
}

/// Coordinates the stages of one proving session.
///
/// The pipeline is owned by a single task; every mutation goes through
/// `&mut self`. Responses are applied when the owner calls
/// [`Pipeline::next_response`], [`Pipeline::process_ready`] or
/// [`Pipeline::settle`].
pub struct Pipeline {
    id: Uuid,
    config: PipelineConfig,
    channel: WorkerChannel,
    controllers: [StageController; 6],
    coordinator: InvalidationCoordinator,
    files: ProjectFiles,
    event_sink: Arc<dyn EventSink>,
    torn_down: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("controllers", &self.controllers)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline over an existing channel, subscribing one
    /// controller per stage.
    pub fn new(channel: WorkerChannel, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let graph = DependencyGraph::standard().map_err(PipelineValidationError::from)?;
        let controllers =
            StageId::ALL.map(|stage| StageController::new(stage, channel.subscribe(&[stage])));
        let id = generate_uuid();
        info!(session = %id, "Pipeline created");

        Ok(Self {
            id,
            config,
            channel,
            controllers,
            coordinator: InvalidationCoordinator::new(graph),
            files: ProjectFiles::new(),
            event_sink: Arc::new(NoOpEventSink),
            torn_down: false,
        })
    }

    /// Spawns a worker for the engine factory and creates a pipeline on it.
    pub fn spawn(factory: EngineFactory, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let channel = WorkerChannel::spawn(factory, WorkerOptions::from_config(&config))?;
        Self::new(channel, config)
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the worker channel.
    #[must_use]
    pub fn channel(&self) -> &WorkerChannel {
        &self.channel
    }

    /// Returns the dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        self.coordinator.graph()
    }

    // ---- project files ----

    /// Returns the project files used to resolve imports.
    #[must_use]
    pub fn project_files(&self) -> &ProjectFiles {
        &self.files
    }

    /// Replaces the project files. Takes effect at the next compile.
    pub fn set_project_files(&mut self, files: ProjectFiles) {
        debug!(files = files.len(), "Project files replaced");
        self.files = files;
    }

    /// Loads every project file from a source. Returns the file count.
    pub async fn load_project_files(&mut self, source: &dyn FileSource) -> Result<usize, PipelineError> {
        let files = ProjectFiles::prefetch(source).await?;
        let count = files.len();
        self.set_project_files(files);
        Ok(count)
    }

    // ---- dispatch ----

    /// Compiles a program.
    pub fn compile(
        &mut self,
        source: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<RequestId, PipelineError> {
        self.dispatch(StageInput::Compile {
            source: source.into(),
            location: location.into(),
        })
    }

    /// Generates keys for the compiled program.
    pub fn setup(&mut self) -> Result<RequestId, PipelineError> {
        self.dispatch(StageInput::Setup)
    }

    /// Exports a verifier contract.
    pub fn export_verifier(&mut self, abi_version: AbiVersion) -> Result<RequestId, PipelineError> {
        self.dispatch(StageInput::ExportVerifier { abi_version })
    }

    /// Computes a witness.
    pub fn compute_witness<I, S>(&mut self, arguments: I) -> Result<RequestId, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatch(StageInput::ComputeWitness {
            arguments: arguments.into_iter().map(Into::into).collect(),
        })
    }

    /// Generates a proof.
    pub fn generate_proof(&mut self) -> Result<RequestId, PipelineError> {
        self.dispatch(StageInput::GenerateProof)
    }

    /// Verifies the current proof.
    pub fn verify(&mut self) -> Result<RequestId, PipelineError> {
        self.dispatch(StageInput::Verify)
    }

    /// Dispatches with default options.
    pub fn dispatch(&mut self, input: StageInput) -> Result<RequestId, PipelineError> {
        self.dispatch_with(input, DispatchOptions::default())
    }

    /// Checks dependencies, enters loading and sends the request.
    ///
    /// # Errors
    ///
    /// `DependencyNotReady` if an upstream stage is not in success. Nothing
    /// is sent and the stage is left as it was.
    pub fn dispatch_with(
        &mut self,
        input: StageInput,
        options: DispatchOptions,
    ) -> Result<RequestId, PipelineError> {
        let stage = input.stage();
        if self.torn_down {
            return Err(PipelineError::EngineUnavailable(
                "pipeline has been torn down".to_string(),
            ));
        }

        let missing: Vec<StageId> = self
            .graph()
            .dependencies(stage)
            .iter()
            .copied()
            .filter(|dep| !self.state(*dep).status().is_success())
            .collect();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            warn!(stage = %stage, missing = ?names, "Dispatch blocked by dependencies");
            self.emit(PipelineEvent::StageBlocked, stage, json!({ "missing": names }));
            return Err(DependencyNotReadyError::new(stage, missing).into());
        }

        let operation = self.build_operation(input)?;
        let derived_from = self.upstream_ids(stage);
        let id = self.channel.allocate_id();
        let request = Request::new(id, operation);

        let transition = self.controllers[stage.index()].begin(id, derived_from);
        info!(stage = %stage, request = %id, "Stage loading");
        self.emit(PipelineEvent::StageLoading, stage, json!({ "request_id": id.get() }));
        self.apply(&transition);

        let delay = options.delay.unwrap_or_else(|| self.config.dispatch_delay());
        self.send(request, delay);
        Ok(id)
    }

    fn send(&self, request: Request, delay: Duration) {
        if delay.is_zero() {
            self.channel.send(request);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let channel = self.channel.clone();
                let live = self.controllers[request.kind().index()].live_request();
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Superseded, reset or torn down while waiting.
                    if live.load(Ordering::Acquire) != request.id.get() {
                        debug!(request = %request.id, "Delayed request no longer outstanding, not sending");
                        return;
                    }
                    channel.send(request);
                });
            }
            Err(_) => {
                debug!(request = %request.id, "No runtime for delayed send, sending now");
                self.channel.send(request);
            }
        }
    }

    fn upstream_ids(&self, stage: StageId) -> BTreeMap<StageId, ResultId> {
        self.graph()
            .dependencies(stage)
            .iter()
            .filter_map(|dep| Some((*dep, self.state(*dep).result_id()?.clone())))
            .collect()
    }

    fn artifact(&self, stage: StageId) -> Option<&StageArtifact> {
        self.published(stage).map(|p| p.artifact.as_ref())
    }

    fn build_operation(&self, input: StageInput) -> Result<Operation, PipelineError> {
        let stage = input.stage();
        let missing = |dep: StageId| DependencyNotReadyError::new(stage, vec![dep]);
        let program = || {
            self.artifact(StageId::Compile)
                .and_then(StageArtifact::as_program)
                .cloned()
                .ok_or_else(|| missing(StageId::Compile))
        };
        let keypair = || {
            self.artifact(StageId::Setup)
                .and_then(StageArtifact::as_keypair)
                .ok_or_else(|| missing(StageId::Setup))
        };

        let operation = match input {
            StageInput::Compile { source, location } => {
                let location = if location.is_empty() {
                    self.config.root_location.clone()
                } else {
                    location
                };
                Operation::Compile(CompileInput {
                    source,
                    location,
                    files: self.files.to_map(),
                })
            }
            StageInput::Setup => Operation::Setup(SetupInput { program: program()? }),
            StageInput::ExportVerifier { abi_version } => {
                Operation::ExportVerifier(ExportVerifierInput {
                    verification_key: keypair()?.verification_key.clone(),
                    abi_version,
                })
            }
            StageInput::ComputeWitness { arguments } => {
                Operation::ComputeWitness(ComputeWitnessInput {
                    program: program()?,
                    arguments,
                })
            }
            StageInput::GenerateProof => {
                let witness = self
                    .artifact(StageId::ComputeWitness)
                    .and_then(StageArtifact::as_witness)
                    .cloned()
                    .ok_or_else(|| missing(StageId::ComputeWitness))?;
                Operation::GenerateProof(GenerateProofInput {
                    program: program()?,
                    witness,
                    proving_key: keypair()?.proving_key.clone(),
                })
            }
            StageInput::Verify => {
                let proof = self
                    .artifact(StageId::GenerateProof)
                    .and_then(StageArtifact::as_proof)
                    .cloned()
                    .ok_or_else(|| missing(StageId::GenerateProof))?;
                Operation::Verify(VerifyInput {
                    verification_key: keypair()?.verification_key.clone(),
                    proof,
                })
            }
        };
        Ok(operation)
    }

    // ---- responses ----

    /// Applies a response delivered to a stage's subscription.
    pub fn handle_response(&mut self, stage: StageId, response: Response) -> ResponseDisposition {
        let request = response.id;
        let controller = &mut self.controllers[stage.index()];
        let outstanding = controller.outstanding();

        let Some(transition) = controller.complete(response) else {
            debug!(
                stage = %stage,
                request = %request,
                outstanding = ?outstanding.map(RequestId::get),
                "Dropping stale response"
            );
            self.emit(
                PipelineEvent::ResponseDropped,
                stage,
                json!({
                    "request_id": request.get(),
                    "outstanding": outstanding.map(RequestId::get),
                }),
            );
            return ResponseDisposition::Stale;
        };

        match self.state(stage) {
            StageState::Success(published) => {
                let data = json!({ "request_id": request.get(), "result_id": published.id.as_str() });
                self.emit(PipelineEvent::StageSucceeded, stage, data);
            }
            StageState::Error(message) => {
                let data = json!({ "request_id": request.get(), "error": message });
                self.emit(PipelineEvent::StageFailed, stage, data);
            }
            StageState::Idle | StageState::Loading => {}
        }
        self.apply(&transition);
        ResponseDisposition::Accepted
    }

    fn poll_any(&mut self, cx: &mut Context<'_>) -> Poll<Option<(StageId, Response)>> {
        let mut open = false;
        for controller in &mut self.controllers {
            match controller.poll_response(cx) {
                Poll::Ready(Some(response)) => {
                    return Poll::Ready(Some((controller.stage(), response)));
                }
                Poll::Ready(None) => {}
                Poll::Pending => open = true,
            }
        }
        if open {
            Poll::Pending
        } else {
            Poll::Ready(None)
        }
    }

    /// Waits for the next response on any stage and applies it.
    ///
    /// Returns `None` once every subscription is closed.
    pub async fn next_response(&mut self) -> Option<(StageId, ResponseDisposition)> {
        let (stage, response) = poll_fn(|cx| self.poll_any(cx)).await?;
        Some((stage, self.handle_response(stage, response)))
    }

    /// Applies every response already delivered, without waiting.
    pub fn process_ready(&mut self) -> Vec<(StageId, ResponseDisposition)> {
        let mut handled = Vec::new();
        for stage in StageId::ALL {
            while let Some(response) = self.controllers[stage.index()].try_response() {
                handled.push((stage, self.handle_response(stage, response)));
            }
        }
        handled
    }

    /// Applies responses until no stage is loading.
    ///
    /// Returns the number of responses handled.
    pub async fn settle(&mut self) -> usize {
        let mut handled = 0;
        while self.is_loading() {
            if self.next_response().await.is_none() {
                break;
            }
            handled += 1;
        }
        handled
    }

    // ---- reset & lifecycle ----

    /// Resets a stage and everything downstream of it.
    pub fn reset(&mut self, stage: StageId) {
        let transition = self.controllers[stage.index()].reset();
        info!(stage = %stage, "Stage reset");
        self.emit(PipelineEvent::StageReset, stage, json!({}));
        self.invalidate(transition.stage);
    }

    /// Returns every stage to idle. Project files are kept.
    pub fn clear_session(&mut self) {
        for stage in StageId::ALL {
            let controller = &mut self.controllers[stage.index()];
            if controller.state().status() == StageStatus::Idle && controller.outstanding().is_none() {
                continue;
            }
            controller.reset();
            self.emit(PipelineEvent::StageReset, stage, json!({}));
        }
        info!(session = %self.id, "Session cleared");
    }

    /// Replaces the engine worker.
    ///
    /// Requests in flight fail with `EngineUnavailable`; their stages see the
    /// failure through the normal response path.
    pub fn restart_engine(&mut self) -> Result<(), PipelineError> {
        info!(session = %self.id, "Restarting engine");
        if let Err(err) = self.channel.respawn() {
            let message = err.to_string();
            for stage in StageId::ALL {
                if let Some(transition) = self.controllers[stage.index()].fail(message.clone()) {
                    self.emit(PipelineEvent::StageFailed, stage, json!({ "error": message }));
                    self.apply(&transition);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Unsubscribes every controller. Further dispatches are refused.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        for controller in &mut self.controllers {
            controller.detach();
        }
        self.torn_down = true;
        info!(session = %self.id, "Pipeline torn down");
    }

    /// Returns true after [`Pipeline::teardown`].
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ---- read side ----

    /// Returns a stage's state.
    #[must_use]
    pub fn state(&self, stage: StageId) -> &StageState {
        self.controllers[stage.index()].state()
    }

    /// Returns a stage's status.
    #[must_use]
    pub fn status(&self, stage: StageId) -> StageStatus {
        self.state(stage).status()
    }

    /// Returns a stage's published result.
    #[must_use]
    pub fn published(&self, stage: StageId) -> Option<&Published> {
        self.state(stage).published()
    }

    /// Returns a stage's error message.
    #[must_use]
    pub fn error(&self, stage: StageId) -> Option<&str> {
        self.state(stage).error()
    }

    /// Returns true while any stage is loading.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.controllers.iter().any(|c| c.state().is_loading())
    }

    /// Copies every stage's state.
    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            session_id: self.id,
            states: std::array::from_fn(|i| self.controllers[i].state().clone()),
        }
    }

    /// Returns true if every success was built from its upstream stages'
    /// current results.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        StageId::ALL.iter().all(|stage| {
            let Some(published) = self.published(*stage) else {
                return true;
            };
            self.graph().dependencies(*stage).iter().all(|dep| {
                self.state(*dep).result_id().is_some()
                    && self.state(*dep).result_id() == published.derived_from.get(dep)
            })
        })
    }

    // ---- internals ----

    fn apply(&mut self, transition: &Transition) {
        if InvalidationCoordinator::should_sweep(transition) {
            self.invalidate(transition.stage);
        }
    }

    fn invalidate(&mut self, origin: StageId) {
        let transitions = self.coordinator.sweep(origin, &mut self.controllers);
        for transition in transitions {
            self.emit(
                PipelineEvent::StageInvalidated,
                transition.stage,
                json!({ "origin": origin.as_str() }),
            );
        }
    }

    fn emit(&self, event: PipelineEvent, stage: StageId, extra: serde_json::Value) {
        events::emit(self.event_sink.as_ref(), event, stage, extra);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

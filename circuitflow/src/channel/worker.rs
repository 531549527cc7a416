//! Worker channel: the engine thread and the response pump.

use super::subscription::{Listeners, Subscription};
use crate::config::PipelineConfig;
use crate::core::StageId;
use crate::engine::{Engine, EngineError, EngineHost, HostOptions};
use crate::errors::PipelineError;
use crate::protocol::{ErrorCode, Failure, Request, RequestId, Response};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Builds a fresh engine inside the worker thread.
pub type EngineFactory = Arc<dyn Fn() -> Result<Box<dyn Engine>, EngineError> + Send + Sync>;

/// Options for spawning the worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Name of the worker thread.
    pub thread_name: String,
    /// Options for the engine host.
    pub host: HostOptions,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl WorkerOptions {
    /// Derives worker options from a pipeline configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            thread_name: config.worker_name.clone(),
            host: HostOptions {
                default_extension: config.extension().map(str::to_string),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: StageId,
    epoch: u64,
}

#[derive(Debug)]
struct WorkerHandle {
    epoch: u64,
    requests: mpsc::UnboundedSender<Request>,
}

struct ChannelInner {
    factory: EngineFactory,
    options: WorkerOptions,
    listeners: Arc<Listeners>,
    pending: Mutex<BTreeMap<RequestId, Pending>>,
    worker: Mutex<Option<WorkerHandle>>,
    next_id: AtomicU64,
    epoch: AtomicU64,
}

impl ChannelInner {
    fn start_worker(self: &Arc<Self>) -> Result<(), PipelineError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::EngineUnavailable(format!("no async runtime: {e}")))?;

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let factory = self.factory.clone();
        let host_options = self.options.host.clone();
        std::thread::Builder::new()
            .name(self.options.thread_name.clone())
            .spawn(move || worker_main(&factory, host_options, request_rx, response_tx))?;

        *self.worker.lock() = Some(WorkerHandle {
            epoch,
            requests: request_tx,
        });
        runtime.spawn(pump(Arc::downgrade(self), epoch, response_rx));

        info!(worker = %self.options.thread_name, epoch, "Engine worker started");
        Ok(())
    }

    fn deliver(&self, response: Response) {
        if self.pending.lock().remove(&response.id).is_none() {
            debug!(request = %response.id, "Dropping response for a request that is no longer pending");
            return;
        }
        self.listeners.deliver(&response);
    }

    fn fail_pending(&self, epoch: u64, reason: &str) -> usize {
        let failed: Vec<(RequestId, StageId)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<(RequestId, StageId)> = pending
                .iter()
                .filter(|(_, p)| p.epoch == epoch)
                .map(|(id, p)| (*id, p.kind))
                .collect();
            for (id, _) in &ids {
                pending.remove(id);
            }
            ids
        };

        for (id, kind) in &failed {
            self.listeners.deliver(&Response::failure(
                *id,
                Failure::new(*kind, ErrorCode::EngineUnavailable, reason),
            ));
        }
        failed.len()
    }

    fn worker_exited(&self, epoch: u64) {
        {
            let mut worker = self.worker.lock();
            if worker.as_ref().is_some_and(|w| w.epoch == epoch) {
                *worker = None;
            }
        }
        let failed = self.fail_pending(epoch, "Engine worker exited before responding");
        warn!(epoch, failed, "Engine worker exited");
    }
}

async fn pump(inner: Weak<ChannelInner>, epoch: u64, mut responses: mpsc::UnboundedReceiver<Response>) {
    while let Some(response) = responses.recv().await {
        match inner.upgrade() {
            Some(inner) => inner.deliver(response),
            None => return,
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.worker_exited(epoch);
    }
}

fn worker_main(
    factory: &EngineFactory,
    options: HostOptions,
    mut requests: mpsc::UnboundedReceiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        serve(factory, options, &mut requests, &responses);
    }));
    if outcome.is_err() {
        error!("Engine worker panicked");
    }
    // Requests first: a send that still succeeds is then covered by the
    // pump's failure sweep when the response side closes.
    drop(requests);
    drop(responses);
}

fn serve(
    factory: &EngineFactory,
    options: HostOptions,
    requests: &mut mpsc::UnboundedReceiver<Request>,
    responses: &mpsc::UnboundedSender<Response>,
) {
    let engine = match factory() {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "Engine construction failed");
            return;
        }
    };

    let mut host = EngineHost::new(engine, options);
    if let Err(err) = host.initialize() {
        error!(error = %err, "Engine initialization failed");
        return;
    }

    while let Some(request) = requests.blocking_recv() {
        let response = host.execute(request);
        if responses.send(response).is_err() {
            break;
        }
    }
    debug!("Engine worker stopped");
}

/// Message channel to the isolated engine context.
///
/// Cloning yields another handle to the same worker. The worker stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct WorkerChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("worker", &self.inner.options.thread_name)
            .field("available", &self.is_available())
            .field("pending", &self.pending_count())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl WorkerChannel {
    /// Spawns the worker thread and the response pump.
    ///
    /// Must be called from within a tokio runtime. Engine construction and
    /// initialization happen on the worker thread; if either fails, the
    /// channel reports `EngineUnavailable` for every request.
    pub fn spawn(factory: EngineFactory, options: WorkerOptions) -> Result<Self, PipelineError> {
        let inner = Arc::new(ChannelInner {
            factory,
            options,
            listeners: Arc::new(Listeners::default()),
            pending: Mutex::new(BTreeMap::new()),
            worker: Mutex::new(None),
            next_id: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        });
        inner.start_worker()?;
        Ok(Self { inner })
    }

    /// Allocates the id for a request that will be sent later.
    pub fn allocate_id(&self) -> RequestId {
        RequestId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Sends a request. Never blocks.
    ///
    /// If the worker is not running, an `EngineUnavailable` error response
    /// for the request is delivered to subscribers instead.
    pub fn send(&self, request: Request) {
        let id = request.id;
        let kind = request.kind();

        {
            let worker = self.inner.worker.lock();
            if let Some(handle) = worker.as_ref() {
                self.inner.pending.lock().insert(
                    id,
                    Pending {
                        kind,
                        epoch: handle.epoch,
                    },
                );
                if handle.requests.send(request).is_ok() {
                    debug!(request = %id, stage = %kind, "Request sent");
                    return;
                }
                self.inner.pending.lock().remove(&id);
            }
        }

        warn!(request = %id, stage = %kind, "Engine worker unavailable");
        self.inner.listeners.deliver(&Response::failure(
            id,
            Failure::new(kind, ErrorCode::EngineUnavailable, "Engine worker is not running"),
        ));
    }

    /// Subscribes to responses of the given kinds.
    pub fn subscribe(&self, kinds: &[StageId]) -> Subscription {
        self.inner.listeners.attach(kinds)
    }

    /// Replaces the worker with a fresh one.
    ///
    /// Every request pending on the old worker fails with
    /// `EngineUnavailable`; a late answer from it is discarded.
    pub fn respawn(&self) -> Result<(), PipelineError> {
        let previous = self.inner.worker.lock().take();
        if let Some(handle) = previous {
            let failed = self.inner.fail_pending(handle.epoch, "Engine worker restarted");
            info!(epoch = handle.epoch, failed, "Stopping engine worker");
        }
        self.inner.start_worker()
    }

    /// Returns true while a worker accepts requests.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// Returns the number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns the number of attached subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

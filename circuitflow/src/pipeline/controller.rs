//! Per-stage controller: state machine plus request correlation.

use crate::channel::Subscription;
use crate::core::{Published, ResultId, StageId, StageState, Transition};
use crate::protocol::{RequestId, Response};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};

/// Owns one stage's state and its outstanding request.
///
/// A response changes the state only if it answers the outstanding request.
/// Anything else is stale and dropped.
#[derive(Debug)]
pub struct StageController {
    stage: StageId,
    state: StageState,
    outstanding: Option<RequestId>,
    derived_from: BTreeMap<StageId, ResultId>,
    subscription: Option<Subscription>,
    live: Arc<AtomicU64>,
}

impl StageController {
    /// Creates an idle controller listening on the subscription.
    #[must_use]
    pub fn new(stage: StageId, subscription: Subscription) -> Self {
        Self {
            stage,
            state: StageState::Idle,
            outstanding: None,
            derived_from: BTreeMap::new(),
            subscription: Some(subscription),
            live: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the stage.
    #[must_use]
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &StageState {
        &self.state
    }

    /// Returns the id of the request the stage is waiting on.
    #[must_use]
    pub fn outstanding(&self) -> Option<RequestId> {
        self.outstanding
    }

    /// Returns a shared view of the outstanding request id, readable from
    /// other tasks. Zero means nothing is outstanding or the controller is
    /// detached.
    #[must_use]
    pub fn live_request(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.live)
    }

    /// Returns true while subscribed to responses.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Enters loading for a newly dispatched request.
    ///
    /// Any earlier outstanding request becomes stale.
    pub fn begin(&mut self, id: RequestId, derived_from: BTreeMap<StageId, ResultId>) -> Transition {
        if let Some(previous) = self.outstanding {
            debug!(stage = %self.stage, request = %previous, "Superseding outstanding request");
        }
        self.set_outstanding(Some(id));
        self.derived_from = derived_from;
        self.transition_to(StageState::Loading)
    }

    /// Applies a response if it answers the outstanding request.
    ///
    /// Returns `None` when the response is stale.
    pub fn complete(&mut self, response: Response) -> Option<Transition> {
        if response.kind() != self.stage || self.outstanding != Some(response.id) {
            return None;
        }
        self.set_outstanding(None);
        let derived_from = std::mem::take(&mut self.derived_from);

        let next = match response.into_result() {
            Ok(artifact) => {
                let published = Published::new(artifact, derived_from);
                info!(stage = %self.stage, result = %published.id.short(), "Stage succeeded");
                StageState::Success(published)
            }
            Err(failure) => {
                warn!(stage = %self.stage, code = ?failure.code, error = %failure.message, "Stage failed");
                StageState::Error(failure.message)
            }
        };
        Some(self.transition_to(next))
    }

    /// Returns to idle and forgets the outstanding request.
    pub fn reset(&mut self) -> Transition {
        self.set_outstanding(None);
        self.derived_from.clear();
        self.transition_to(StageState::Idle)
    }

    /// Fails the outstanding request locally.
    ///
    /// Returns `None` unless the stage is loading.
    pub fn fail(&mut self, message: impl Into<String>) -> Option<Transition> {
        if !self.state.is_loading() {
            return None;
        }
        self.set_outstanding(None);
        self.derived_from.clear();
        Some(self.transition_to(StageState::Error(message.into())))
    }

    /// Polls the subscription for the next response.
    ///
    /// Ready(None) once detached or the channel is gone.
    pub fn poll_response(&mut self, cx: &mut Context<'_>) -> Poll<Option<Response>> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }

    /// Returns a buffered response without waiting.
    pub fn try_response(&mut self) -> Option<Response> {
        self.subscription.as_mut()?.try_recv()
    }

    /// Unsubscribes from the channel.
    pub fn detach(&mut self) {
        self.live.store(0, Ordering::Release);
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn set_outstanding(&mut self, id: Option<RequestId>) {
        self.outstanding = id;
        if self.subscription.is_some() {
            self.live.store(id.map_or(0, RequestId::get), Ordering::Release);
        }
    }

    fn transition_to(&mut self, next: StageState) -> Transition {
        let from = self.state.result_id().cloned();
        self.state = next;
        Transition {
            stage: self.stage,
            from,
            to: self.state.result_id().cloned(),
            status: self.state.status(),
        }
    }
}

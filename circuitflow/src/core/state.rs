//! Per-stage state machine values.

use super::{ResultId, StageArtifact, StageId, StageStatus};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A stage result that has been accepted and published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Content identity of the artifact.
    pub id: ResultId,
    /// The artifact itself.
    pub artifact: Arc<StageArtifact>,
    /// Identities of the upstream results the request was built from.
    pub derived_from: BTreeMap<StageId, ResultId>,
    /// When the result was published (ISO 8601).
    pub published_at: String,
}

impl Published {
    /// Wraps an artifact, computing its identity.
    #[must_use]
    pub fn new(artifact: StageArtifact, derived_from: BTreeMap<StageId, ResultId>) -> Self {
        Self {
            id: artifact.result_id(),
            artifact: Arc::new(artifact),
            derived_from,
            published_at: crate::utils::iso_timestamp(),
        }
    }
}

/// The state of one stage. Every stage has exactly one at any time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StageState {
    /// Nothing to show.
    #[default]
    Idle,
    /// Waiting for the response to the outstanding request.
    Loading,
    /// The outstanding request succeeded.
    Success(Published),
    /// The outstanding request failed with this message.
    Error(String),
}

impl StageState {
    /// Returns the coarse status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        match self {
            Self::Idle => StageStatus::Idle,
            Self::Loading => StageStatus::Loading,
            Self::Success(_) => StageStatus::Success,
            Self::Error(_) => StageStatus::Error,
        }
    }

    /// Returns the published result when in success.
    #[must_use]
    pub fn published(&self) -> Option<&Published> {
        match self {
            Self::Success(published) => Some(published),
            _ => None,
        }
    }

    /// Returns the identity of the published result when in success.
    #[must_use]
    pub fn result_id(&self) -> Option<&ResultId> {
        self.published().map(|p| &p.id)
    }

    /// Returns the error message when in error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Returns true when a request is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// A state change of a single stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The stage that changed.
    pub stage: StageId,
    /// Result identity before the change (`None` unless it was in success).
    pub from: Option<ResultId>,
    /// Result identity after the change (`None` unless it is now in success).
    pub to: Option<ResultId>,
    /// Status after the change.
    pub status: StageStatus,
}

impl Transition {
    /// Returns true if the stage left success or entered a new success value.
    #[must_use]
    pub fn changes_result(&self) -> bool {
        self.from != self.to
    }
}

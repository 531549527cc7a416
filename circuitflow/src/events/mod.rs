//! Pipeline events.
//!
//! The pipeline reports every stage transition, blocked dispatch and dropped
//! response to an [`EventSink`]. Event data is a JSON object that always
//! carries `stage` and `timestamp`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

use crate::core::StageId;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of events emitted by a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A stage entered loading.
    #[serde(rename = "stage.loading")]
    StageLoading,
    /// A stage published a result.
    #[serde(rename = "stage.succeeded")]
    StageSucceeded,
    /// A stage failed.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// A stage was explicitly reset.
    #[serde(rename = "stage.reset")]
    StageReset,
    /// A dispatch was refused by the dependency gate.
    #[serde(rename = "stage.blocked")]
    StageBlocked,
    /// A stage was reset because an upstream result changed.
    #[serde(rename = "stage.invalidated")]
    StageInvalidated,
    /// A stale response was discarded.
    #[serde(rename = "response.dropped")]
    ResponseDropped,
}

impl PipelineEvent {
    /// Returns the event type string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StageLoading => "stage.loading",
            Self::StageSucceeded => "stage.succeeded",
            Self::StageFailed => "stage.failed",
            Self::StageReset => "stage.reset",
            Self::StageBlocked => "stage.blocked",
            Self::StageInvalidated => "stage.invalidated",
            Self::ResponseDropped => "response.dropped",
        }
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emits a pipeline event with `stage`, `timestamp` and extra fields.
pub(crate) fn emit(
    sink: &dyn EventSink,
    event: PipelineEvent,
    stage: StageId,
    extra: serde_json::Value,
) {
    let mut data = serde_json::json!({
        "stage": stage.as_str(),
        "timestamp": iso_timestamp(),
    });
    if let (Some(target), serde_json::Value::Object(fields)) = (data.as_object_mut(), extra) {
        target.extend(fields);
    }
    sink.try_emit(event.as_str(), Some(data));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_match_serde() {
        for event in [
            PipelineEvent::StageLoading,
            PipelineEvent::StageSucceeded,
            PipelineEvent::StageFailed,
            PipelineEvent::StageReset,
            PipelineEvent::StageBlocked,
            PipelineEvent::StageInvalidated,
            PipelineEvent::ResponseDropped,
        ] {
            assert_eq!(
                serde_json::to_value(event).unwrap(),
                serde_json::Value::String(event.to_string())
            );
        }
    }

    #[test]
    fn test_emit_merges_fields() {
        let sink = CollectingEventSink::new();
        emit(
            &sink,
            PipelineEvent::StageBlocked,
            StageId::Verify,
            serde_json::json!({"missing": ["generate_proof"]}),
        );

        let events = sink.events();
        assert_eq!(events[0].event_type, "stage.blocked");
        assert_eq!(events[0].field("stage"), Some("verify"));
        assert!(events[0].field("timestamp").is_some());
        assert_eq!(
            events[0].data.as_ref().unwrap()["missing"],
            serde_json::json!(["generate_proof"])
        );
    }
}

//! Event sink trait and implementations.

use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives pipeline events.
///
/// Sinks are called synchronously from the pipeline's owning task and must
/// not block. Failures inside a sink are the sink's problem; nothing is
/// reported back to the pipeline.
pub trait EventSink: Send + Sync {
    /// Emits an event without blocking.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "stage.succeeded")
    /// * `data` - Optional event data
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A sink that discards all events. The pipeline default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// A sink that forwards events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    ///
    /// Levels other than DEBUG and INFO log at INFO.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let data = data.map(|d| d.to_string()).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event_type, event_data = %data, "Event: {}", event_type);
        } else {
            info!(event_type, event_data = %data, "Event: {}", event_type);
        }
    }
}

/// An event recorded by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// The event type.
    pub event_type: String,
    /// The event data.
    pub data: Option<serde_json::Value>,
}

impl RecordedEvent {
    /// Returns a string field of the event data.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}

/// A sink that keeps every event, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of exactly this type.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push(RecordedEvent {
            event_type: event_type.to_string(),
            data,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.try_emit("stage.reset", None);
        LoggingEventSink::default().try_emit("stage.reset", Some(serde_json::json!({"stage": "setup"})));
        LoggingEventSink::debug().try_emit("response.dropped", None);
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.try_emit("stage.loading", Some(serde_json::json!({"stage": "compile"})));
        sink.try_emit("stage.succeeded", Some(serde_json::json!({"stage": "compile"})));
        sink.try_emit("stage.loading", Some(serde_json::json!({"stage": "setup"})));

        assert_eq!(sink.len(), 3);
        let loading = sink.events_of_type("stage.loading");
        assert_eq!(loading.len(), 2);
        assert_eq!(loading[1].field("stage"), Some("setup"));

        sink.clear();
        assert!(sink.is_empty());
    }
}

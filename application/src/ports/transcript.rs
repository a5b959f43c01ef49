//! Transcript logger port
//!
//! Fire-and-forget structured record of meeting activity for offline
//! inspection. Logging must never fail the orchestrator path.

use serde_json::Value;

/// One transcript record.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub event_type: String,
    pub payload: Value,
}

impl TranscriptEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self { event_type: event_type.into(), payload }
    }
}

pub trait TranscriptLogger: Send + Sync {
    fn log(&self, event: TranscriptEvent);
}

/// Logger that discards everything.
pub struct NoopTranscriptLogger;

impl TranscriptLogger for NoopTranscriptLogger {
    fn log(&self, _event: TranscriptEvent) {}
}

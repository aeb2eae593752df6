//! # Pipeline Events
//!
//! Incremental progress notifications emitted while a session runs.
//! Hosts that support streaming forward these to clients; hosts that
//! do not simply skip wiring the channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Phase;

/// Kind of pipeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    /// Pipeline started
    PipelineStarted,
    /// A phase started
    PhaseStarted,
    /// A phase completed
    PhaseCompleted,
    /// The confirmation loop ran out of iterations (non-fatal)
    NegotiationExhausted,
    /// Pipeline completed
    PipelineCompleted,
    /// Pipeline failed
    PipelineFailed,
}

/// An event in a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub kind: PipelineEventKind,
    /// Phase the event belongs to, when applicable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Associated data (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(kind: PipelineEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            phase: None,
            data: None,
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::new(PipelineEventKind::PhaseStarted)
            .with_phase(Phase::Research)
            .with_data(serde_json::json!({ "questions": 3 }));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"phase_started\""));
        assert!(json.contains("\"phase\":\"research\""));
        assert!(json.contains("\"questions\":3"));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let event = PipelineEvent::new(PipelineEventKind::PipelineStarted);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("phase"));
        assert!(!json.contains("data"));
    }
}

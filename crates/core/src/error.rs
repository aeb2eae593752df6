//! # Error Taxonomy
//!
//! Failures that can escape the research core. Parse failures are
//! deliberately absent: a structured decode that fails degrades to raw
//! text inside the adapter (`StructuredResult::Unparsed`) and never
//! reaches a caller as an error.

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::Phase;

/// Failures surfaced by the research core.
#[derive(Debug, Error)]
pub enum ResearchError {
    /// Provider or network failure on a generation call. Fatal to the
    /// phase that issued it; the core never retries it.
    #[error("generation failed in {phase} phase: {source}")]
    Generation {
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    /// No qualifying human reply arrived within the configured window.
    #[error("no human reply in thread {thread_id} within {timeout:?}")]
    ReplyTimeout { thread_id: String, timeout: Duration },

    /// The enclosing operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Chat transport failure outside a poll loop (send or history
    /// lookup). Errors during polling are transient and retried.
    #[error("chat transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// A failure that was not locally recoverable, tagged with the
    /// phase it terminated. Ends the pipeline run.
    #[error("{phase} phase failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<ResearchError>,
    },
}

impl ResearchError {
    /// Wrap an error as a phase failure, unless it already is one.
    pub fn into_phase_failure(self, phase: Phase) -> Self {
        match self {
            ResearchError::Phase { .. } => self,
            other => ResearchError::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The error text of the underlying provider failure, if this is a
    /// generation error. Used for transient-error classification.
    pub fn generation_message(&self) -> Option<String> {
        match self {
            ResearchError::Generation { source, .. } => Some(source.to_string()),
            _ => None,
        }
    }
}

//! # Research Configuration
//!
//! Tunables for the pipeline, the plan-confirmation loop, and the chat
//! channel. Serde round-trippable so hosts can accept it over the API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one research pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Output language forwarded to every prompt.
    #[serde(default = "default_language")]
    pub language: String,
    /// Maximum plan-confirmation iterations before proceeding with the
    /// last plan.
    #[serde(default = "default_max_confirm_iterations")]
    pub max_confirm_iterations: u32,
    /// Seconds to wait for a human reply before signalling a timeout.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
    /// Seconds between successive polls while waiting for a reply.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Approval vocabulary scanned (case-insensitively) when a
    /// confirmation response cannot be decoded. Substring matching is
    /// deliberately loose and can false-positive across languages;
    /// tune the set per deployment.
    #[serde(default = "default_approval_keywords")]
    pub approval_keywords: Vec<String>,
    /// Error-text markers that classify a provider failure as
    /// transient, enabling the plain-prompt confirmation fallback.
    #[serde(default = "default_transient_markers")]
    pub transient_error_markers: Vec<String>,
}

fn default_language() -> String {
    "English".to_string()
}

fn default_max_confirm_iterations() -> u32 {
    10
}

fn default_reply_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_approval_keywords() -> Vec<String> {
    vec!["approved".to_string(), "承認".to_string(), "ok".to_string()]
}

fn default_transient_markers() -> Vec<String> {
    vec![
        "INTERNAL".to_string(),
        "overloaded".to_string(),
        "unavailable".to_string(),
    ]
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            max_confirm_iterations: default_max_confirm_iterations(),
            reply_timeout_secs: default_reply_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            approval_keywords: default_approval_keywords(),
            transient_error_markers: default_transient_markers(),
        }
    }
}

impl ResearchConfig {
    /// How long to wait for a human reply.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    /// Fixed delay between reply polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

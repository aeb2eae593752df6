//! # Scout Core
//!
//! The engine of the Scout deep-research system: a multi-phase LLM
//! pipeline with a human in the loop over a chat channel.
//!
//! ## Architecture
//!
//! - `generation/` - Structured invocation adapter over the completion
//!   service, plus the OpenAI-compatible backend
//! - `chat/` - Thread messaging with a blocking reply wait (Slack or
//!   in-memory transport)
//! - `negotiation` - Bounded plan-confirmation loop
//! - `pipeline/` - The orchestrator: Plan → Confirm → Research →
//!   Synthesize → Summarize → Deliver
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scout_core::generation::openai::OpenAiService;
//! use scout_core::pipeline::{Orchestrator, ResearchRequest};
//! use scout_core::ResearchConfig;
//! use std::sync::Arc;
//!
//! let service = Arc::new(OpenAiService::from_env()?);
//! let orchestrator = Orchestrator::new(service, ResearchConfig::default());
//! let report = orchestrator.run(ResearchRequest {
//!     topic: "solid state batteries".into(),
//!     language: None,
//!     purpose: None,
//!     scope: None,
//! }).await?;
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod generation;
pub mod negotiation;
pub mod pipeline;
pub mod prompts;
pub mod tools;

pub use chat::{ChatChannel, ChatTransport, ThreadMessage};
pub use config::ResearchConfig;
pub use error::ResearchError;
pub use pipeline::{Orchestrator, Phase, PipelineEvent, PipelineEventKind, ResearchReport, ResearchRequest};

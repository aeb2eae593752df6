//! # Structured Invocation Adapter
//!
//! One call to the generation service with strict structured parsing
//! and a deterministic raw-text fallback. No retries and no caching:
//! retry policy belongs to callers, and every caller of a structured
//! shape defines its own degraded behavior for `Unparsed`.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::error::ResearchError;
use crate::pipeline::Phase;
use crate::tools::ToolCapability;

use super::{GenerationRequest, GenerationService};

/// Outcome of a structured invocation.
///
/// The variant is the authority marker: only `Parsed` carries a value
/// that may be trusted as the expected shape. The raw text is retained
/// in both variants for degraded fallbacks and diagnostics.
#[derive(Debug, Clone)]
pub enum StructuredResult<T> {
    /// The response decoded into the expected shape.
    Parsed { value: T, raw: String },
    /// The response could not be decoded; the raw text stands.
    Unparsed { raw: String },
}

impl<T> StructuredResult<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, StructuredResult::Parsed { .. })
    }

    /// The raw response text, whichever way parsing went.
    pub fn raw(&self) -> &str {
        match self {
            StructuredResult::Parsed { raw, .. } => raw,
            StructuredResult::Unparsed { raw } => raw,
        }
    }

    /// The parsed value, discarding the raw text.
    pub fn into_parsed(self) -> Option<T> {
        match self {
            StructuredResult::Parsed { value, .. } => Some(value),
            StructuredResult::Unparsed { .. } => None,
        }
    }
}

/// Single-shot adapter over the generation service.
#[derive(Clone)]
pub struct StructuredCall {
    service: Arc<dyn GenerationService>,
}

impl StructuredCall {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    /// Invoke the service once, expecting output in the shape of `T`.
    ///
    /// A provider failure propagates as a generation error tagged with
    /// `phase`. A decode failure does not fail: the raw text comes
    /// back marked `Unparsed`.
    pub async fn invoke<T>(
        &self,
        phase: Phase,
        prompt: String,
        tools: Vec<Arc<dyn ToolCapability>>,
    ) -> Result<StructuredResult<T>, ResearchError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let request = GenerationRequest::structured::<T>(prompt).with_tools(tools);
        let response = self
            .service
            .generate(request)
            .await
            .map_err(|source| ResearchError::Generation { phase, source })?;

        match response.decode::<T>() {
            Ok(value) => Ok(StructuredResult::Parsed {
                value,
                raw: response.text().to_string(),
            }),
            Err(err) => {
                tracing::warn!(
                    %phase,
                    error = %err,
                    "structured decode failed, degrading to raw text"
                );
                Ok(StructuredResult::Unparsed {
                    raw: response.text().to_string(),
                })
            }
        }
    }

    /// Invoke the service once for free text, without a schema.
    pub async fn invoke_text(
        &self,
        phase: Phase,
        prompt: String,
        tools: Vec<Arc<dyn ToolCapability>>,
    ) -> Result<String, ResearchError> {
        let request = GenerationRequest::text(prompt).with_tools(tools);
        let response = self
            .service
            .generate(request)
            .await
            .map_err(|source| ResearchError::Generation { phase, source })?;
        Ok(response.text().to_string())
    }
}

//! # Generation Service Seam
//!
//! The external completion service is a collaborator, not part of the
//! core: everything here depends only on its contract. A request is an
//! opaque prompt plus an optional structured-output schema and a list
//! of tool capabilities the service may call mid-generation; a
//! response is raw text with a best-effort structured decode.

pub mod openai;
mod structured;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema, Schema};
use serde::de::DeserializeOwned;

use crate::tools::ToolCapability;

pub use structured::{StructuredCall, StructuredResult};

/// A single request to the generation service.
pub struct GenerationRequest {
    /// Fully assembled prompt. The core never inspects it.
    pub prompt: String,
    /// Expected output shape, when the caller wants structured output.
    pub output_schema: Option<Schema>,
    /// Capabilities the service may invoke before answering.
    pub tools: Vec<Arc<dyn ToolCapability>>,
}

impl GenerationRequest {
    /// A plain free-text request.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            output_schema: None,
            tools: Vec::new(),
        }
    }

    /// A request expecting output in the shape of `T`.
    pub fn structured<T: JsonSchema>(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            output_schema: Some(schema_for!(T)),
            tools: Vec::new(),
        }
    }

    /// Attach tool capabilities to the request.
    pub fn with_tools(mut self, tools: Vec<Arc<dyn ToolCapability>>) -> Self {
        self.tools = tools;
        self
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("prompt_len", &self.prompt.len())
            .field("structured", &self.output_schema.is_some())
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Raw response text plus a best-effort structured decode.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    text: String,
}

impl GenerationResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The raw text of the response.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Best-effort decode into `T`.
    ///
    /// Services are not guaranteed to honor structured-output requests,
    /// so this tries the whole text, then a fenced code block, then the
    /// outermost brace-delimited slice. Deterministic for a given text.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let trimmed = self.text.trim();
        let first_err = match serde_json::from_str(trimmed) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        for candidate in [fenced_block(trimmed), brace_slice(trimmed)]
            .into_iter()
            .flatten()
        {
            if let Ok(value) = serde_json::from_str(candidate) {
                return Ok(value);
            }
        }

        Err(first_err)
    }
}

/// The contents of the first ``` fence, if any.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')?;
    let body = &after_fence[body_start + 1..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// The slice from the first `{` through the last `}`, if any.
fn brace_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Contract consumed by the structured invocation adapter.
///
/// Implementations wrap a concrete provider. A returned error means
/// the call itself failed (network, provider); a malformed body is not
/// an error here, it is raw text the caller may still use.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        approved: bool,
    }

    #[test]
    fn test_decode_plain_json() {
        let response = GenerationResponse::new(r#"{"approved": true}"#);
        let verdict: Verdict = response.decode().unwrap();
        assert!(verdict.approved);
    }

    #[test]
    fn test_decode_fenced_json() {
        let response =
            GenerationResponse::new("Here you go:\n```json\n{\"approved\": false}\n```\nDone.");
        let verdict: Verdict = response.decode().unwrap();
        assert!(!verdict.approved);
    }

    #[test]
    fn test_decode_prose_wrapped_json() {
        let response = GenerationResponse::new("I think {\"approved\": true} covers it.");
        let verdict: Verdict = response.decode().unwrap();
        assert!(verdict.approved);
    }

    #[test]
    fn test_decode_failure_keeps_raw_text() {
        let response = GenerationResponse::new("The plan looks fine to me.");
        assert!(response.decode::<Verdict>().is_err());
        assert_eq!(response.text(), "The plan looks fine to me.");
    }

    #[test]
    fn test_decode_prefers_the_fenced_block() {
        let text = "```json\n{\"approved\": true}\n```\ntrailing {\"approved\": false}";
        let first: Verdict = GenerationResponse::new(text).decode().unwrap();
        let second: Verdict = GenerationResponse::new(text).decode().unwrap();
        assert!(first.approved);
        assert_eq!(first, second);
    }
}

//! # Plan Confirmation Negotiation
//!
//! Bounded iterative loop that drives plan approval with the human.
//! Each iteration asks the generation service to present the current
//! plan for review (the ask-human tool is attached when a chat channel
//! is configured) and expects an `{approved, revised_plan}` verdict.
//! Every failure mode has a defined degradation: transient provider
//! errors fall back to a plain-text prompt, undecodable responses fall
//! back to keyword matching, and an exhausted budget proceeds with the
//! last plan rather than aborting.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ResearchConfig;
use crate::error::ResearchError;
use crate::generation::{StructuredCall, StructuredResult};
use crate::pipeline::Phase;
use crate::prompts;
use crate::tools::ToolCapability;

/// Structured verdict expected from a confirmation call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanReview {
    /// Whether the human approved the current plan as-is.
    pub approved: bool,
    /// Full replacement plan text when not approved.
    #[serde(default)]
    pub revised_plan: String,
}

/// Terminal outcome of a negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// The plan was approved.
    Approved { plan: String, iterations: u32 },
    /// Degraded ending: a transient provider failure forced the
    /// plain-text fallback, and its response is the plan. Not an
    /// approval; the pipeline proceeds with it anyway.
    Revised { plan: String, iterations: u32 },
    /// The iteration budget ran out. Proceed with the last plan.
    Exhausted { plan: String, iterations: u32 },
}

impl NegotiationOutcome {
    pub fn plan(&self) -> &str {
        match self {
            NegotiationOutcome::Approved { plan, .. }
            | NegotiationOutcome::Revised { plan, .. }
            | NegotiationOutcome::Exhausted { plan, .. } => plan,
        }
    }

    pub fn into_plan(self) -> String {
        match self {
            NegotiationOutcome::Approved { plan, .. }
            | NegotiationOutcome::Revised { plan, .. }
            | NegotiationOutcome::Exhausted { plan, .. } => plan,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, NegotiationOutcome::Approved { .. })
    }
}

/// Mutable loop state. Owned by one `confirm` call, never shared.
#[derive(Debug)]
struct NegotiationState {
    plan: String,
    iteration: u32,
}

/// Drives the bounded plan-approval loop.
pub struct Negotiator {
    call: StructuredCall,
    config: ResearchConfig,
    tools: Vec<Arc<dyn ToolCapability>>,
}

impl Negotiator {
    pub fn new(call: StructuredCall, config: ResearchConfig) -> Self {
        Self {
            call,
            config,
            tools: Vec::new(),
        }
    }

    /// Attach tool capabilities (ask-human, thread history) to each
    /// review call.
    pub fn with_tools(mut self, tools: Vec<Arc<dyn ToolCapability>>) -> Self {
        self.tools = tools;
        self
    }

    /// Negotiate approval for `initial_plan`.
    ///
    /// Terminates in at most `max_confirm_iterations` iterations with
    /// one of the three outcomes; never returns an error for parse
    /// failures or budget exhaustion.
    pub async fn confirm(&self, initial_plan: &str) -> Result<NegotiationOutcome, ResearchError> {
        let mut state = NegotiationState {
            plan: initial_plan.to_string(),
            iteration: 0,
        };

        while state.iteration < self.config.max_confirm_iterations {
            let first = state.iteration == 0;
            state.iteration += 1;

            let prompt =
                prompts::plan_confirmation_prompt(&state.plan, first, &self.config.language);
            let review = match self
                .call
                .invoke::<PlanReview>(Phase::Confirmation, prompt, self.tools.clone())
                .await
            {
                Ok(review) => review,
                Err(err) if self.is_transient(&err) => {
                    tracing::warn!(
                        iteration = state.iteration,
                        error = %err,
                        "transient provider failure, degrading to a plain prompt"
                    );
                    let plan = self
                        .call
                        .invoke_text(
                            Phase::Confirmation,
                            prompts::plan_confirmation_fallback_prompt(&state.plan),
                            Vec::new(),
                        )
                        .await?;
                    return Ok(NegotiationOutcome::Revised {
                        plan,
                        iterations: state.iteration,
                    });
                }
                Err(err) => return Err(err),
            };

            match review {
                StructuredResult::Parsed { value, raw } => {
                    if value.approved {
                        return Ok(NegotiationOutcome::Approved {
                            plan: state.plan,
                            iterations: state.iteration,
                        });
                    }
                    if !value.revised_plan.is_empty() {
                        state.plan = value.revised_plan;
                    } else if !raw.trim().is_empty() {
                        // No-op verdict: nothing was revised, so the
                        // response text itself becomes the plan.
                        state.plan = raw;
                    }
                }
                StructuredResult::Unparsed { raw } => {
                    if self.matches_approval(&raw) {
                        tracing::info!(
                            iteration = state.iteration,
                            "approval keyword matched in undecodable response"
                        );
                        return Ok(NegotiationOutcome::Approved {
                            plan: state.plan,
                            iterations: state.iteration,
                        });
                    }
                    if !raw.trim().is_empty() {
                        state.plan = raw;
                    }
                }
            }
        }

        tracing::warn!(
            iterations = state.iteration,
            "confirmation budget exhausted, proceeding with the last plan"
        );
        Ok(NegotiationOutcome::Exhausted {
            plan: state.plan,
            iterations: state.iteration,
        })
    }

    fn matches_approval(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.config
            .approval_keywords
            .iter()
            .any(|keyword| lower.contains(&keyword.to_lowercase()))
    }

    fn is_transient(&self, err: &ResearchError) -> bool {
        let Some(message) = err.generation_message() else {
            return false;
        };
        let lower = message.to_lowercase();
        self.config
            .transient_error_markers
            .iter()
            .any(|marker| lower.contains(&marker.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationRequest, GenerationResponse, GenerationService};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Generation service that replays scripted responses; an `Err`
    /// entry simulates a provider failure with that message.
    struct ScriptedService {
        script: Mutex<Vec<Result<String, String>>>,
        calls: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedService {
        fn new(script: Vec<Result<String, String>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedService {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> anyhow::Result<GenerationResponse> {
            let next = {
                let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
                if script.is_empty() {
                    anyhow::bail!("script exhausted");
                }
                script.remove(0)
            };
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(request);
            match next {
                Ok(text) => Ok(GenerationResponse::new(text)),
                Err(message) => anyhow::bail!(message),
            }
        }
    }

    fn negotiator(script: Vec<Result<String, String>>) -> (Negotiator, Arc<ScriptedService>) {
        let service = Arc::new(ScriptedService::new(script));
        let call = StructuredCall::new(service.clone());
        (
            Negotiator::new(call, ResearchConfig::default()),
            service,
        )
    }

    fn reject(revised: &str) -> Result<String, String> {
        Ok(format!(
            r#"{{"approved": false, "revised_plan": "{revised}"}}"#
        ))
    }

    fn approve() -> Result<String, String> {
        Ok(r#"{"approved": true, "revised_plan": ""}"#.to_string())
    }

    #[tokio::test]
    async fn test_revision_then_approval_keeps_the_revised_plan() {
        let (negotiator, _) = negotiator(vec![reject("v2"), approve()]);
        let outcome = negotiator.confirm("v1").await.unwrap();
        assert_eq!(
            outcome,
            NegotiationOutcome::Approved {
                plan: "v2".to_string(),
                iterations: 2
            }
        );
    }

    #[tokio::test]
    async fn test_immediate_approval_keeps_the_initial_plan() {
        let (negotiator, _) = negotiator(vec![approve()]);
        let outcome = negotiator.confirm("the plan").await.unwrap();
        assert_eq!(outcome.plan(), "the plan");
        assert!(outcome.is_approved());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_the_last_plan() {
        let script = std::iter::repeat_with(|| reject("same")).take(11).collect();
        let (negotiator, service) = negotiator(script);

        let outcome = negotiator.confirm("original").await.unwrap();
        assert_eq!(
            outcome,
            NegotiationOutcome::Exhausted {
                plan: "same".to_string(),
                iterations: 10
            }
        );
        // The budget, not the script, bounds the loop.
        let calls = service.calls.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(calls.len(), 10);
    }

    #[tokio::test]
    async fn test_keyword_fallback_approves_undecodable_text() {
        let (negotiator, _) = negotiator(vec![Ok("Sounds great, APPROVED!".to_string())]);
        let outcome = negotiator.confirm("keep me").await.unwrap();
        assert_eq!(outcome.plan(), "keep me");
        assert!(outcome.is_approved());
    }

    #[tokio::test]
    async fn test_undecodable_text_without_approval_becomes_the_plan() {
        let (negotiator, _) = negotiator(vec![
            Ok("Please add a section on cost tradeoffs".to_string()),
            approve(),
        ]);
        let outcome = negotiator.confirm("v1").await.unwrap();
        assert_eq!(outcome.plan(), "Please add a section on cost tradeoffs");
    }

    #[tokio::test]
    async fn test_transient_failure_degrades_to_plain_prompt() {
        let (negotiator, service) = negotiator(vec![
            Err("provider INTERNAL error".to_string()),
            Ok("fallback plan text".to_string()),
        ]);
        let outcome = negotiator.confirm("v1").await.unwrap();
        assert_eq!(
            outcome,
            NegotiationOutcome::Revised {
                plan: "fallback plan text".to_string(),
                iterations: 1
            }
        );

        // The fallback call carries neither schema nor tools.
        let calls = service.calls.lock().unwrap_or_else(|e| e.into_inner());
        let fallback = calls.last().unwrap();
        assert!(fallback.output_schema.is_none());
        assert!(fallback.tools.is_empty());
    }

    #[tokio::test]
    async fn test_non_transient_failure_propagates() {
        let (negotiator, _) = negotiator(vec![Err("invalid api key".to_string())]);
        let err = negotiator.confirm("v1").await.unwrap_err();
        assert!(matches!(err, ResearchError::Generation { .. }));
    }
}

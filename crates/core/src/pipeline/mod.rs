//! # Pipeline Orchestrator
//!
//! Sequences one research session through its fixed phases:
//! Plan → Confirm → Research → Synthesize → Summarize → Deliver.
//! Phases run strictly in order and are never retried here; each
//! phase's adapter or negotiator already defines its own degradation.
//! The first failure that is not locally recoverable aborts the run
//! with a phase-tagged error.

pub mod events;
pub mod outputs;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatChannel;
use crate::config::ResearchConfig;
use crate::error::ResearchError;
use crate::generation::{GenerationService, StructuredCall, StructuredResult};
use crate::negotiation::{NegotiationOutcome, Negotiator};
use crate::prompts;
use crate::tools::{AskHumanTool, ThreadHistoryTool, ToolCapability};

pub use events::{PipelineEvent, PipelineEventKind};
pub use outputs::{
    ChapterDraft, ChapterOutline, QuestionFindings, ResearchPlanOutline, SummaryOutput,
    SynthesisOutput,
};

/// One discrete step of the research pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Confirmation,
    Research,
    Synthesis,
    Summary,
    Delivery,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Planning => "planning",
            Phase::Confirmation => "confirmation",
            Phase::Research => "research",
            Phase::Synthesis => "synthesis",
            Phase::Summary => "summary",
            Phase::Delivery => "delivery",
        };
        f.write_str(name)
    }
}

/// Input accepted by the pipeline entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    /// Topic to research.
    pub topic: String,
    /// Output language; falls back to the configured default.
    #[serde(default)]
    pub language: Option<String>,
    /// Purpose or intended use of the research.
    #[serde(default)]
    pub purpose: Option<String>,
    /// Scope of the investigation.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Final result returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub topic: String,
    pub research_plan: String,
    pub key_questions: Vec<String>,
    pub detailed_report: String,
    pub sources: Vec<String>,
    pub summary: String,
    pub recommendations: String,
}

/// Per-run mutable state. Created at pipeline start, mutated as each
/// phase completes, discarded when the run returns.
#[derive(Debug)]
struct ResearchSession {
    topic: String,
    language: String,
    phase: Phase,
    plan: String,
    key_questions: Vec<String>,
    findings: Vec<String>,
    sources: Vec<String>,
    report: String,
    summary: String,
    recommendations: String,
}

impl ResearchSession {
    fn new(topic: String, language: String) -> Self {
        Self {
            topic,
            language,
            phase: Phase::Planning,
            plan: String::new(),
            key_questions: Vec::new(),
            findings: Vec::new(),
            sources: Vec::new(),
            report: String::new(),
            summary: String::new(),
            recommendations: String::new(),
        }
    }
}

/// Generic questions substituted when planning yields none, so the
/// research phase is never given an empty question set.
fn fallback_questions(topic: &str) -> Vec<String> {
    vec![
        format!("Latest developments in {topic}"),
        format!("Current challenges and open problems in {topic}"),
        format!("Future outlook for {topic}"),
    ]
}

/// The pipeline orchestrator. One instance may run many sessions, but
/// each `run` call owns its session exclusively.
pub struct Orchestrator {
    call: StructuredCall,
    config: ResearchConfig,
    chat: Option<ChatChannel>,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(service: Arc<dyn GenerationService>, config: ResearchConfig) -> Self {
        Self {
            call: StructuredCall::new(service),
            config,
            chat: None,
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a chat channel; the ask-human and thread-history tools
    /// become available to the planning, confirmation, and delivery
    /// calls.
    pub fn with_chat_channel(mut self, channel: ChatChannel) -> Self {
        self.chat = Some(channel);
        self
    }

    /// Stream progress events to the host.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Cancellation signal governing the whole run, including any
    /// in-flight reply wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn tools(&self) -> Vec<Arc<dyn ToolCapability>> {
        match &self.chat {
            Some(chat) => vec![
                Arc::new(AskHumanTool::new(
                    chat.clone(),
                    self.config.reply_timeout(),
                    self.cancel.clone(),
                )),
                Arc::new(ThreadHistoryTool::new(chat.clone())),
            ],
            None => Vec::new(),
        }
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    fn ensure_live(&self) -> Result<(), ResearchError> {
        if self.cancel.is_cancelled() {
            Err(ResearchError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn begin_phase(
        &self,
        session: &mut ResearchSession,
        phase: Phase,
    ) -> Result<(), ResearchError> {
        self.ensure_live()?;
        session.phase = phase;
        tracing::info!(%phase, "phase started");
        self.emit(PipelineEvent::new(PipelineEventKind::PhaseStarted).with_phase(phase))
            .await;
        Ok(())
    }

    async fn complete_phase(&self, phase: Phase, data: serde_json::Value) {
        tracing::info!(%phase, "phase completed");
        self.emit(
            PipelineEvent::new(PipelineEventKind::PhaseCompleted)
                .with_phase(phase)
                .with_data(data),
        )
        .await;
    }

    /// Run one research session to completion.
    #[tracing::instrument(skip(self, request), fields(topic = %request.topic))]
    pub async fn run(&self, request: ResearchRequest) -> Result<ResearchReport, ResearchError> {
        self.emit(
            PipelineEvent::new(PipelineEventKind::PipelineStarted)
                .with_data(json!({ "topic": request.topic })),
        )
        .await;

        match self.run_inner(&request).await {
            Ok(report) => {
                self.emit(
                    PipelineEvent::new(PipelineEventKind::PipelineCompleted)
                        .with_data(json!({ "sources": report.sources.len() })),
                )
                .await;
                Ok(report)
            }
            Err(err) => {
                self.emit(
                    PipelineEvent::new(PipelineEventKind::PipelineFailed)
                        .with_data(json!({ "error": err.to_string() })),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn run_inner(&self, request: &ResearchRequest) -> Result<ResearchReport, ResearchError> {
        let language = request
            .language
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.config.language.clone());
        let mut session = ResearchSession::new(request.topic.clone(), language);
        let tools = self.tools();

        // Planning
        self.begin_phase(&mut session, Phase::Planning).await?;
        let prompt = prompts::planning_prompt(
            &session.topic,
            request.purpose.as_deref(),
            request.scope.as_deref(),
            &session.language,
        );
        let outline = match self
            .call
            .invoke::<ResearchPlanOutline>(Phase::Planning, prompt, tools.clone())
            .await
            .map_err(|e| e.into_phase_failure(Phase::Planning))?
        {
            StructuredResult::Parsed { value, .. } => {
                session.plan = value.plan_text();
                session.key_questions = value.key_questions.clone();
                Some(value)
            }
            StructuredResult::Unparsed { raw } => {
                tracing::warn!("planning output undecodable, raw text becomes the plan");
                session.plan = raw;
                None
            }
        };
        self.complete_phase(
            Phase::Planning,
            json!({ "key_questions": session.key_questions.len() }),
        )
        .await;

        // Confirmation
        self.begin_phase(&mut session, Phase::Confirmation).await?;
        let negotiator =
            Negotiator::new(self.call.clone(), self.config.clone()).with_tools(tools.clone());
        let outcome = negotiator
            .confirm(&session.plan)
            .await
            .map_err(|e| e.into_phase_failure(Phase::Confirmation))?;
        if let NegotiationOutcome::Exhausted { iterations, .. } = &outcome {
            self.emit(
                PipelineEvent::new(PipelineEventKind::NegotiationExhausted)
                    .with_phase(Phase::Confirmation)
                    .with_data(json!({ "iterations": iterations })),
            )
            .await;
        }
        let approved = outcome.is_approved();
        session.plan = outcome.into_plan();
        self.complete_phase(Phase::Confirmation, json!({ "approved": approved }))
            .await;

        if session.key_questions.is_empty() {
            tracing::warn!(topic = %session.topic, "no key questions planned, using generic fallbacks");
            session.key_questions = fallback_questions(&session.topic);
        }

        // Research, one question at a time, input order preserved
        self.begin_phase(&mut session, Phase::Research).await?;
        for question in session.key_questions.clone() {
            self.ensure_live()?;
            let prompt = prompts::research_prompt(&question, &session.language);
            match self
                .call
                .invoke::<QuestionFindings>(Phase::Research, prompt, Vec::new())
                .await
                .map_err(|e| e.into_phase_failure(Phase::Research))?
            {
                StructuredResult::Parsed { value, .. } => {
                    session.findings.push(value.formatted(&question));
                    session.sources.extend(value.source_urls.iter().cloned());
                }
                StructuredResult::Unparsed { raw } => {
                    session.findings.push(format!("[{question}]\n{raw}"));
                    session.sources.push(format!("Search results for: {question}"));
                }
            }
        }
        self.complete_phase(
            Phase::Research,
            json!({
                "questions": session.key_questions.len(),
                "sources": session.sources.len()
            }),
        )
        .await;

        // Synthesis
        self.begin_phase(&mut session, Phase::Synthesis).await?;
        let chapter_structure = outline
            .as_ref()
            .map(|o| o.chapter_structure_text())
            .unwrap_or_default();
        let prompt = prompts::synthesis_prompt(
            &session.topic,
            &session.plan,
            &chapter_structure,
            &session.findings.join("\n\n"),
            &session.language,
        );
        session.report = match self
            .call
            .invoke::<SynthesisOutput>(Phase::Synthesis, prompt, Vec::new())
            .await
            .map_err(|e| e.into_phase_failure(Phase::Synthesis))?
        {
            StructuredResult::Parsed { value, .. } => value.render(),
            StructuredResult::Unparsed { raw } => raw,
        };
        self.complete_phase(Phase::Synthesis, json!({})).await;

        // Summary
        self.begin_phase(&mut session, Phase::Summary).await?;
        let prompt = prompts::summary_prompt(&session.report, &session.language);
        match self
            .call
            .invoke::<SummaryOutput>(Phase::Summary, prompt, Vec::new())
            .await
            .map_err(|e| e.into_phase_failure(Phase::Summary))?
        {
            StructuredResult::Parsed { value, .. } => {
                session.summary = value.render();
                session.recommendations = value.recommendations_text();
            }
            StructuredResult::Unparsed { raw } => {
                session.summary = raw.clone();
                session.recommendations = raw;
            }
        }
        self.complete_phase(Phase::Summary, json!({})).await;

        // Delivery
        self.begin_phase(&mut session, Phase::Delivery).await?;
        let prompt = prompts::report_delivery_prompt(
            &session.topic,
            &session.report,
            &session.summary,
            &session.recommendations,
            &session.language,
        );
        self.call
            .invoke_text(Phase::Delivery, prompt, tools)
            .await
            .map_err(|e| e.into_phase_failure(Phase::Delivery))?;
        self.complete_phase(Phase::Delivery, json!({})).await;

        Ok(ResearchReport {
            topic: session.topic,
            research_plan: session.plan,
            key_questions: session.key_questions,
            detailed_report: session.report,
            sources: session.sources,
            summary: session.summary,
            recommendations: session.recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationRequest, GenerationResponse};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of responses, one per generation call.
    struct SequenceService {
        responses: Mutex<VecDeque<Result<String, String>>>,
    }

    impl SequenceService {
        fn new(responses: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl GenerationService for SequenceService {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> anyhow::Result<GenerationResponse> {
            let next = self
                .responses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match next {
                Some(Ok(text)) => Ok(GenerationResponse::new(text)),
                Some(Err(message)) => anyhow::bail!(message),
                None => anyhow::bail!("no scripted response left"),
            }
        }
    }

    fn planning_with_questions(questions: &[&str]) -> Result<String, String> {
        Ok(json!({
            "key_questions": questions,
            "research_approach": "literature review",
            "scope": "recent work",
            "objectives": "understand the field",
            "chapter_structure": [
                { "title": "Background", "description": "context", "importance": "high" }
            ]
        })
        .to_string())
    }

    fn approve() -> Result<String, String> {
        Ok(r#"{"approved": true, "revised_plan": ""}"#.to_string())
    }

    fn findings(urls: &[&str]) -> Result<String, String> {
        Ok(json!({
            "findings": "solid results",
            "data": "n=42",
            "expert_opinions": "optimistic",
            "source_urls": urls
        })
        .to_string())
    }

    fn synthesis() -> Result<String, String> {
        Ok(json!({
            "chapters": [
                { "title": "Background", "content": "the field", "importance": "high" }
            ],
            "structure_changes": ""
        })
        .to_string())
    }

    fn summary() -> Result<String, String> {
        Ok(json!({
            "key_points": ["point one"],
            "recommendations": ["do more research"]
        })
        .to_string())
    }

    fn delivery() -> Result<String, String> {
        Ok("Delivered.".to_string())
    }

    #[tokio::test]
    async fn test_full_run_preserves_question_order() {
        let service = SequenceService::new(vec![
            planning_with_questions(&["q-one", "q-two"]),
            approve(),
            findings(&["https://a.example"]),
            findings(&["https://b.example"]),
            synthesis(),
            summary(),
            delivery(),
        ]);
        let orchestrator = Orchestrator::new(service, ResearchConfig::default());

        let report = orchestrator
            .run(ResearchRequest {
                topic: "solid state batteries".to_string(),
                language: None,
                purpose: None,
                scope: None,
            })
            .await
            .unwrap();

        assert_eq!(report.key_questions, vec!["q-one", "q-two"]);
        assert!(report.detailed_report.starts_with("1. Background"));
        assert_eq!(report.sources, vec!["https://a.example", "https://b.example"]);
        assert!(report.summary.contains("point one"));
        assert_eq!(report.recommendations, "do more research");
        assert!(report.detailed_report.contains("the field"));
    }

    #[tokio::test]
    async fn test_zero_questions_get_three_deterministic_fallbacks() {
        let service = SequenceService::new(vec![
            Ok("{}".to_string()), // parses, but yields no questions
            approve(),
            findings(&[]),
            findings(&[]),
            findings(&[]),
            synthesis(),
            summary(),
            delivery(),
        ]);
        let orchestrator = Orchestrator::new(service, ResearchConfig::default());

        let report = orchestrator
            .run(ResearchRequest {
                topic: "quantum batteries".to_string(),
                language: None,
                purpose: None,
                scope: None,
            })
            .await
            .unwrap();

        assert_eq!(
            report.key_questions,
            vec![
                "Latest developments in quantum batteries",
                "Current challenges and open problems in quantum batteries",
                "Future outlook for quantum batteries",
            ]
        );
    }

    #[tokio::test]
    async fn test_research_decode_failure_contributes_a_placeholder() {
        let service = SequenceService::new(vec![
            planning_with_questions(&["the question"]),
            approve(),
            Ok("plain prose, not JSON".to_string()),
            synthesis(),
            summary(),
            delivery(),
        ]);
        let orchestrator = Orchestrator::new(service, ResearchConfig::default());

        let report = orchestrator
            .run(ResearchRequest {
                topic: "anything".to_string(),
                language: None,
                purpose: None,
                scope: None,
            })
            .await
            .unwrap();

        assert_eq!(report.sources, vec!["Search results for: the question"]);
    }

    #[tokio::test]
    async fn test_synthesis_decode_failure_uses_raw_text_verbatim() {
        let service = SequenceService::new(vec![
            planning_with_questions(&["q"]),
            approve(),
            findings(&[]),
            Ok("A report written as prose.".to_string()),
            summary(),
            delivery(),
        ]);
        let orchestrator = Orchestrator::new(service, ResearchConfig::default());

        let report = orchestrator
            .run(ResearchRequest {
                topic: "anything".to_string(),
                language: None,
                purpose: None,
                scope: None,
            })
            .await
            .unwrap();

        assert_eq!(report.detailed_report, "A report written as prose.");
    }

    #[tokio::test]
    async fn test_hard_failure_is_tagged_with_the_failing_phase() {
        let service = SequenceService::new(vec![
            planning_with_questions(&["q"]),
            approve(),
            Err("connection refused".to_string()),
        ]);
        let orchestrator = Orchestrator::new(service, ResearchConfig::default());

        let err = orchestrator
            .run(ResearchRequest {
                topic: "anything".to_string(),
                language: None,
                purpose: None,
                scope: None,
            })
            .await
            .unwrap_err();

        match err {
            ResearchError::Phase { phase, .. } => assert_eq!(phase, Phase::Research),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let service = SequenceService::new(vec![
            planning_with_questions(&["q"]),
            approve(),
            findings(&[]),
            synthesis(),
            summary(),
            delivery(),
        ]);
        let (tx, mut rx) = mpsc::channel(64);
        let orchestrator =
            Orchestrator::new(service, ResearchConfig::default()).with_event_channel(tx);

        orchestrator
            .run(ResearchRequest {
                topic: "anything".to_string(),
                language: None,
                purpose: None,
                scope: None,
            })
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.first(), Some(&PipelineEventKind::PipelineStarted));
        assert_eq!(kinds.last(), Some(&PipelineEventKind::PipelineCompleted));
        let completed = kinds
            .iter()
            .filter(|k| **k == PipelineEventKind::PhaseCompleted)
            .count();
        assert_eq!(completed, 6);
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_never_starts_a_phase() {
        let service = SequenceService::new(vec![planning_with_questions(&["q"])]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator =
            Orchestrator::new(service, ResearchConfig::default()).with_cancellation(cancel);

        let err = orchestrator
            .run(ResearchRequest {
                topic: "anything".to_string(),
                language: None,
                purpose: None,
                scope: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled));
    }

    #[test]
    fn test_fallback_questions_are_deterministic() {
        let first = fallback_questions("fusion power");
        let second = fallback_questions("fusion power");
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|q| q.contains("fusion power")));
    }
}

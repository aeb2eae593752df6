//! Scout Server
//!
//! Axum server exposing the deep-research pipeline: start a session,
//! stream its progress over SSE, and read or answer the chat threads
//! the pipeline opens. Also runs as a one-shot CLI without the server.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream};
use scout_core::chat::memory::InMemoryTransport;
use scout_core::chat::slack::SlackTransport;
use scout_core::chat::{ChatChannel, ChatTransport, ThreadMessage};
use scout_core::generation::openai::OpenAiService;
use scout_core::pipeline::{Orchestrator, PipelineEvent, ResearchReport, ResearchRequest};
use scout_core::ResearchConfig;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use utoipa::{OpenApi, ToSchema};

/// Application state
struct AppState {
    research_status: RwLock<ResearchStatus>,
    event_tx: broadcast::Sender<PipelineEvent>,
    chat: ChatChannel,
    /// Present only with the in-memory transport; lets the reply route
    /// inject human messages during local runs.
    memory_transport: Option<Arc<InMemoryTransport>>,
    config: ResearchConfig,
    active_run: RwLock<Option<ActiveRun>>,
    run_counter: AtomicU64,
}

/// The run currently holding the single-run slot. The id ties the
/// cancellation token to one specific run so a finished run can never
/// release a successor's token.
struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

type SharedState = Arc<AppState>;

/// Drop the active-run slot, but only if `run_id` still owns it.
async fn release_active_run(state: &SharedState, run_id: u64) {
    let mut active = state.active_run.write().await;
    if active.as_ref().is_some_and(|run| run.id == run_id) {
        *active = None;
    }
}

#[derive(Default, Clone, Serialize, ToSchema)]
struct ResearchStatus {
    status: String,
    topic: Option<String>,
    report: Option<ResearchReportBody>,
}

#[derive(Clone, Serialize, ToSchema)]
struct ResearchReportBody {
    topic: String,
    research_plan: String,
    key_questions: Vec<String>,
    detailed_report: String,
    sources: Vec<String>,
    summary: String,
    recommendations: String,
}

impl From<ResearchReport> for ResearchReportBody {
    fn from(report: ResearchReport) -> Self {
        Self {
            topic: report.topic,
            research_plan: report.research_plan,
            key_questions: report.key_questions,
            detailed_report: report.detailed_report,
            sources: report.sources,
            summary: report.summary,
            recommendations: report.recommendations,
        }
    }
}

// === API Types ===

#[derive(Deserialize, ToSchema)]
struct StartResearchRequest {
    topic: String,
    language: Option<String>,
    purpose: Option<String>,
    scope: Option<String>,
}

#[derive(Serialize, ToSchema)]
struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(Serialize, ToSchema)]
struct ThreadResponse {
    thread_id: String,
    messages: Vec<ThreadMessageBody>,
}

#[derive(Serialize, ToSchema)]
struct ThreadMessageBody {
    text: String,
    from_automation: bool,
}

impl From<ThreadMessage> for ThreadMessageBody {
    fn from(message: ThreadMessage) -> Self {
        Self {
            text: message.text,
            from_automation: message.from_automation,
        }
    }
}

#[derive(Deserialize, ToSchema)]
struct ThreadReplyRequest {
    text: String,
}

#[derive(Parser, Clone)]
#[command(author, version, about = "Scout - Deep research with a human in the loop")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Scout server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Research a topic once and print the report (no server)
    Run {
        /// The topic to research
        topic: String,
        /// Output language
        #[arg(long)]
        language: Option<String>,
        /// Purpose of the research
        #[arg(long)]
        purpose: Option<String>,
        /// Scope of the research
        #[arg(long)]
        scope: Option<String>,
    },
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scout API",
        version = "1.0.0",
        description = "API for the Scout deep-research pipeline"
    ),
    paths(get_status, start_research, cancel_research, get_thread, reply_to_thread),
    components(schemas(
        ResearchStatus,
        ResearchReportBody,
        StartResearchRequest,
        ApiResponse,
        ThreadResponse,
        ThreadMessageBody,
        ThreadReplyRequest
    )),
    tags(
        (name = "research", description = "Research session management"),
        (name = "threads", description = "Human-in-the-loop chat threads")
    )
)]
struct ApiDoc;

// === API Handlers ===

/// Get the current research status
#[utoipa::path(
    get,
    path = "/api/research/status",
    tag = "research",
    responses(
        (status = 200, description = "Current research status", body = ResearchStatus)
    )
)]
async fn get_status(State(state): State<SharedState>) -> Json<ResearchStatus> {
    let status = state.research_status.read().await;
    Json(status.clone())
}

/// Start a research session
#[utoipa::path(
    post,
    path = "/api/research",
    tag = "research",
    request_body = StartResearchRequest,
    responses(
        (status = 200, description = "Research started", body = ApiResponse)
    )
)]
async fn start_research(
    State(state): State<SharedState>,
    Json(req): Json<StartResearchRequest>,
) -> Json<ApiResponse> {
    let service = match OpenAiService::from_env() {
        Ok(service) => Arc::new(service),
        Err(e) => {
            return Json(ApiResponse {
                success: false,
                message: format!("Generation service not configured: {e}"),
            });
        }
    };

    // Single-run guard: check and claim under one write lock, so two
    // concurrent starts cannot both pass.
    {
        let mut status = state.research_status.write().await;
        if status.status == "running" {
            return Json(ApiResponse {
                success: false,
                message: "A research session is already running".to_string(),
            });
        }
        status.status = "running".to_string();
        status.topic = Some(req.topic.clone());
        status.report = None;
    }

    let run_id = state.run_counter.fetch_add(1, Ordering::SeqCst);
    let cancel = CancellationToken::new();
    *state.active_run.write().await = Some(ActiveRun {
        id: run_id,
        cancel: cancel.clone(),
    });

    // Bridge pipeline events to the broadcast channel backing SSE.
    let (event_mpsc_tx, mut event_mpsc_rx) = mpsc::channel::<PipelineEvent>(100);
    let broadcast_tx = state.event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = event_mpsc_rx.recv().await {
            let _ = broadcast_tx.send(event);
        }
    });

    let orchestrator = Orchestrator::new(service, state.config.clone())
        .with_chat_channel(state.chat.clone())
        .with_event_channel(event_mpsc_tx)
        .with_cancellation(cancel);

    let request = ResearchRequest {
        topic: req.topic.clone(),
        language: req.language,
        purpose: req.purpose,
        scope: req.scope,
    };

    let state_clone = state.clone();
    tokio::spawn(async move {
        match orchestrator.run(request).await {
            Ok(report) => {
                tracing::info!(topic = %report.topic, "research completed");
                let mut status = state_clone.research_status.write().await;
                status.status = "complete".to_string();
                status.report = Some(report.into());
            }
            Err(e) => {
                tracing::error!(error = %e, "research failed");
                let mut status = state_clone.research_status.write().await;
                status.status = "failed".to_string();
            }
        }
        release_active_run(&state_clone, run_id).await;
    });

    Json(ApiResponse {
        success: true,
        message: format!("Research started: {}", req.topic),
    })
}

/// Cancel the running research session
#[utoipa::path(
    post,
    path = "/api/research/cancel",
    tag = "research",
    responses(
        (status = 200, description = "Cancellation requested", body = ApiResponse)
    )
)]
async fn cancel_research(State(state): State<SharedState>) -> Json<ApiResponse> {
    match state.active_run.read().await.as_ref() {
        Some(run) => {
            run.cancel.cancel();
            Json(ApiResponse {
                success: true,
                message: "Cancellation requested".to_string(),
            })
        }
        None => Json(ApiResponse {
            success: false,
            message: "No research session is running".to_string(),
        }),
    }
}

/// Get the history of a chat thread
#[utoipa::path(
    get,
    path = "/api/threads/{id}",
    tag = "threads",
    params(("id" = String, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread history", body = ThreadResponse)
    )
)]
async fn get_thread(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<ThreadResponse> {
    let messages = match state.chat.get_thread_history(&id).await {
        Ok(messages) => messages.into_iter().map(Into::into).collect(),
        Err(e) => {
            tracing::warn!(thread_id = %id, error = %e, "thread listing failed");
            Vec::new()
        }
    };
    Json(ThreadResponse {
        thread_id: id,
        messages,
    })
}

/// Post a human reply into a thread (in-memory transport only; Slack
/// replies arrive through Slack itself)
#[utoipa::path(
    post,
    path = "/api/threads/{id}/reply",
    tag = "threads",
    params(("id" = String, Path, description = "Thread id")),
    request_body = ThreadReplyRequest,
    responses(
        (status = 200, description = "Reply result", body = ApiResponse)
    )
)]
async fn reply_to_thread(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ThreadReplyRequest>,
) -> Json<ApiResponse> {
    match &state.memory_transport {
        Some(transport) => {
            transport.push_human_reply(&id, &req.text);
            Json(ApiResponse {
                success: true,
                message: "Reply recorded".to_string(),
            })
        }
        None => Json(ApiResponse {
            success: false,
            message: "Replies arrive through the chat provider".to_string(),
        }),
    }
}

/// SSE endpoint for real-time pipeline events with heartbeat
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        let timeout = tokio::time::timeout(std::time::Duration::from_secs(15), rx.recv()).await;
        match timeout {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                Some((Ok(Event::default().comment("lagged")), rx))
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => None,
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// === Wiring ===

/// Slack when credentials are present, in-memory otherwise. The second
/// element is `Some` only for the in-memory transport.
fn build_transport() -> (Arc<dyn ChatTransport>, Option<Arc<InMemoryTransport>>) {
    match (
        std::env::var("SLACK_OAUTH_TOKEN"),
        std::env::var("SLACK_CHANNEL"),
    ) {
        (Ok(token), Ok(channel)) if !token.is_empty() && !channel.is_empty() => {
            tracing::info!(%channel, "using the Slack transport");
            (Arc::new(SlackTransport::new(token, channel)), None)
        }
        _ => {
            tracing::info!("no Slack credentials, using the in-memory transport");
            let transport = Arc::new(InMemoryTransport::new());
            (transport.clone() as Arc<dyn ChatTransport>, Some(transport))
        }
    }
}

fn build_state(config: ResearchConfig) -> SharedState {
    let (transport, memory_transport) = build_transport();
    let chat = ChatChannel::new(transport, config.poll_interval());
    let (event_tx, _) = broadcast::channel(256);
    Arc::new(AppState {
        research_status: RwLock::new(ResearchStatus::default()),
        event_tx,
        chat,
        memory_transport,
        config,
        active_run: RwLock::new(None),
        run_counter: AtomicU64::new(1),
    })
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/research", post(start_research))
        .route("/api/research/status", get(get_status))
        .route("/api/research/cancel", post(cancel_research))
        .route("/api/events", get(events))
        .route("/api/threads/:id", get(get_thread))
        .route("/api/threads/:id/reply", post(reply_to_thread))
        .with_state(state)
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let state = build_state(ResearchConfig::default());
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "scout server listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_once(
    topic: String,
    language: Option<String>,
    purpose: Option<String>,
    scope: Option<String>,
) -> anyhow::Result<()> {
    let config = ResearchConfig::default();
    let (transport, _) = build_transport();
    let chat = ChatChannel::new(transport, config.poll_interval());
    let service = Arc::new(OpenAiService::from_env()?);

    let orchestrator = Orchestrator::new(service, config).with_chat_channel(chat);
    let report = orchestrator
        .run(ResearchRequest {
            topic,
            language,
            purpose,
            scope,
        })
        .await?;

    println!("# {}\n", report.topic);
    println!("{}\n", report.detailed_report);
    println!("## Summary\n\n{}\n", report.summary);
    if !report.sources.is_empty() {
        println!("## Sources\n");
        for source in &report.sources {
            println!("- {source}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Some(CliCommand::Run {
            topic,
            language,
            purpose,
            scope,
        }) => run_once(topic, language, purpose, scope).await,
        Some(CliCommand::Serve { port }) => serve(port).await,
        None => serve(8080).await,
    }
}

//! # Chat Channel
//!
//! Blocking request/reply with a human over a conversation thread.
//! The channel sends a message through an injected transport and polls
//! the thread at a fixed interval until a genuinely new human-authored
//! reply appears, the timeout elapses, or the wait is cancelled.
//!
//! The transport is the source of truth for message history; the only
//! state the channel keeps is the per-wait baseline bookkeeping used
//! to detect new replies.

pub mod memory;
pub mod slack;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ResearchError;

/// One message in a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Message text.
    pub text: String,
    /// Whether an automated participant (bot) authored the message.
    pub from_automation: bool,
}

impl ThreadMessage {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            from_automation: false,
        }
    }

    pub fn automated(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            from_automation: true,
        }
    }
}

/// Message transport contract.
///
/// Alternate backends (Slack, in-memory, queues) implement this and
/// are injected at construction; the channel never branches on the
/// concrete transport.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver a message. With no thread id the transport starts a new
    /// thread and returns its generated id; with one, the message is
    /// appended and the same id comes back unchanged.
    async fn send_message(&self, text: &str, thread_id: Option<&str>) -> anyhow::Result<String>;

    /// The full ordered message list for a thread, automated messages
    /// included and flagged.
    async fn list_thread_messages(&self, thread_id: &str) -> anyhow::Result<Vec<ThreadMessage>>;
}

/// State for one blocking wait. Owned by the call that created it and
/// dropped when the wait resolves.
#[derive(Debug)]
struct PendingWait {
    deadline: Instant,
    /// Human-message count when the wait began. `None` until the first
    /// successful listing when the baseline fetch itself failed.
    baseline: Option<usize>,
}

/// Sends messages to a human and blocks for their reply.
#[derive(Clone)]
pub struct ChatChannel {
    transport: Arc<dyn ChatTransport>,
    poll_interval: Duration,
}

impl ChatChannel {
    pub fn new(transport: Arc<dyn ChatTransport>, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
        }
    }

    /// Deliver a message, returning the thread id the conversation now
    /// lives in. Callers continue a logical conversation by supplying
    /// that id on the next send; there is no automatic inference.
    pub async fn send(
        &self,
        message: &str,
        thread_id: Option<&str>,
    ) -> Result<String, ResearchError> {
        self.transport
            .send_message(message, thread_id)
            .await
            .map_err(ResearchError::Transport)
    }

    /// Block until a new human-authored message appears in the thread.
    ///
    /// The baseline human-message count is taken at call time, which
    /// guards against a reply landing between send and wait-start.
    /// Automated messages never count and are never surfaced. Transport
    /// errors while polling are transient: logged and retried on the
    /// next tick, still bounded by the deadline. Cancellation unwinds
    /// the wait immediately.
    pub async fn wait_for_reply(
        &self,
        thread_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ResearchError> {
        let mut wait = PendingWait {
            deadline: Instant::now() + timeout,
            baseline: None,
        };

        match self.transport.list_thread_messages(thread_id).await {
            Ok(messages) => wait.baseline = Some(human_count(&messages)),
            Err(err) => {
                tracing::warn!(thread_id, error = %err, "baseline fetch failed, retrying on next poll");
            }
        }

        let mut ticker = time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(thread_id, "reply wait cancelled");
                    return Err(ResearchError::Cancelled);
                }
                _ = time::sleep_until(wait.deadline) => {
                    return Err(ResearchError::ReplyTimeout {
                        thread_id: thread_id.to_string(),
                        timeout,
                    });
                }
                _ = ticker.tick() => {
                    let messages = match self.transport.list_thread_messages(thread_id).await {
                        Ok(messages) => messages,
                        Err(err) => {
                            tracing::warn!(thread_id, error = %err, "poll failed, retrying");
                            continue;
                        }
                    };

                    let humans: Vec<&ThreadMessage> =
                        messages.iter().filter(|m| !m.from_automation).collect();

                    match wait.baseline {
                        None => wait.baseline = Some(humans.len()),
                        Some(baseline) if humans.len() > baseline => {
                            if let Some(reply) = humans.last() {
                                return Ok(reply.text.clone());
                            }
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }

    /// Send a message and block for the reply. Returns the reply text
    /// and the thread id the conversation lives in.
    pub async fn ask(
        &self,
        message: &str,
        thread_id: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(String, String), ResearchError> {
        let thread_id = self.send(message, thread_id).await?;
        let reply = self.wait_for_reply(&thread_id, timeout, cancel).await?;
        Ok((reply, thread_id))
    }

    /// The full ordered message list for a thread, human and automated
    /// alike. Never blocks on new messages.
    pub async fn get_thread_history(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ThreadMessage>, ResearchError> {
        self.transport
            .list_thread_messages(thread_id)
            .await
            .map_err(ResearchError::Transport)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

fn human_count(messages: &[ThreadMessage]) -> usize {
    messages.iter().filter(|m| !m.from_automation).count()
}

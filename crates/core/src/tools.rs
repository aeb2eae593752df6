//! # Tool Capabilities
//!
//! Capabilities the generation service may call mid-generation. Each
//! one is a narrow trait object over the chat channel, so the model
//! can ask the human a clarifying question or review a thread without
//! the adapter knowing anything about transports.

use std::time::Duration;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema, Schema};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatChannel;

/// A callable capability exposed to the generation service.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema for the arguments object.
    fn parameters_schema(&self) -> Schema;
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// Arguments for the ask-human tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AskHumanArgs {
    /// The question or message to send to the human.
    pub message: String,
    /// Thread id from a previous exchange. Supply it to continue the
    /// same conversation; omit it only for a completely new topic.
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Sends a message to the human participant and blocks until they
/// reply, with the pipeline's timeout and cancellation applied.
pub struct AskHumanTool {
    channel: ChatChannel,
    timeout: Duration,
    cancel: CancellationToken,
}

impl AskHumanTool {
    pub fn new(channel: ChatChannel, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            channel,
            timeout,
            cancel,
        }
    }
}

#[async_trait]
impl ToolCapability for AskHumanTool {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn description(&self) -> &str {
        "Ask the human a question when you need clarification, additional \
         information, or confirmation. IMPORTANT: if this is a follow-up to a \
         previous conversation, ALWAYS pass the thread_id from the previous \
         response to continue in the same thread. Only omit thread_id for a \
         completely new topic."
    }

    fn parameters_schema(&self) -> Schema {
        schema_for!(AskHumanArgs)
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let args: AskHumanArgs = serde_json::from_value(args)?;
        let (reply, thread_id) = self
            .channel
            .ask(
                &args.message,
                args.thread_id.as_deref(),
                self.timeout,
                &self.cancel,
            )
            .await?;
        Ok(json!({ "reply": reply, "thread_id": thread_id }))
    }
}

/// Arguments for the thread-history tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadHistoryArgs {
    /// Id of the thread to review.
    pub thread_id: String,
}

/// Returns the full ordered history of a conversation thread.
pub struct ThreadHistoryTool {
    channel: ChatChannel,
}

impl ThreadHistoryTool {
    pub fn new(channel: ChatChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ToolCapability for ThreadHistoryTool {
    fn name(&self) -> &str {
        "get_thread_history"
    }

    fn description(&self) -> &str {
        "Get the conversation history of a specific thread. Use this to review \
         previous messages and understand what has already been discussed."
    }

    fn parameters_schema(&self) -> Schema {
        schema_for!(ThreadHistoryArgs)
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let args: ThreadHistoryArgs = serde_json::from_value(args)?;
        let messages = self.channel.get_thread_history(&args.thread_id).await?;
        Ok(json!({ "thread_id": args.thread_id, "messages": messages }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::memory::InMemoryTransport;
    use crate::chat::ChatTransport;
    use std::sync::Arc;

    fn channel(transport: Arc<InMemoryTransport>) -> ChatChannel {
        ChatChannel::new(transport, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ask_human_round_trip() {
        let transport = Arc::new(InMemoryTransport::new());
        let tool = AskHumanTool::new(
            channel(transport.clone()),
            Duration::from_secs(60),
            CancellationToken::new(),
        );

        let call = tokio::spawn(async move {
            tool.call(json!({ "message": "Which database?" })).await
        });

        tokio::task::yield_now().await;
        let thread_id = transport.thread_ids().pop().unwrap();
        transport.push_human_reply(&thread_id, "SQLite");

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["reply"], "SQLite");
        assert_eq!(result["thread_id"], thread_id);
    }

    #[tokio::test]
    async fn test_thread_history_returns_all_messages() {
        let transport = Arc::new(InMemoryTransport::new());
        let id = transport.send_message("question", None).await.unwrap();
        transport.push_human_reply(&id, "answer");

        let tool = ThreadHistoryTool::new(channel(transport));
        let result = tool.call(json!({ "thread_id": id })).await.unwrap();

        let messages = result["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["from_automation"], true);
        assert_eq!(messages[1]["text"], "answer");
    }

    #[tokio::test]
    async fn test_ask_human_rejects_malformed_arguments() {
        let transport = Arc::new(InMemoryTransport::new());
        let tool = AskHumanTool::new(
            channel(transport),
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        assert!(tool.call(json!({ "thread_id": 42 })).await.is_err());
    }
}

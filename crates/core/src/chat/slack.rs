//! # Slack Transport
//!
//! Thread messaging over the Slack Web API: `chat.postMessage` to
//! send, `conversations.replies` to list. A thread id is the Slack
//! timestamp (`ts`) of the thread's root message. Messages carrying a
//! `bot_id` or the `bot_message` subtype are flagged as automated.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChatTransport, ThreadMessage};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
const REPLIES_URL: &str = "https://slack.com/api/conversations.replies";

pub struct SlackTransport {
    token: String,
    channel: String,
    /// Channel id as resolved by the API on first send. Listing needs
    /// the id, not the `#name` form.
    resolved_channel_id: RwLock<Option<String>>,
    client: reqwest::Client,
}

impl SlackTransport {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            token: token.into(),
            channel: channel.into(),
            resolved_channel_id: RwLock::new(None),
            client,
        }
    }

    fn channel_for_listing(&self) -> String {
        let resolved = self
            .resolved_channel_id
            .read()
            .unwrap_or_else(|e| e.into_inner());
        match resolved.as_ref() {
            Some(id) => id.clone(),
            None => self.channel.trim_start_matches('#').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    ok: bool,
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    text: String,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

impl SlackMessage {
    fn from_automation(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }
}

#[async_trait]
impl ChatTransport for SlackTransport {
    async fn send_message(&self, text: &str, thread_id: Option<&str>) -> anyhow::Result<String> {
        let mut payload = json!({
            "channel": self.channel,
            "text": text,
        });
        if let Some(ts) = thread_id {
            payload["thread_ts"] = json!(ts);
        }

        let response: PostMessageResponse = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            anyhow::bail!("slack API error: {}", response.error);
        }

        if !response.channel.is_empty() {
            let mut resolved = self
                .resolved_channel_id
                .write()
                .unwrap_or_else(|e| e.into_inner());
            *resolved = Some(response.channel);
        }

        Ok(match thread_id {
            Some(ts) => ts.to_string(),
            None => response.ts,
        })
    }

    async fn list_thread_messages(&self, thread_id: &str) -> anyhow::Result<Vec<ThreadMessage>> {
        let response: RepliesResponse = self
            .client
            .get(REPLIES_URL)
            .bearer_auth(&self.token)
            .query(&[
                ("channel", self.channel_for_listing().as_str()),
                ("ts", thread_id),
            ])
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            anyhow::bail!("slack API error: {}", response.error);
        }

        Ok(response
            .messages
            .into_iter()
            .map(|m| ThreadMessage {
                from_automation: m.from_automation(),
                text: m.text,
            })
            .collect())
    }
}

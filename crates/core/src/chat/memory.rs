//! # In-Memory Transport
//!
//! Thread log held in process memory. Used by tests and by the server
//! when no real messaging backend is configured; human replies are
//! injected through `push_human_reply` (the server maps an HTTP route
//! onto it).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatTransport, ThreadMessage};

/// Append-only thread store behind a mutex, so the transport's sender
/// and the channel's poller never observe a torn message list.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    threads: Mutex<HashMap<String, Vec<ThreadMessage>>>,
    next_id: AtomicU64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a human-authored reply, as an external participant would.
    pub fn push_human_reply(&self, thread_id: &str, text: &str) {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        threads
            .entry(thread_id.to_string())
            .or_default()
            .push(ThreadMessage::human(text));
    }

    /// Ids of all threads seen so far, in no particular order.
    pub fn thread_ids(&self) -> Vec<String> {
        let threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        threads.keys().cloned().collect()
    }
}

#[async_trait]
impl ChatTransport for InMemoryTransport {
    async fn send_message(&self, text: &str, thread_id: Option<&str>) -> anyhow::Result<String> {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        let id = match thread_id {
            Some(id) => id.to_string(),
            None => format!("thread-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        threads
            .entry(id.clone())
            .or_default()
            .push(ThreadMessage::automated(text));
        Ok(id)
    }

    async fn list_thread_messages(&self, thread_id: &str) -> anyhow::Result<Vec<ThreadMessage>> {
        let threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }
}

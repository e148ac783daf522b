use crate::traits::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: vec![],
            updated_at: Utc::now(),
        }
    }
}

/// Per-thread message history, keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, thread_id: &str) -> anyhow::Result<Option<ConversationState>>;

    async fn append(&self, thread_id: &str, messages: &[Message]) -> anyhow::Result<()>;

    async fn replace(&self, state: ConversationState) -> anyhow::Result<()>;

    async fn list_threads(&self) -> anyhow::Result<Vec<String>>;

    async fn delete(&self, thread_id: &str) -> anyhow::Result<bool>;

    async fn load_or_create(&self, thread_id: &str) -> anyhow::Result<ConversationState> {
        Ok(self
            .load(thread_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(thread_id)))
    }
}

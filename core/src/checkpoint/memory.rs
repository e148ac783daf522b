use crate::traits::{CheckpointStore, ConversationState, Message};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, thread_id: &str) -> anyhow::Result<Option<ConversationState>> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn append(&self, thread_id: &str, messages: &[Message]) -> anyhow::Result<()> {
        let mut threads = self.threads.write().await;
        let state = threads
            .entry(thread_id.to_string())
            .or_insert_with(|| ConversationState::new(thread_id));
        state.messages.extend_from_slice(messages);
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn replace(&self, state: ConversationState) -> anyhow::Result<()> {
        self.threads
            .write()
            .await
            .insert(state.thread_id.clone(), state);
        Ok(())
    }

    async fn list_threads(&self) -> anyhow::Result<Vec<String>> {
        let mut ids: Vec<String> = self.threads.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, thread_id: &str) -> anyhow::Result<bool> {
        Ok(self.threads.write().await.remove(thread_id).is_some())
    }
}

use crate::traits::{CheckpointStore, ConversationState, Message};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const MAX_STEM_CHARS: usize = 48;

/// One JSON document per thread. Writes go through a temp file and a rename
/// so a crash never leaves a half-written checkpoint behind.
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        let stem: String = thread_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_STEM_CHARS)
            .collect();
        let digest = md5::compute(thread_id.as_bytes());
        self.dir.join(format!("{}-{:x}.json", stem, digest))
    }

    async fn read_state(&self, path: &Path) -> Result<Option<ConversationState>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let state = serde_json::from_str(&content)
                    .with_context(|| format!("Corrupt checkpoint at {}", path.display()))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_state(&self, state: &ConversationState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(&state.thread_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        self.read_state(&self.path_for(thread_id)).await
    }

    async fn append(&self, thread_id: &str, messages: &[Message]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut state = self
            .read_state(&self.path_for(thread_id))
            .await?
            .unwrap_or_else(|| ConversationState::new(thread_id));
        state.messages.extend_from_slice(messages);
        state.updated_at = Utc::now();
        self.write_state(&state).await
    }

    async fn replace(&self, state: ConversationState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_state(&state).await
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e).context("Failed to list checkpoints"),
        };

        let mut ids = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_state(&path).await {
                Ok(Some(state)) => ids.push(state.thread_id),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), "Skipping checkpoint: {:#}", e),
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("Failed to delete checkpoint"),
        }
    }
}

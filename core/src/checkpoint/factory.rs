use crate::checkpoint::{JsonFileCheckpointStore, MemoryCheckpointStore};
use crate::config::{CheckpointBackend, Config};
use crate::traits::CheckpointStore;
use std::sync::Arc;

pub fn create_checkpoint_store(config: &Config) -> Arc<dyn CheckpointStore> {
    match config.checkpoint.backend {
        CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
        CheckpointBackend::File => Arc::new(JsonFileCheckpointStore::new(config.threads_dir())),
    }
}

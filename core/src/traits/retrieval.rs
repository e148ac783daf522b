use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    pub text: String,
    pub metadata: serde_json::Value,
}

/// A loaded, not yet indexed document.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub content: String,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn query(&self, query: &str) -> anyhow::Result<Vec<Passage>>;

    fn chunk_count(&self) -> usize;
}

#[async_trait]
pub trait DocumentIndexer: Send + Sync {
    fn name(&self) -> &str;

    async fn index(&self, document: Document) -> anyhow::Result<Arc<dyn Retriever>>;
}

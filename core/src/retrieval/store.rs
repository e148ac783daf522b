use crate::error::AgentError;
use crate::retrieval::{DocumentSource, load_document};
use crate::traits::{DocumentIndexer, Retriever};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub name: String,
    pub chunks: usize,
    pub indexed_at: DateTime<Utc>,
}

struct ThreadDocument {
    retriever: Arc<dyn Retriever>,
    info: DocumentInfo,
}

/// Thread id to retriever. Associating again for the same thread replaces
/// the previous retriever; entries live until `detach` is called.
pub struct RetrievalContextStore {
    indexer: Arc<dyn DocumentIndexer>,
    documents: RwLock<HashMap<String, ThreadDocument>>,
}

impl RetrievalContextStore {
    pub fn new(indexer: Arc<dyn DocumentIndexer>) -> Self {
        Self {
            indexer,
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn indexer_name(&self) -> &str {
        self.indexer.name()
    }

    pub async fn associate(
        &self,
        thread_id: &str,
        source: DocumentSource,
    ) -> Result<Arc<dyn Retriever>, AgentError> {
        let document = load_document(source).await?;
        let name = document.name.clone();

        let retriever = self
            .indexer
            .index(document)
            .await
            .map_err(|e| AgentError::DocumentIngestion(format!("{:#}", e)))?;

        let info = DocumentInfo {
            name,
            chunks: retriever.chunk_count(),
            indexed_at: Utc::now(),
        };

        tracing::info!(
            thread_id,
            document = %info.name,
            chunks = info.chunks,
            indexer = self.indexer.name(),
            "Associated document with thread"
        );

        let previous = self.write().insert(
            thread_id.to_string(),
            ThreadDocument {
                retriever: retriever.clone(),
                info,
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(thread_id, replaced = %previous.info.name, "Replaced thread document");
        }

        Ok(retriever)
    }

    pub fn lookup(&self, thread_id: &str) -> Option<Arc<dyn Retriever>> {
        self.read().get(thread_id).map(|d| d.retriever.clone())
    }

    pub fn document(&self, thread_id: &str) -> Option<DocumentInfo> {
        self.read().get(thread_id).map(|d| d.info.clone())
    }

    pub fn detach(&self, thread_id: &str) -> bool {
        self.write().remove(thread_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ThreadDocument>> {
        self.documents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ThreadDocument>> {
        self.documents.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::KeywordIndexer;
    use tempfile::TempDir;

    fn store() -> RetrievalContextStore {
        RetrievalContextStore::new(Arc::new(KeywordIndexer::new(200, 20, 3)))
    }

    #[tokio::test]
    async fn associate_then_query() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.txt");
        std::fs::write(
            &path,
            "Employees accrue twenty vacation days per year. Unused days roll over once.",
        )
        .unwrap();

        let store = store();
        assert!(store.lookup("t1").is_none());

        store
            .associate("t1", DocumentSource::path(&path))
            .await
            .unwrap();

        let retriever = store.lookup("t1").unwrap();
        let passages = retriever.query("vacation days").await.unwrap();
        assert!(!passages.is_empty());
        assert!(passages[0].text.contains("vacation"));
        assert_eq!(store.document("t1").unwrap().name, "policy.txt");
        assert!(store.lookup("t2").is_none());
    }

    #[tokio::test]
    async fn reassociation_overwrites() {
        let store = store();
        store
            .associate("t1", DocumentSource::text("a.txt", "apples are red"))
            .await
            .unwrap();
        store
            .associate("t1", DocumentSource::text("b.txt", "bananas are yellow"))
            .await
            .unwrap();

        let retriever = store.lookup("t1").unwrap();
        assert!(retriever.query("apples").await.unwrap().is_empty());
        assert_eq!(retriever.query("bananas").await.unwrap().len(), 1);
        assert_eq!(store.document("t1").unwrap().name, "b.txt");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn missing_document_leaves_state_untouched() {
        let store = store();
        store
            .associate("t1", DocumentSource::text("a.txt", "apples"))
            .await
            .unwrap();

        let result = store
            .associate("t1", DocumentSource::path("/definitely/not/here.txt"))
            .await;
        assert!(matches!(result, Err(AgentError::DocumentNotFound(_))));
        assert_eq!(store.document("t1").unwrap().name, "a.txt");
    }

    #[tokio::test]
    async fn detach_removes() {
        let store = store();
        store
            .associate("t1", DocumentSource::text("a.txt", "apples"))
            .await
            .unwrap();
        assert!(store.detach("t1"));
        assert!(!store.detach("t1"));
        assert!(store.is_empty());
    }
}

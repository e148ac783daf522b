pub mod chunker;
pub mod document;
pub mod embedding;
pub mod keyword;
pub mod store;

pub use document::{DocumentSource, load_document};
pub use embedding::EmbeddingIndexer;
pub use keyword::KeywordIndexer;
pub use store::{DocumentInfo, RetrievalContextStore};

use crate::config::{Config, IndexerKind};
use crate::error::AgentError;
use crate::providers::resolve_api_key;
use crate::traits::DocumentIndexer;
use std::sync::Arc;

pub fn create_indexer(config: &Config) -> Result<Arc<dyn DocumentIndexer>, AgentError> {
    let retrieval = &config.retrieval;

    match retrieval.indexer {
        IndexerKind::Keyword => Ok(Arc::new(KeywordIndexer::new(
            retrieval.chunk_size,
            retrieval.chunk_overlap,
            retrieval.top_k,
        ))),
        IndexerKind::Embedding => {
            let api_key = resolve_api_key(
                &["OPENAI_API_KEY", "PARLEY_OPENAI_API_KEY"],
                &config.api_key,
            )
            .ok_or_else(|| {
                AgentError::Configuration(
                    "embedding indexer needs an OpenAI API key (OPENAI_API_KEY)".into(),
                )
            })?;

            let mut indexer = EmbeddingIndexer::new(api_key)
                .with_model(retrieval.embedding_model.clone())
                .with_chunking(retrieval.chunk_size, retrieval.chunk_overlap)
                .with_top_k(retrieval.top_k);
            if config.provider_name() == "openai"
                && let Some(base_url) = &config.base_url
            {
                indexer = indexer.with_base_url(base_url.clone());
            }
            Ok(Arc::new(indexer))
        }
    }
}

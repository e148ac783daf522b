use crate::retrieval::chunker::split_text;
use crate::traits::{Document, DocumentIndexer, Passage, Retriever};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "was", "what", "when", "where", "which", "who", "with",
];

/// Offline indexer: ranks chunks by how many query terms they contain.
pub struct KeywordIndexer {
    chunk_size: usize,
    chunk_overlap: usize,
    top_k: usize,
}

impl KeywordIndexer {
    pub fn new(chunk_size: usize, chunk_overlap: usize, top_k: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            top_k,
        }
    }
}

impl Default for KeywordIndexer {
    fn default() -> Self {
        Self::new(1000, 100, 4)
    }
}

#[async_trait]
impl DocumentIndexer for KeywordIndexer {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn index(&self, document: Document) -> anyhow::Result<Arc<dyn Retriever>> {
        let chunks = split_text(&document.content, self.chunk_size, self.chunk_overlap);
        if chunks.is_empty() {
            anyhow::bail!("document '{}' produced no chunks", document.name);
        }

        let entries = chunks
            .into_iter()
            .map(|text| {
                let mut counts: HashMap<String, usize> = HashMap::new();
                for term in tokenize(&text) {
                    *counts.entry(term).or_default() += 1;
                }
                IndexedChunk { text, counts }
            })
            .collect();

        Ok(Arc::new(KeywordRetriever {
            source: document.name,
            chunks: entries,
            top_k: self.top_k,
        }))
    }
}

struct IndexedChunk {
    text: String,
    counts: HashMap<String, usize>,
}

pub struct KeywordRetriever {
    source: String,
    chunks: Vec<IndexedChunk>,
    top_k: usize,
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn query(&self, query: &str) -> anyhow::Result<Vec<Passage>> {
        let terms: HashSet<String> = tokenize(query).collect();
        if terms.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<(usize, f64)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(idx, chunk)| {
                let score: f64 = terms
                    .iter()
                    .filter_map(|t| chunk.counts.get(t))
                    .map(|&count| 1.0 + (count as f64).ln())
                    .sum();
                (score > 0.0).then_some((idx, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(self.top_k);

        Ok(scored
            .into_iter()
            .map(|(idx, score)| Passage {
                text: self.chunks[idx].text.clone(),
                metadata: json!({
                    "source": self.source,
                    "chunk": idx,
                    "score": score,
                }),
            })
            .collect())
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
}

use crate::retrieval::chunker::split_text;
use crate::traits::{Document, DocumentIndexer, Passage, Retriever};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const EMBEDDING_BATCH: usize = 64;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Clone)]
struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    async fn embed(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(inputs.len());

        for batch in inputs.chunks(EMBEDDING_BATCH) {
            let response = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&EmbeddingRequest {
                    model: &self.model,
                    input: batch,
                })
                .send()
                .await
                .context("Embedding request failed")?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                anyhow::bail!("Embedding API error {}: {}", status, error_text);
            }

            let mut body: EmbeddingResponse = response.json().await?;
            if body.data.len() != batch.len() {
                anyhow::bail!(
                    "Embedding API returned {} vectors for {} inputs",
                    body.data.len(),
                    batch.len()
                );
            }
            body.data.sort_by_key(|d| d.index);
            vectors.extend(body.data.into_iter().map(|d| d.embedding));
        }

        Ok(vectors)
    }
}

/// Indexes chunks through an OpenAI-compatible `/embeddings` endpoint and
/// ranks them by cosine similarity.
pub struct EmbeddingIndexer {
    client: EmbeddingClient,
    chunk_size: usize,
    chunk_overlap: usize,
    top_k: usize,
}

impl EmbeddingIndexer {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client: EmbeddingClient {
                client,
                api_key: api_key.into(),
                base_url: "https://api.openai.com/v1".to_string(),
                model: "text-embedding-ada-002".to_string(),
            },
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 4,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.client.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

#[async_trait]
impl DocumentIndexer for EmbeddingIndexer {
    fn name(&self) -> &str {
        "embedding"
    }

    async fn index(&self, document: Document) -> anyhow::Result<Arc<dyn Retriever>> {
        let chunks = split_text(&document.content, self.chunk_size, self.chunk_overlap);
        if chunks.is_empty() {
            anyhow::bail!("document '{}' produced no chunks", document.name);
        }

        let vectors = self
            .client
            .embed(&chunks)
            .await
            .with_context(|| format!("Failed to embed '{}'", document.name))?;

        tracing::debug!(
            source = %document.name,
            chunks = chunks.len(),
            "Embedded document"
        );

        Ok(Arc::new(EmbeddingRetriever {
            client: self.client.clone(),
            source: document.name,
            chunks,
            vectors,
            top_k: self.top_k,
        }))
    }
}

pub struct EmbeddingRetriever {
    client: EmbeddingClient,
    source: String,
    chunks: Vec<String>,
    vectors: Vec<Vec<f32>>,
    top_k: usize,
}

#[async_trait]
impl Retriever for EmbeddingRetriever {
    async fn query(&self, query: &str) -> anyhow::Result<Vec<Passage>> {
        let query_vector = self
            .client
            .embed(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned for query"))?;

        Ok(rank(&query_vector, &self.vectors, self.top_k)
            .into_iter()
            .map(|(idx, score)| Passage {
                text: self.chunks[idx].clone(),
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

fn rank(query: &[f32], vectors: &[Vec<f32>], top_k: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(idx, v)| (idx, cosine_similarity(query, v)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(top_k);
    scored
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn rank_orders_by_similarity() {
        let vectors = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.7, 0.7]];
        let ranked = rank(&[1.0, 0.1], &vectors, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, 1);
        assert_eq!(ranked[1].0, 2);
    }
}

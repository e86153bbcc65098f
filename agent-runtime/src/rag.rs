//! Context retrieval (RAG): external `VectorStore`/`EmbeddingProvider`
//! contracts plus the retrieval helper the request pipeline (C5) calls.
//!
//! These traits describe collaborators the runtime treats as black boxes —
//! grounded on the teacher's `Store`/`Embedder` split, generalized from
//! string-filter search to vector similarity search.

use async_trait::async_trait;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    Dot,
}

#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub name: String,
    pub description: Option<String>,
    pub dimension: usize,
    pub distance_metric: DistanceMetric,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection: String,
    pub query_embedding: Vec<f32>,
    pub top_k: usize,
}

/// A search hit. Similarity convention: higher is better. Distance-based
/// backends should convert via `score = 1 - distance`.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub score: f64,
}

/// External vector store contract consumed for RAG context retrieval.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, config: CollectionConfig) -> Result<(), AgentError>;
    async fn add(&self, collection: &str, docs: Vec<Document>) -> Result<(), AgentError>;
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, AgentError>;
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), AgentError>;
    async fn count(&self, collection: &str) -> Result<usize, AgentError>;
    async fn clear(&self, collection: &str) -> Result<(), AgentError>;
}

/// External embedding model contract.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError>;
}

/// Retrieves up to `top_k` documents scoring `>= min_score` and wraps the
/// user message as `"Context:\n{docs}\n\nQuestion: {message}"`. Returns the
/// original message unmodified when nothing clears the bar.
pub async fn augment_with_context(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    collection: &str,
    message: &str,
    top_k: usize,
    min_score: f64,
) -> Result<String, AgentError> {
    let query_embedding = embedder.embed(message).await?;
    let results = store
        .search(SearchRequest {
            collection: collection.to_string(),
            query_embedding,
            top_k,
        })
        .await?;

    let relevant: Vec<&SearchResult> = results.iter().filter(|r| r.score >= min_score).collect();
    if relevant.is_empty() {
        return Ok(message.to_string());
    }

    let context = relevant
        .iter()
        .map(|r| r.document.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!("Context:\n{context}\n\nQuestion: {message}"))
}

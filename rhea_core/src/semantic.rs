//! # Semantic Index Client
//!
//! The embedding-based tool index is an external collaborator: the core only
//! consumes "give me the top-K tool ids for this query". The production
//! implementation embeds the query through an OpenAI-compatible endpoint and
//! searches a vector collection over REST; tests substitute a static
//! ranking.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Result, RheaError};

#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Top-K tool ids most relevant to the query, best first.
    async fn top_k(&self, query: &str, k: usize) -> Result<Vec<String>>;
}

/// Remote embedding endpoint + vector collection search.
pub struct RemoteSemanticIndex {
    http: reqwest::Client,
    embedding_url: String,
    embedding_key: String,
    model: String,
    index_url: String,
    collection: String,
}

impl RemoteSemanticIndex {
    pub fn new(
        embedding_url: impl Into<String>,
        embedding_key: impl Into<String>,
        model: impl Into<String>,
        index_url: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            embedding_url: embedding_url.into(),
            embedding_key: embedding_key.into(),
            model: model.into(),
            index_url: index_url.into(),
            collection: collection.into(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
        }
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        let response = self
            .http
            .post(format!("{}/embeddings", self.embedding_url))
            .bearer_auth(&self.embedding_key)
            .json(&json!({
                "model": self.model,
                "input": text,
                "encoding_format": "float",
            }))
            .send()
            .await
            .map_err(|e| RheaError::ResourcesUnavailable(format!("embedding endpoint: {e}")))?
            .error_for_status()
            .map_err(|e| RheaError::ResourcesUnavailable(format!("embedding endpoint: {e}")))?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RheaError::ResourcesUnavailable(format!("embedding response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                RheaError::ResourcesUnavailable("embedding response had no vectors".to_string())
            })
    }
}

#[async_trait]
impl SemanticIndex for RemoteSemanticIndex {
    async fn top_k(&self, query: &str, k: usize) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct ScoredPoint {
            id: serde_json::Value,
            #[serde(default)]
            payload: Option<serde_json::Value>,
        }
        #[derive(Deserialize)]
        struct SearchResponse {
            result: Vec<ScoredPoint>,
        }

        let vector = self.embed(query).await?;

        let response = self
            .http
            .post(format!(
                "{}/collections/{}/points/search",
                self.index_url, self.collection
            ))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|e| RheaError::ResourcesUnavailable(format!("semantic index: {e}")))?
            .error_for_status()
            .map_err(|e| RheaError::ResourcesUnavailable(format!("semantic index: {e}")))?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RheaError::ResourcesUnavailable(format!("semantic response: {e}")))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|point| {
                // Prefer an explicit tool_id payload; fall back to the
                // point id itself.
                point
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("tool_id"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| match &point.id {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
            })
            .collect())
    }
}

/// Fixed ranking for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticIndex {
    ids: Vec<String>,
}

impl StaticIndex {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }
}

#[async_trait]
impl SemanticIndex for StaticIndex {
    async fn top_k(&self, _query: &str, k: usize) -> Result<Vec<String>> {
        Ok(self.ids.iter().take(k).cloned().collect())
    }
}

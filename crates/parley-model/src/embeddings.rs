// Copyright (c) 2025-2026 Parley Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Embeddings client against an OpenAI-compatible `/embeddings` endpoint.
//!
//! Only the HTTP interface lives here; there is no local model.  Vector
//! memory, document ingestion, and document search all consume the
//! [`Embedder`] trait so tests can substitute a deterministic stub.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ProviderError;

/// Anything that can turn text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Batch variant; the default loops over [`Embedder::embed`].
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

pub struct EmbeddingsClient {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl EmbeddingsClient {
    pub fn new(model: String, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".into())
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, input: Value) -> Result<Value, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("embeddings API key not set".into()))?;
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(key)
            .json(&json!({ "model": self.model, "input": input }))
            .send()
            .await
            .map_err(ProviderError::from_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        resp.json().await.map_err(ProviderError::from_transport)
    }
}

fn parse_vector(entry: &Value) -> Vec<f32> {
    entry["embedding"]
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_f64()).map(|f| f as f32).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Embedder for EmbeddingsClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let v = self.request(json!(text)).await?;
        let first = v["data"]
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| ProviderError::Other("empty embeddings response".into()))?;
        Ok(parse_vector(first))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let v = self.request(json!(texts)).await?;
        let data = v["data"]
            .as_array()
            .ok_or_else(|| ProviderError::Other("malformed embeddings response".into()))?;
        Ok(data.iter().map(parse_vector).collect())
    }
}

/// Cosine similarity between two vectors; 0.0 when either is degenerate.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![0.5, 0.5, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_opposite_vectors_is_negative_one() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn parse_vector_reads_embedding_field() {
        let entry = json!({"embedding": [0.1, 0.2, 0.3]});
        let v = parse_vector(&entry);
        assert_eq!(v.len(), 3);
        assert!((v[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn parse_vector_missing_field_is_empty() {
        assert!(parse_vector(&json!({})).is_empty());
    }
}

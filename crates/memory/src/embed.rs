//! Embedding capability.
//!
//! The index treats embedding as an injected capability with frozen
//! dimensionality; mixing dimensions silently corrupts cosine similarity,
//! so every implementation reports its dimension and the index enforces it
//! on insert.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use tb_domain::error::{Error, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed output dimensionality.
    fn dim(&self) -> usize;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HttpEmbedder — local daemon embeddings endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fetches embeddings from the local backend's OpenAI-shape
/// `/v1/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dim: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, dim: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dim,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "local-embeddings".into(),
                message: format!("HTTP {status}"),
            });
        }

        let parsed: serde_json::Value =
            response.json().await.map_err(|e| Error::Http(e.to_string()))?;
        let vector: Vec<f32> = parsed["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| Error::Provider {
                provider: "local-embeddings".into(),
                message: "response missing data[0].embedding".into(),
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vector.len() != self.dim {
            return Err(Error::EmbeddingDim {
                expected: self.dim,
                got: vector.len(),
            });
        }
        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HashEmbedder — deterministic token-hash embedding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic bag-of-tokens embedding: each token hashes to a bucket
/// and the resulting histogram is L2-normalized. No network, stable across
/// runs — used in tests and as the offline fallback when the local daemon
/// has no embeddings endpoint.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().expect("8 bytes"))
                as usize
                % self.dim;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Soft cap on vector index entries; the compression worker prunes
    /// above it.
    #[serde(default = "d_max_entries")]
    pub max_entries: usize,
    /// Embedding vector dimensionality. Mixing dimensions silently corrupts
    /// cosine similarity, so inserts with any other length are rejected.
    #[serde(default = "d_embed_dim")]
    pub embedding_dim: usize,
    /// Model used by the embeddings endpoint of the local backend.
    #[serde(default = "d_embed_model")]
    pub embedding_model: String,
    /// Background worker pool size.
    #[serde(default = "d_workers")]
    pub workers: usize,
    /// Extract-job queue depth; a full queue drops jobs (at-least-once).
    #[serde(default = "d_queue_depth")]
    pub queue_depth: usize,
    /// Timeout for one local-model extraction call.
    #[serde(default = "d_extract_timeout")]
    pub extract_timeout_secs: u64,
    /// Importance half-life in days for the decay worker.
    #[serde(default = "d_half_life")]
    pub decay_half_life_days: f64,
    /// Records below this importance become eviction candidates.
    #[serde(default = "d_floor")]
    pub importance_floor: f64,
    /// Fact count that triggers an early compression pass.
    #[serde(default = "d_high_water")]
    pub compress_high_water: usize,
    /// How many of the oldest facts one compression pass merges.
    #[serde(default = "d_compress_batch")]
    pub compress_batch: usize,
    /// Recent-topics ring buffer length in the working document.
    #[serde(default = "d_recent_topics")]
    pub recent_topics: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: d_max_entries(),
            embedding_dim: d_embed_dim(),
            embedding_model: d_embed_model(),
            workers: d_workers(),
            queue_depth: d_queue_depth(),
            extract_timeout_secs: d_extract_timeout(),
            decay_half_life_days: d_half_life(),
            importance_floor: d_floor(),
            compress_high_water: d_high_water(),
            compress_batch: d_compress_batch(),
            recent_topics: d_recent_topics(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_entries() -> usize {
    4096
}
fn d_embed_dim() -> usize {
    768
}
fn d_embed_model() -> String {
    "nomic-embed-text".into()
}
fn d_workers() -> usize {
    2
}
fn d_queue_depth() -> usize {
    64
}
fn d_extract_timeout() -> u64 {
    30
}
fn d_half_life() -> f64 {
    30.0
}
fn d_floor() -> f64 {
    0.05
}
fn d_high_water() -> usize {
    512
}
fn d_compress_batch() -> usize {
    40
}
fn d_recent_topics() -> usize {
    20
}

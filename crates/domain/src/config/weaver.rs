use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt assembler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaverConfig {
    /// Maximum tokens the assembled system block may occupy. Estimated as
    /// bytes / 4 unless a real tokenizer is wired for the model family.
    #[serde(default = "d_budget")]
    pub system_budget_tokens: usize,
    /// Top-K vector memories retrieved per turn.
    #[serde(default = "d_top_k")]
    pub memory_top_k: usize,
    /// Minimum cosine similarity for a memory to be injected.
    #[serde(default = "d_min_score")]
    pub memory_min_score: f32,
    /// Whether decision questions trigger the multi-agent debate
    /// collaborator.
    #[serde(default)]
    pub debate_enabled: bool,
    /// Decision-question confidence threshold in [0, 1].
    #[serde(default = "d_debate_threshold")]
    pub debate_threshold: f64,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            system_budget_tokens: d_budget(),
            memory_top_k: d_top_k(),
            memory_min_score: d_min_score(),
            debate_enabled: false,
            debate_threshold: d_debate_threshold(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_budget() -> usize {
    3_000
}
fn d_top_k() -> usize {
    6
}
fn d_min_score() -> f32 {
    0.3
}
fn d_debate_threshold() -> f64 {
    0.6
}

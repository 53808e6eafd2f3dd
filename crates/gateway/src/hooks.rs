//! Collaborator hooks.
//!
//! The core exposes these interfaces to external collaborators (commitment
//! tracking, multi-agent debate). Both are optional; an absent hook simply
//! leaves its prompt section empty.

use async_trait::async_trait;

use tb_domain::error::Result;

/// Supplies pending commitments/nudges for the prompt's commitments
/// section.
pub trait CommitmentsSource: Send + Sync {
    fn pending(&self) -> Vec<String>;
}

/// Produces a debate synthesis for a decision question. Invoked only when
/// the decision heuristic clears the configured threshold.
#[async_trait]
pub trait DebateSynthesizer: Send + Sync {
    async fn synthesize(&self, question: &str) -> Result<Option<String>>;
}

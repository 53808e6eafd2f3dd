use std::sync::Arc;

use tb_agents::AgentRegistry;
use tb_domain::config::Config;
use tb_memory::{JobQueue, MemoryIndex, StructuredMemory};
use tb_privacy::PrivacyFilter;
use tb_providers::{Dispatcher, ProviderRegistry};
use tb_skills::SkillsRegistry;

use crate::hooks::{CommitmentsSource, DebateSynthesizer};
use crate::runtime::budget::BudgetLedger;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub agents: Arc<AgentRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub dispatcher: Arc<Dispatcher>,

    // ── Memory pipeline ──────────────────────────────────────────────
    pub memory_index: Arc<MemoryIndex>,
    pub structured: Arc<StructuredMemory>,
    /// Fire-and-forget extract-job queue (Librarian input).
    pub jobs: JobQueue,

    // ── Prompt & privacy ─────────────────────────────────────────────
    pub privacy: Arc<PrivacyFilter>,
    pub skills: Arc<SkillsRegistry>,

    // ── Accounting ───────────────────────────────────────────────────
    pub ledger: Arc<BudgetLedger>,

    // ── Collaborator hooks ───────────────────────────────────────────
    pub commitments: Option<Arc<dyn CommitmentsSource>>,
    pub debate: Option<Arc<dyn DebateSynthesizer>>,

    // ── Security (startup-computed) ──────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}

//! `tb-weaver` — the Context Weaver.
//!
//! Deterministic, token-budgeted system-prompt composition. The gateway
//! gathers the raw section inputs (agent record, retrieved memories,
//! structured memory, skills, collaborator blocks); the weaver owns
//! ordering, sanitization, budget enforcement, and the merge into the
//! request's message list. Pure functions over pre-fetched data — nothing
//! here does I/O.

pub mod assembler;
pub mod decision;
pub mod platform;
pub mod sanitize;

pub use assembler::{assemble, estimate_tokens, merge_into_messages, WeaveInput};
pub use decision::decision_confidence;
pub use platform::platform_note;
pub use sanitize::sanitize_memory_text;

//! `tb-memory` — the long-term memory pipeline.
//!
//! Three pieces:
//!
//! - [`index::MemoryIndex`] — a vector store with category metadata,
//!   content-hash dedup, and cosine top-K retrieval.
//! - [`structured::StructuredMemory`] — the four high-precedence,
//!   human-editable documents (`identity`, `user`, `knowledge`, `working`)
//!   kept separate from the index so they always surface in the prompt.
//! - [`workers`] — the background pool: the Librarian extracts and indexes
//!   new memories after each exchange, the Searcher formats retrieval for
//!   injection, and periodic passes decay importance and compress old
//!   facts. The request path never waits on any of them.

pub mod embed;
pub mod index;
pub mod structured;
pub mod workers;

pub use embed::{Embedder, HashEmbedder, HttpEmbedder};
pub use index::{MemoryCategory, MemoryIndex, MemoryRecord, ScoredMemory};
pub use structured::StructuredMemory;
pub use workers::{JobQueue, LocalModel, MemoryJob};

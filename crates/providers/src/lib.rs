//! `tb-providers` — backend adapters for the request router.
//!
//! The [`registry::ProviderRegistry`] resolves a model id to a configured
//! backend via the model-prefix table, [`build`] translates the enriched
//! OpenAI-shape request into that backend's native body, and
//! [`dispatch::Dispatcher`] sends it — streaming or blocking — with
//! exponential-backoff retries on transient failures. SSE parsing per
//! provider lives in [`parse`], the shared buffering in [`sse`].

pub mod build;
pub mod dispatch;
pub mod parse;
pub mod registry;
pub mod sse;

pub use build::build_provider_request;
pub use dispatch::{ChatOutcome, Dispatcher};
pub use registry::{ProviderHandle, ProviderRegistry};

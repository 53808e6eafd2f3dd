//! `tb-domain` — shared types for the Torbo gateway.
//!
//! Holds the error type, the TOML configuration tree, the chat wire shapes
//! (inbound OpenAI format plus the typed outbound provider bodies), and the
//! provider-agnostic stream events. Every other crate in the workspace
//! depends on this one and nothing else in the workspace.

pub mod chat;
pub mod config;
pub mod error;
pub mod stream;

pub use error::{Error, Result};

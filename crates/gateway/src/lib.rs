//! `tb-gateway` — the Torbo gateway binary crate.
//!
//! Wires the registry, memory pipeline, privacy filter, weaver, and
//! provider dispatch into the HTTP surface. The request router lives in
//! [`api::chat`]; per-agent token accounting in [`runtime::budget`].

pub mod api;
pub mod hooks;
pub mod runtime;
pub mod state;

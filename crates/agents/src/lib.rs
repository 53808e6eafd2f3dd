//! `tb-agents` — agent identity, permissions, and per-agent preferences.
//!
//! The [`AgentRegistry`] persists one JSON file per agent under the agents
//! directory, serves lookups from an in-memory map, and publishes
//! `agent.changed` events on a broadcast channel. Built-in agents are
//! bootstrapped from shipped templates and upgraded field-by-field without
//! clobbering user customizations.

pub mod agent;
pub mod builtin;
pub mod registry;

pub use agent::{Agent, AGENT_ID_PATTERN};
pub use registry::{AgentEvent, AgentRegistry, GrantRevoker};

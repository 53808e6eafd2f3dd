//! File-backed agent registry.
//!
//! One JSON file per agent under the agents directory. Lookups are served
//! from an in-memory map behind `parking_lot::RwLock`; every mutation is
//! serialized through the write lock and persisted with an atomic
//! temp-file + rename. Undecodable files are skipped with a warning so a
//! corrupt record never aborts startup.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use tb_domain::error::{Error, Result};

use crate::agent::Agent;
use crate::builtin;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborator hooks & events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// IAM collaborator notified when an agent is deleted, so every grant
/// referencing the id can be revoked.
pub trait GrantRevoker: Send + Sync {
    fn revoke_all(&self, agent_id: &str);
}

/// Published on the registry's broadcast channel after each mutation.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Changed { id: String },
    Deleted { id: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentRegistry {
    dir: PathBuf,
    agents: RwLock<HashMap<String, Agent>>,
    events: broadcast::Sender<AgentEvent>,
    revoker: Option<Arc<dyn GrantRevoker>>,
}

impl AgentRegistry {
    /// Load the registry from `dir`, bootstrapping the shipped default
    /// agent when missing and running the built-in upgrade policy.
    pub fn load(dir: &Path, revoker: Option<Arc<dyn GrantRevoker>>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut agents = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|raw| serde_json::from_str::<Agent>(&raw).map_err(Error::Json))
            {
                Ok(agent) => {
                    agents.insert(agent.id.clone(), agent);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable agent file");
                }
            }
        }

        // Bootstrap the default built-in, then upgrade shipped fields on
        // every built-in already on disk.
        let mut to_persist: Vec<String> = Vec::new();
        if !agents.contains_key(builtin::DEFAULT_AGENT_ID) {
            let agent = builtin::default_agent();
            to_persist.push(agent.id.clone());
            agents.insert(agent.id.clone(), agent);
            tracing::info!(agent_id = builtin::DEFAULT_AGENT_ID, "bootstrapped default agent");
        }
        for agent in agents.values_mut().filter(|a| a.is_built_in) {
            if builtin::refresh_shipped_fields(agent) {
                tracing::info!(agent_id = %agent.id, "refreshed built-in agent to latest defaults");
                to_persist.push(agent.id.clone());
            }
        }

        let (events, _) = broadcast::channel(16);
        let registry = Self {
            dir: dir.to_path_buf(),
            agents: RwLock::new(agents),
            events,
            revoker,
        };
        for id in to_persist {
            registry.persist(&id)?;
        }

        tracing::info!(
            agents = registry.agents.read().len(),
            dir = %dir.display(),
            "agent registry loaded"
        );
        Ok(registry)
    }

    /// Subscribe to `agent.changed` / `agent.deleted` events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.agents.read().get(id).cloned()
    }

    /// All agents: default agent first, then case-insensitive by name.
    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| {
            let a_default = a.id == builtin::DEFAULT_AGENT_ID;
            let b_default = b.id == builtin::DEFAULT_AGENT_ID;
            b_default
                .cmp(&a_default)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Create a new user agent. Rejects invalid slugs, existing ids, and
    /// any attempt to create a built-in.
    pub fn create(&self, mut agent: Agent) -> Result<Agent> {
        Agent::validate_id(&agent.id)?;
        if agent.is_built_in {
            return Err(Error::BuiltInProtected(agent.id));
        }
        {
            let mut agents = self.agents.write();
            if agents.contains_key(&agent.id) {
                return Err(Error::AgentExists(agent.id));
            }
            let now = Utc::now();
            agent.created_at = now;
            agent.last_modified_at = now;
            agents.insert(agent.id.clone(), agent.clone());
        }
        self.persist(&agent.id)?;
        let _ = self.events.send(AgentEvent::Changed {
            id: agent.id.clone(),
        });
        Ok(agent)
    }

    /// Update an existing agent. The stored `is_built_in` flag and
    /// `created_at` are preserved regardless of the input.
    pub fn update(&self, mut agent: Agent) -> Result<Agent> {
        {
            let mut agents = self.agents.write();
            let stored = agents
                .get(&agent.id)
                .ok_or_else(|| Error::AgentNotFound(agent.id.clone()))?;
            agent.is_built_in = stored.is_built_in;
            agent.created_at = stored.created_at;
            agent.last_modified_at = Utc::now();
            agents.insert(agent.id.clone(), agent.clone());
        }
        self.persist(&agent.id)?;
        let _ = self.events.send(AgentEvent::Changed {
            id: agent.id.clone(),
        });
        Ok(agent)
    }

    /// Delete a user agent. Built-ins cannot be deleted. Deletion revokes
    /// all IAM grants referencing the id.
    pub fn delete(&self, id: &str) -> Result<()> {
        {
            let mut agents = self.agents.write();
            let stored = agents
                .get(id)
                .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
            if stored.is_built_in {
                return Err(Error::BuiltInProtected(id.to_string()));
            }
            agents.remove(id);
        }
        if let Err(e) = std::fs::remove_file(self.agent_path(id)) {
            tracing::warn!(agent_id = id, error = %e, "failed to remove agent file");
        }
        if let Some(revoker) = &self.revoker {
            revoker.revoke_all(id);
        }
        let _ = self.events.send(AgentEvent::Deleted { id: id.to_string() });
        Ok(())
    }

    /// Reset an agent. Built-ins are restored to the shipped defaults;
    /// user agents revert personality fields to the neutral template,
    /// preserving id / name / role.
    pub fn reset(&self, id: &str) -> Result<Agent> {
        let agent = {
            let mut agents = self.agents.write();
            let stored = agents
                .get_mut(id)
                .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
            if stored.is_built_in {
                let mut fresh = builtin::default_agent();
                fresh.id = stored.id.clone();
                fresh.created_at = stored.created_at;
                *stored = fresh;
            } else {
                stored.reset_personality();
            }
            stored.clone()
        };
        self.persist(id)?;
        let _ = self.events.send(AgentEvent::Changed { id: id.to_string() });
        Ok(agent)
    }

    // ── Export / import ──────────────────────────────────────────────

    /// The stored record as pretty JSON bytes.
    pub fn export(&self, id: &str) -> Result<Vec<u8>> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        Ok(pretty_sorted_json(&agent)?.into_bytes())
    }

    /// Import an agent record. `is_built_in` is forced to false and an
    /// existing built-in is never overwritten.
    pub fn import(&self, bytes: &[u8]) -> Result<Agent> {
        let mut agent: Agent = serde_json::from_slice(bytes)?;
        Agent::validate_id(&agent.id)?;
        agent.is_built_in = false;
        {
            let mut agents = self.agents.write();
            if let Some(existing) = agents.get(&agent.id) {
                if existing.is_built_in {
                    return Err(Error::BuiltInProtected(agent.id));
                }
            }
            agent.last_modified_at = Utc::now();
            agents.insert(agent.id.clone(), agent.clone());
        }
        self.persist(&agent.id)?;
        let _ = self.events.send(AgentEvent::Changed {
            id: agent.id.clone(),
        });
        Ok(agent)
    }

    // ── Private ──────────────────────────────────────────────────────

    fn agent_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write one agent file atomically (temp file in the same directory,
    /// then rename).
    fn persist(&self, id: &str) -> Result<()> {
        let agent = match self.get(id) {
            Some(a) => a,
            None => return Ok(()),
        };
        let json = pretty_sorted_json(&agent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(self.agent_path(id))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// Pretty-print with sorted keys: routing through `serde_json::Value`
/// gives BTreeMap key order.
fn pretty_sorted_json<T: serde::Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    let mut out = serde_json::to_string_pretty(&value)?;
    out.push('\n');
    Ok(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::DEFAULT_AGENT_ID;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open(dir: &Path) -> AgentRegistry {
        AgentRegistry::load(dir, None).unwrap()
    }

    #[test]
    fn bootstrap_creates_default_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        let default = registry.get(DEFAULT_AGENT_ID).unwrap();
        assert!(default.is_built_in);
        assert!(dir.path().join("torbo.json").exists());
    }

    #[test]
    fn create_rejects_bad_slug_and_builtin_flag() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());

        let bad = Agent::new("Not A Slug", "X");
        assert!(matches!(
            registry.create(bad),
            Err(Error::InvalidAgentId(_))
        ));

        let mut sneaky = Agent::new("sneaky", "Sneaky");
        sneaky.is_built_in = true;
        assert!(matches!(
            registry.create(sneaky),
            Err(Error::BuiltInProtected(_))
        ));
    }

    #[test]
    fn create_conflict_on_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        registry.create(Agent::new("dup", "Dup")).unwrap();
        assert!(matches!(
            registry.create(Agent::new("dup", "Dup 2")),
            Err(Error::AgentExists(_))
        ));
    }

    #[test]
    fn update_preserves_builtin_flag() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());

        let mut default = registry.get(DEFAULT_AGENT_ID).unwrap();
        default.is_built_in = false; // hostile input
        default.voice_tone = "custom".into();
        let updated = registry.update(default).unwrap();
        assert!(updated.is_built_in);

        // And the flag survives a reload from disk.
        drop(registry);
        let reloaded = open(dir.path());
        assert!(reloaded.get(DEFAULT_AGENT_ID).unwrap().is_built_in);
    }

    #[test]
    fn delete_builtin_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        assert!(matches!(
            registry.delete(DEFAULT_AGENT_ID),
            Err(Error::BuiltInProtected(_))
        ));
        assert!(matches!(
            registry.delete("ghost"),
            Err(Error::AgentNotFound(_))
        ));
    }

    #[test]
    fn delete_revokes_grants() {
        struct CountingRevoker(AtomicUsize);
        impl GrantRevoker for CountingRevoker {
            fn revoke_all(&self, _agent_id: &str) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let revoker = Arc::new(CountingRevoker(AtomicUsize::new(0)));
        let registry = AgentRegistry::load(dir.path(), Some(revoker.clone())).unwrap();
        registry.create(Agent::new("temp", "Temp")).unwrap();
        registry.delete("temp").unwrap();
        assert_eq!(revoker.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn list_orders_default_first_then_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        registry.create(Agent::new("zeta", "zeta")).unwrap();
        registry.create(Agent::new("alpha", "Alpha")).unwrap();

        let names: Vec<String> = registry.list().into_iter().map(|a| a.id).collect();
        assert_eq!(names, vec!["torbo", "alpha", "zeta"]);
    }

    #[test]
    fn import_forces_user_flag_and_blocks_builtin_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());

        let mut foreign = Agent::new("visitor", "Visitor");
        foreign.is_built_in = true;
        let bytes = serde_json::to_vec(&foreign).unwrap();
        let imported = registry.import(&bytes).unwrap();
        assert!(!imported.is_built_in);

        let mut clobber = Agent::new(DEFAULT_AGENT_ID, "Evil Torbo");
        clobber.is_built_in = false;
        let bytes = serde_json::to_vec(&clobber).unwrap();
        assert!(matches!(
            registry.import(&bytes),
            Err(Error::BuiltInProtected(_))
        ));
    }

    #[test]
    fn builtin_upgrade_preserves_customization_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = open(dir.path());
            let mut agent = registry.get(DEFAULT_AGENT_ID).unwrap();
            // A previously-shipped default plus a user customization.
            agent.voice_tone = "Friendly and helpful.".into();
            agent.custom_instructions = "never use emoji".into();
            registry.update(agent).unwrap();
        }

        let registry = open(dir.path());
        let agent = registry.get(DEFAULT_AGENT_ID).unwrap();
        assert_ne!(agent.voice_tone, "Friendly and helpful.");
        assert_eq!(agent.custom_instructions, "never use emoji");
    }

    #[test]
    fn undecodable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();
        let registry = open(dir.path());
        assert!(registry.get("broken").is_none());
        assert!(registry.get(DEFAULT_AGENT_ID).is_some());
    }

    #[test]
    fn export_is_pretty_sorted_json() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        let bytes = registry.export(DEFAULT_AGENT_ID).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let access = text.find("\"accessLevel\"").unwrap();
        let voice = text.find("\"voiceTone\"").unwrap();
        assert!(access < voice);
    }
}

//! Legacy structured memory.
//!
//! Four small, human-editable documents kept separate from the vector
//! index: `identity`, `user`, `knowledge`, `working`. High precedence —
//! when non-empty they are always surfaced in the system prompt. Each
//! document is one pretty-printed JSON file under `memory/`, written
//! atomically.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use tb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Documents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityDoc {
    pub name: String,
    pub personality: String,
    pub voice_style: String,
    pub origin: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDoc {
    pub name: String,
    pub location: String,
    pub timezone: String,
    pub occupation: String,
    pub preferences: HashMap<String, String>,
    pub family: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeDoc {
    pub facts: Vec<String>,
    /// Project name → status.
    pub projects: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkingDoc {
    pub current_topic: String,
    pub recent_topics: Vec<String>,
    pub pending_tasks: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// The delta the Librarian applies after an exchange.
#[derive(Debug, Clone, Default)]
pub struct StructuredUpdate {
    /// Merged into `user.preferences`.
    pub preferences: HashMap<String, String>,
    /// Merged into `knowledge.projects` (status replace per project).
    pub projects: HashMap<String, String>,
    /// Replaces `working.current_topic`; the old topic rotates into the
    /// recent-topics ring.
    pub current_topic: Option<String>,
    /// Set-union into `working.pending_tasks`.
    pub pending_tasks: Vec<String>,
}

impl StructuredUpdate {
    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty()
            && self.projects.is_empty()
            && self.current_topic.is_none()
            && self.pending_tasks.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
struct Docs {
    identity: IdentityDoc,
    user: UserDoc,
    knowledge: KnowledgeDoc,
    working: WorkingDoc,
}

pub struct StructuredMemory {
    dir: PathBuf,
    docs: RwLock<Docs>,
    recent_topics_cap: usize,
}

impl StructuredMemory {
    /// Load the four documents from `dir`. A missing or unreadable file
    /// falls back to the empty document with a warning.
    pub fn load(dir: &Path, recent_topics_cap: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let docs = Docs {
            identity: read_doc(dir, "identity.json"),
            user: read_doc(dir, "user.json"),
            knowledge: read_doc(dir, "knowledge.json"),
            working: read_doc(dir, "working.json"),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            docs: RwLock::new(docs),
            recent_topics_cap,
        })
    }

    pub fn identity(&self) -> IdentityDoc {
        self.docs.read().identity.clone()
    }

    pub fn user(&self) -> UserDoc {
        self.docs.read().user.clone()
    }

    pub fn knowledge(&self) -> KnowledgeDoc {
        self.docs.read().knowledge.clone()
    }

    pub fn working(&self) -> WorkingDoc {
        self.docs.read().working.clone()
    }

    /// Apply an extraction delta: preferences and project status merge,
    /// current topic replaces (rotating the old one into the ring buffer),
    /// pending tasks set-union.
    pub fn apply(&self, update: StructuredUpdate) {
        if update.is_empty() {
            return;
        }

        {
            let mut docs = self.docs.write();

            for (key, value) in update.preferences {
                docs.user.preferences.insert(key, value);
            }
            for (name, status) in update.projects {
                docs.knowledge.projects.insert(name, status);
            }
            if let Some(topic) = update.current_topic {
                let old = std::mem::replace(&mut docs.working.current_topic, topic);
                if !old.is_empty() && old != docs.working.current_topic {
                    docs.working.recent_topics.insert(0, old);
                    docs.working.recent_topics.truncate(self.recent_topics_cap);
                }
            }
            for task in update.pending_tasks {
                if !docs.working.pending_tasks.contains(&task) {
                    docs.working.pending_tasks.push(task);
                }
            }
            docs.working.last_updated = Some(Utc::now());
        }

        self.persist();
    }

    /// Append a standalone fact to the knowledge document.
    pub fn add_fact(&self, fact: &str) {
        {
            let mut docs = self.docs.write();
            if !docs.knowledge.facts.iter().any(|f| f == fact) {
                docs.knowledge.facts.push(fact.to_string());
            }
        }
        self.persist();
    }

    /// Render the always-include prompt block. `None` when every document
    /// is empty.
    pub fn render_block(&self) -> Option<String> {
        let docs = self.docs.read();
        let mut out = String::new();

        if docs.identity != IdentityDoc::default() {
            out.push_str("Identity:\n");
            push_field(&mut out, "name", &docs.identity.name);
            push_field(&mut out, "personality", &docs.identity.personality);
            push_field(&mut out, "voice", &docs.identity.voice_style);
            push_field(&mut out, "origin", &docs.identity.origin);
        }

        if docs.user != UserDoc::default() {
            out.push_str("User:\n");
            push_field(&mut out, "name", &docs.user.name);
            push_field(&mut out, "location", &docs.user.location);
            push_field(&mut out, "timezone", &docs.user.timezone);
            push_field(&mut out, "occupation", &docs.user.occupation);
            for (key, value) in sorted(&docs.user.preferences) {
                out.push_str(&format!("- prefers {key}: {value}\n"));
            }
            for member in &docs.user.family {
                out.push_str(&format!("- family: {member}\n"));
            }
        }

        if docs.knowledge != KnowledgeDoc::default() {
            out.push_str("Knowledge:\n");
            for fact in &docs.knowledge.facts {
                out.push_str(&format!("- {fact}\n"));
            }
            for (name, status) in sorted(&docs.knowledge.projects) {
                out.push_str(&format!("- project {name}: {status}\n"));
            }
        }

        if docs.working != WorkingDoc::default() {
            out.push_str("Working:\n");
            push_field(&mut out, "current topic", &docs.working.current_topic);
            if !docs.working.recent_topics.is_empty() {
                out.push_str(&format!(
                    "- recent: {}\n",
                    docs.working.recent_topics.join(", ")
                ));
            }
            for task in &docs.working.pending_tasks {
                out.push_str(&format!("- pending: {task}\n"));
            }
        }

        if out.is_empty() {
            None
        } else {
            Some(out.trim_end().to_string())
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    /// Write all four documents (atomic per file); failures log and stay
    /// local.
    fn persist(&self) {
        let docs = self.docs.read().clone();
        for (name, json) in [
            ("identity.json", to_pretty(&docs.identity)),
            ("user.json", to_pretty(&docs.user)),
            ("knowledge.json", to_pretty(&docs.knowledge)),
            ("working.json", to_pretty(&docs.working)),
        ] {
            let json = match json {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(doc = name, error = %e, "structured memory serialization failed");
                    continue;
                }
            };
            if let Err(e) = write_atomic(&self.dir, name, &json) {
                tracing::warn!(doc = name, error = %e, "structured memory write failed");
            }
        }
    }
}

fn push_field(out: &mut String, label: &str, value: &str) {
    if !value.is_empty() {
        out.push_str(&format!("- {label}: {value}\n"));
    }
}

fn sorted(map: &HashMap<String, String>) -> Vec<(&String, &String)> {
    let mut pairs: Vec<_> = map.iter().collect();
    pairs.sort_by_key(|(k, _)| k.as_str());
    pairs
}

fn read_doc<T: DeserializeOwned + Default>(dir: &Path, name: &str) -> T {
    let path = dir.join(name);
    if !path.exists() {
        return T::default();
    }
    match std::fs::read_to_string(&path)
        .map_err(Error::Io)
        .and_then(|raw| serde_json::from_str(&raw).map_err(Error::Json))
    {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "structured memory file unreadable, using empty doc");
            T::default()
        }
    }
}

fn to_pretty<T: Serialize>(doc: &T) -> Result<String> {
    let value = serde_json::to_value(doc)?;
    let mut out = serde_json::to_string_pretty(&value)?;
    out.push('\n');
    Ok(out)
}

fn write_atomic(dir: &Path, name: &str, content: &str) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(dir.join(name)).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

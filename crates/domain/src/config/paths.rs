use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data root & sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Application-support root. `agents/`, `memory/`, and `skills/` live
    /// under it.
    #[serde(default = "d_root")]
    pub root: PathBuf,
    /// Global sandbox: absolute directories agents may be scoped to.
    /// Empty = unrestricted within the host account.
    #[serde(default)]
    pub sandbox: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: d_root(),
            sandbox: Vec::new(),
        }
    }
}

impl PathsConfig {
    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("skills")
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_root() -> PathBuf {
    PathBuf::from("./data")
}

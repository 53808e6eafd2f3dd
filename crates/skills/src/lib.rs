//! `tb-skills` — the skill catalog the prompt assembler and router consume.
//!
//! Skills are declared in `skills/*.toml` under the data root. The registry
//! answers two questions: which skills may appear in an agent's system
//! prompt, and what access level a tool named in a request requires.

pub mod registry;
pub mod types;

pub use registry::SkillsRegistry;
pub use types::SkillEntry;

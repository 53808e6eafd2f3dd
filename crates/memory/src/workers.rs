//! Background memory workers.
//!
//! A bounded FIFO queue feeds a small pool of long-running tasks. The
//! request path only ever calls [`JobQueue::enqueue`] (non-blocking,
//! fire-and-forget); extraction, compression, and decay all happen off the
//! hot path. Delivery is at-least-once — the index dedups by content hash,
//! so a replayed job is harmless, and a full queue drops the job with a
//! warning instead of applying backpressure.
//!
//! Record lifecycle: candidate → indexed → (accessed | decayed)* →
//! compressed | evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};

use tb_domain::config::MemoryConfig;
use tb_domain::error::{Error, Result};

use crate::index::{MemoryCategory, MemoryIndex};
use crate::structured::{StructuredMemory, StructuredUpdate};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LocalModel — the small model the workers drive
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Completion capability backed by the local inference daemon. Extraction
/// and compression both go through it; it never points at a cloud
/// provider.
#[async_trait]
pub trait LocalModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub enum MemoryJob {
    /// Librarian input: one completed exchange.
    Extract {
        user_text: String,
        assistant_text: String,
        model: String,
    },
}

/// Cloneable sending half handed to the router.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<MemoryJob>,
}

impl JobQueue {
    /// Create a queue of the given depth. The receiver goes to
    /// [`spawn_workers`].
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<MemoryJob>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Non-blocking enqueue. A full queue drops the job — losing one
    /// extraction is acceptable, stalling a response is not.
    pub fn enqueue(&self, job: MemoryJob) {
        if let Err(e) = self.tx.try_send(job) {
            tracing::warn!(error = %e, "memory job queue full, dropping extract job");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawn the worker pool. Each worker loops on the shared receiver and
/// runs the Librarian for every job. Failures log and drop the job; there
/// is no poison queue.
pub fn spawn_workers(
    rx: mpsc::Receiver<MemoryJob>,
    index: Arc<MemoryIndex>,
    structured: Arc<StructuredMemory>,
    model: Arc<dyn LocalModel>,
    config: MemoryConfig,
) {
    let rx = Arc::new(Mutex::new(rx));
    let workers = config.workers.max(1);
    for worker_id in 0..workers {
        let rx = rx.clone();
        let index = index.clone();
        let structured = structured.clone();
        let model = model.clone();
        let timeout = Duration::from_secs(config.extract_timeout_secs);
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(job) = job else {
                    tracing::debug!(worker_id, "memory job queue closed, worker exiting");
                    break;
                };
                match job {
                    MemoryJob::Extract {
                        user_text,
                        assistant_text,
                        ..
                    } => {
                        let result = tokio::time::timeout(
                            timeout,
                            librarian(&index, &structured, model.as_ref(), &user_text, &assistant_text),
                        )
                        .await;
                        match result {
                            Ok(Ok(indexed)) => {
                                tracing::debug!(worker_id, indexed, "librarian pass complete");
                            }
                            Ok(Err(e)) => {
                                tracing::warn!(worker_id, error = %e, "memory extraction failed, dropping job");
                            }
                            Err(_) => {
                                tracing::warn!(worker_id, "memory extraction timed out, dropping job");
                            }
                        }
                    }
                }
            }
        });
    }
    tracing::info!(workers, "memory worker pool started");
}

/// Spawn the periodic decay + compression maintenance task.
pub fn spawn_maintenance(
    index: Arc<MemoryIndex>,
    model: Arc<dyn LocalModel>,
    config: MemoryConfig,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(86_400));
        // First tick fires immediately; skip it so a restart loop does not
        // re-run maintenance every boot.
        interval.tick().await;
        loop {
            interval.tick().await;

            let factor = 0.5f64.powf(1.0 / config.decay_half_life_days.max(0.1));
            index.decay(factor);

            if index.over_high_water(config.compress_high_water) {
                match run_compression(&index, model.as_ref(), &config).await {
                    Ok(merged) => {
                        tracing::info!(merged, "memory compression pass complete")
                    }
                    Err(e) => tracing::warn!(error = %e, "memory compression failed"),
                }
            }
        }
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Librarian — extract and index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const EXTRACT_SYSTEM_PROMPT: &str = "\
You extract long-term memory from one chat exchange. Reply with ONLY a JSON \
object, no prose, with these keys:
  \"facts\": array of short standalone facts about the user or their world,
  \"preferences\": object of user preferences (key: topic, value: preference),
  \"projects\": object of project name to current status,
  \"currentTopic\": string, what the conversation is about now,
  \"pendingTasks\": array of tasks the user still intends to do.
Use empty arrays/objects when nothing qualifies. Never invent details.";

/// What the extraction model returns, camelCase on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Extraction {
    facts: Vec<String>,
    preferences: HashMap<String, String>,
    projects: HashMap<String, String>,
    current_topic: Option<String>,
    pending_tasks: Vec<String>,
}

/// One Librarian pass: extract candidates from the exchange and index
/// them; apply the structured-memory delta in the same pass. Returns the
/// number of newly indexed records.
async fn librarian(
    index: &MemoryIndex,
    structured: &StructuredMemory,
    model: &dyn LocalModel,
    user_text: &str,
    assistant_text: &str,
) -> Result<usize> {
    let exchange = format!("USER:\n{user_text}\n\nASSISTANT:\n{assistant_text}");
    let raw = model.complete(EXTRACT_SYSTEM_PROMPT, &exchange).await?;
    let extraction = parse_extraction(&raw)?;

    let mut indexed = 0;
    for fact in &extraction.facts {
        if fact.trim().is_empty() {
            continue;
        }
        if !index
            .add(fact, MemoryCategory::Fact, "librarian", 0.6)
            .await?
            .duplicate
        {
            indexed += 1;
        }
    }
    for (topic, preference) in &extraction.preferences {
        let text = format!("{topic}: {preference}");
        if !index
            .add(&text, MemoryCategory::Preference, "librarian", 0.7)
            .await?
            .duplicate
        {
            indexed += 1;
        }
    }
    for (name, status) in &extraction.projects {
        let text = format!("project {name}: {status}");
        if !index
            .add(&text, MemoryCategory::Project, "librarian", 0.6)
            .await?
            .duplicate
        {
            indexed += 1;
        }
    }

    structured.apply(StructuredUpdate {
        preferences: extraction.preferences,
        projects: extraction.projects,
        current_topic: extraction
            .current_topic
            .filter(|t| !t.trim().is_empty()),
        pending_tasks: extraction.pending_tasks,
    });

    Ok(indexed)
}

/// Parse the model reply, tolerating markdown code fences.
fn parse_extraction(raw: &str) -> Result<Extraction> {
    let trimmed = raw.trim();
    let body = if let Some(stripped) = trimmed.strip_prefix("```") {
        let stripped = stripped.strip_prefix("json").unwrap_or(stripped);
        stripped.trim_end_matches("```").trim()
    } else {
        trimmed
    };
    serde_json::from_str(body)
        .map_err(|e| Error::Other(format!("extraction reply was not valid JSON: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Searcher — retrieve for injection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Format the top memories for the current turn as an injectable block.
/// The query is expanded with the tail of the conversation. `None` when
/// nothing clears `min_score`.
pub async fn retrieve_block(
    index: &MemoryIndex,
    user_message: &str,
    conversation_tail: &[String],
    top_k: usize,
    min_score: f32,
) -> Result<Option<String>> {
    let mut query = user_message.to_string();
    for turn in conversation_tail.iter().rev().take(3) {
        query.push('\n');
        query.push_str(turn);
    }

    let hits = index.search(&query, top_k, min_score).await?;
    if hits.is_empty() {
        return Ok(None);
    }

    let mut block = String::from("Relevant memories:\n");
    for hit in &hits {
        block.push_str(&format!(
            "- [{}] {}\n",
            hit.record.category.as_str(),
            hit.record.text
        ));
    }
    Ok(Some(block.trim_end().to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compressor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const COMPRESS_SYSTEM_PROMPT: &str = "\
You compact a list of memory facts. Merge related facts, drop stale or \
trivial ones. Reply with ONLY a JSON array of strings; aim for well under \
half the input count.";

/// One compression pass: evict dead records, then merge the oldest facts
/// into `compressed` survivors. Returns the number of merged records
/// inserted.
pub async fn run_compression(
    index: &MemoryIndex,
    model: &dyn LocalModel,
    config: &MemoryConfig,
) -> Result<usize> {
    // Eviction first: decayed below the floor and effectively unread.
    let dead = index.eviction_candidates(config.importance_floor, 2);
    if !dead.is_empty() {
        let evicted = index.remove_batch(&dead);
        tracing::info!(evicted, "evicted decayed memories");
    }

    let oldest = index.oldest_facts(config.compress_batch);
    if oldest.len() < 2 {
        return Ok(0);
    }

    let listing = oldest
        .iter()
        .map(|r| format!("- {}", r.text))
        .collect::<Vec<_>>()
        .join("\n");
    let raw = model.complete(COMPRESS_SYSTEM_PROMPT, &listing).await?;
    let merged = parse_string_array(&raw)?;
    if merged.is_empty() {
        return Ok(0);
    }

    let ids: Vec<u64> = oldest.iter().map(|r| r.id).collect();
    index.replace_with_compressed(&ids, merged).await
}

fn parse_string_array(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();
    let body = if let Some(stripped) = trimmed.strip_prefix("```") {
        let stripped = stripped.strip_prefix("json").unwrap_or(stripped);
        stripped.trim_end_matches("```").trim()
    } else {
        trimmed
    };
    serde_json::from_str(body)
        .map_err(|e| Error::Other(format!("compression reply was not a JSON array: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use std::path::Path;

    struct ScriptedModel(String);

    #[async_trait]
    impl LocalModel for ScriptedModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn open_index(dir: &Path) -> Arc<MemoryIndex> {
        Arc::new(
            MemoryIndex::load(
                &dir.join("index.json"),
                Arc::new(HashEmbedder::new(128)),
                4096,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn librarian_indexes_candidates_and_updates_structured() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let structured = Arc::new(StructuredMemory::load(dir.path(), 20).unwrap());
        let model = ScriptedModel(
            r#"{
                "facts": ["user lives in Lisbon"],
                "preferences": {"coffee": "espresso"},
                "projects": {"gateway": "building"},
                "currentTopic": "memory pipelines",
                "pendingTasks": ["write tests"]
            }"#
            .into(),
        );

        let indexed = librarian(&index, &structured, &model, "hi", "hello").await.unwrap();
        assert_eq!(indexed, 3);
        assert_eq!(index.count(), 3);
        assert_eq!(structured.working().current_topic, "memory pipelines");
        assert_eq!(structured.working().pending_tasks, vec!["write tests"]);

        // Replayed job is a no-op thanks to hash dedup (at-least-once is
        // safe).
        let again = librarian(&index, &structured, &model, "hi", "hello").await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(index.count(), 3);
    }

    #[tokio::test]
    async fn librarian_tolerates_fenced_json() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let structured = Arc::new(StructuredMemory::load(dir.path(), 20).unwrap());
        let model = ScriptedModel(
            "```json\n{\"facts\": [\"fenced fact\"], \"preferences\": {}, \"projects\": {}, \"currentTopic\": \"\", \"pendingTasks\": []}\n```".into(),
        );

        let indexed = librarian(&index, &structured, &model, "u", "a").await.unwrap();
        assert_eq!(indexed, 1);
    }

    #[tokio::test]
    async fn librarian_drops_garbage_replies() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let structured = Arc::new(StructuredMemory::load(dir.path(), 20).unwrap());
        let model = ScriptedModel("I could not find anything.".into());

        assert!(librarian(&index, &structured, &model, "u", "a").await.is_err());
        assert_eq!(index.count(), 0);
    }

    #[tokio::test]
    async fn retrieve_block_formats_hits() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        index
            .add("user likes espresso", MemoryCategory::Preference, "t", 0.8)
            .await
            .unwrap();

        let block = retrieve_block(&index, "what coffee do I like, espresso?", &[], 5, 0.0)
            .await
            .unwrap()
            .unwrap();
        assert!(block.starts_with("Relevant memories:"));
        assert!(block.contains("[preference] user likes espresso"));

        let none = retrieve_block(&index, "espresso", &[], 5, 0.999)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn compression_merges_oldest_facts() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        for i in 0..4 {
            index
                .add(
                    &format!("standalone fact number {i}"),
                    MemoryCategory::Fact,
                    "t",
                    0.5,
                )
                .await
                .unwrap();
        }

        let model = ScriptedModel(r#"["facts zero through three, condensed"]"#.into());
        let config = MemoryConfig {
            compress_batch: 4,
            ..Default::default()
        };
        let merged = run_compression(&index, &model, &config).await.unwrap();

        assert_eq!(merged, 1);
        assert_eq!(index.count(), 1);
        assert_eq!(index.count_in(MemoryCategory::Compressed), 1);
    }

    #[tokio::test]
    async fn queue_drops_when_full() {
        let (queue, mut rx) = JobQueue::new(1);
        queue.enqueue(MemoryJob::Extract {
            user_text: "a".into(),
            assistant_text: "b".into(),
            model: "m".into(),
        });
        // Queue depth is 1; the second enqueue drops silently.
        queue.enqueue(MemoryJob::Extract {
            user_text: "c".into(),
            assistant_text: "d".into(),
            model: "m".into(),
        });

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn worker_pool_processes_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let structured = Arc::new(StructuredMemory::load(dir.path(), 20).unwrap());
        let model: Arc<dyn LocalModel> = Arc::new(ScriptedModel(
            r#"{"facts": ["worker indexed this"], "preferences": {}, "projects": {}, "currentTopic": "", "pendingTasks": []}"#.into(),
        ));

        let (queue, rx) = JobQueue::new(8);
        spawn_workers(
            rx,
            index.clone(),
            structured,
            model,
            MemoryConfig::default(),
        );

        queue.enqueue(MemoryJob::Extract {
            user_text: "u".into(),
            assistant_text: "a".into(),
            model: "m".into(),
        });

        // Poll until the background worker lands the record.
        for _ in 0..50 {
            if index.count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(index.count(), 1);
    }
}

//! Vector memory index.
//!
//! In-memory records behind `parking_lot::RwLock`, embeddings fetched from
//! the injected [`Embedder`] before any lock is taken. Dedup is by content
//! hash of the normalized text, so repeated extraction of the same fact is
//! idempotent. The index snapshots itself to `memory/index.json` (atomic
//! write); the snapshot format is internal.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tb_domain::error::{Error, Result};

use crate::embed::Embedder;

/// Hard cap on stored memory text.
const MAX_TEXT_BYTES: usize = 2048;

/// Importance bump applied when a record is returned by search.
const ACCESS_BOOST: f64 = 0.05;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Fact,
    Preference,
    Project,
    Identity,
    Working,
    Compressed,
    Manual,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Fact => "fact",
            MemoryCategory::Preference => "preference",
            MemoryCategory::Project => "project",
            MemoryCategory::Identity => "identity",
            MemoryCategory::Working => "working",
            MemoryCategory::Compressed => "compressed",
            MemoryCategory::Manual => "manual",
        }
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fact" => Ok(MemoryCategory::Fact),
            "preference" => Ok(MemoryCategory::Preference),
            "project" => Ok(MemoryCategory::Project),
            "identity" => Ok(MemoryCategory::Identity),
            "working" => Ok(MemoryCategory::Working),
            "compressed" => Ok(MemoryCategory::Compressed),
            "manual" => Ok(MemoryCategory::Manual),
            other => Err(Error::Other(format!("unknown memory category '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: u64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub category: MemoryCategory,
    pub source: String,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(default)]
    pub access_count: u32,
    pub last_accessed: DateTime<Utc>,
}

/// A search hit with its cosine similarity.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub record: MemoryRecord,
    pub score: f32,
}

/// Outcome of an `add` call.
#[derive(Debug, Clone, Copy)]
pub struct AddOutcome {
    pub id: u64,
    /// True when the text deduplicated to an existing record.
    pub duplicate: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vector math
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` on mismatched lengths or a
/// zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryIndex
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    next_id: u64,
    records: Vec<MemoryRecord>,
    /// Hash → record id, rebuilt at load.
    #[serde(skip)]
    by_hash: HashMap<String, u64>,
}

pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    path: PathBuf,
    max_entries: usize,
    inner: RwLock<IndexState>,
}

impl MemoryIndex {
    /// Load the snapshot at `path` (or start empty) with the given
    /// embedder. Records whose embedding length does not match the
    /// embedder's dimensionality are dropped with a warning.
    pub fn load(path: &Path, embedder: Arc<dyn Embedder>, max_entries: usize) -> Result<Self> {
        let mut state = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<IndexState>(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "memory index snapshot unreadable, starting empty");
                IndexState::default()
            })
        } else {
            IndexState::default()
        };

        let dim = embedder.dim();
        let before = state.records.len();
        state.records.retain(|r| r.embedding.len() == dim);
        if state.records.len() < before {
            tracing::warn!(
                dropped = before - state.records.len(),
                dim,
                "dropped memory records with stale embedding dimensionality"
            );
        }

        state.by_hash = state
            .records
            .iter()
            .map(|r| (r.content_hash.clone(), r.id))
            .collect();

        tracing::info!(
            records = state.records.len(),
            path = %path.display(),
            "memory index loaded"
        );
        Ok(Self {
            embedder,
            path: path.to_path_buf(),
            max_entries,
            inner: RwLock::new(state),
        })
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Insert a memory. Idempotent by content hash: adding text whose
    /// normalized hash already exists returns the existing id.
    pub async fn add(
        &self,
        text: &str,
        category: MemoryCategory,
        source: &str,
        importance: f64,
    ) -> Result<AddOutcome> {
        let text = clamp_text(text);
        let hash = content_hash(&text);

        if let Some(&id) = self.inner.read().by_hash.get(&hash) {
            return Ok(AddOutcome {
                id,
                duplicate: true,
            });
        }

        // Embed outside the lock; a racing duplicate insert is resolved by
        // re-checking the hash under the write lock below.
        let embedding = self.embedder.embed(&text).await?;
        if embedding.len() != self.embedder.dim() {
            return Err(Error::EmbeddingDim {
                expected: self.embedder.dim(),
                got: embedding.len(),
            });
        }

        let id = {
            let mut inner = self.inner.write();
            if let Some(&id) = inner.by_hash.get(&hash) {
                return Ok(AddOutcome {
                    id,
                    duplicate: true,
                });
            }
            let id = inner.next_id;
            inner.next_id += 1;
            let now = Utc::now();
            inner.records.push(MemoryRecord {
                id,
                text,
                embedding,
                category,
                source: source.to_string(),
                importance: importance.clamp(0.0, 1.0),
                created_at: now,
                content_hash: hash.clone(),
                access_count: 0,
                last_accessed: now,
            });
            inner.by_hash.insert(hash, id);
            id
        };

        self.persist();
        Ok(AddOutcome {
            id,
            duplicate: false,
        })
    }

    pub fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let before = inner.records.len();
            inner.records.retain(|r| r.id != id);
            if inner.records.len() < before {
                inner.by_hash.retain(|_, v| *v != id);
                true
            } else {
                false
            }
        };
        if removed {
            self.persist();
        }
        removed
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Top-K by cosine similarity, filtered to `score >= min_score`,
    /// descending; ties broken by importance then recency. Returned
    /// records get an access boost.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>> {
        let query_embedding = self.embedder.embed(query).await?;

        let mut hits: Vec<ScoredMemory> = {
            let inner = self.inner.read();
            inner
                .records
                .iter()
                .map(|r| ScoredMemory {
                    score: cosine_similarity(&query_embedding, &r.embedding),
                    record: r.clone(),
                })
                .filter(|s| s.score >= min_score)
                .collect()
        };

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.record
                        .importance
                        .partial_cmp(&a.record.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        });
        hits.truncate(top_k);

        // Access boost: reading a memory keeps it alive.
        if !hits.is_empty() {
            let now = Utc::now();
            let ids: Vec<u64> = hits.iter().map(|s| s.record.id).collect();
            let mut inner = self.inner.write();
            for record in inner.records.iter_mut().filter(|r| ids.contains(&r.id)) {
                record.access_count += 1;
                record.last_accessed = now;
                record.importance = (record.importance + ACCESS_BOOST).min(1.0);
            }
        }

        Ok(hits)
    }

    pub fn count(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn category_counts(&self) -> HashMap<String, usize> {
        let inner = self.inner.read();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in &inner.records {
            *counts.entry(record.category.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_in(&self, category: MemoryCategory) -> usize {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| r.category == category)
            .count()
    }

    pub fn over_high_water(&self, high_water: usize) -> bool {
        self.count_in(MemoryCategory::Fact) > high_water || self.count() > self.max_entries
    }

    /// The `n` oldest fact records, for the compression pass.
    pub fn oldest_facts(&self, n: usize) -> Vec<MemoryRecord> {
        let inner = self.inner.read();
        let mut facts: Vec<MemoryRecord> = inner
            .records
            .iter()
            .filter(|r| r.category == MemoryCategory::Fact)
            .cloned()
            .collect();
        facts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        facts.truncate(n);
        facts
    }

    // ── Maintenance (driven by the workers) ─────────────────────────

    /// Multiply every importance by `factor` (≤ 1.0). Decay never raises a
    /// score; access boosts are the only upward path.
    pub fn decay(&self, factor: f64) {
        {
            let mut inner = self.inner.write();
            for record in &mut inner.records {
                record.importance = (record.importance * factor).max(0.0);
            }
        }
        self.persist();
    }

    /// Records eligible for eviction at the next compression pass:
    /// importance below `floor` and fewer than `min_reads` accesses.
    pub fn eviction_candidates(&self, floor: f64, min_reads: u32) -> Vec<u64> {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| r.importance < floor && r.access_count < min_reads)
            .map(|r| r.id)
            .collect()
    }

    /// Atomically replace `original_ids` with pre-embedded `compressed`
    /// records (category forced to `compressed`).
    pub async fn replace_with_compressed(
        &self,
        original_ids: &[u64],
        merged_texts: Vec<String>,
    ) -> Result<usize> {
        // Embed the survivors before taking the write lock.
        let mut prepared: Vec<(String, String, Vec<f32>)> = Vec::new();
        for text in merged_texts {
            let text = clamp_text(&text);
            let hash = content_hash(&text);
            let embedding = self.embedder.embed(&text).await?;
            prepared.push((text, hash, embedding));
        }

        let inserted = {
            let mut inner = self.inner.write();

            inner.records.retain(|r| !original_ids.contains(&r.id));
            inner.by_hash.retain(|_, id| !original_ids.contains(id));

            let mut inserted = 0;
            let now = Utc::now();
            for (text, hash, embedding) in prepared {
                if inner.by_hash.contains_key(&hash) {
                    continue;
                }
                let id = inner.next_id;
                inner.next_id += 1;
                inner.records.push(MemoryRecord {
                    id,
                    text,
                    embedding,
                    category: MemoryCategory::Compressed,
                    source: "compressor".into(),
                    importance: 0.5,
                    created_at: now,
                    content_hash: hash.clone(),
                    access_count: 0,
                    last_accessed: now,
                });
                inner.by_hash.insert(hash, id);
                inserted += 1;
            }
            inserted
        };

        self.persist();
        Ok(inserted)
    }

    /// Remove a batch of ids (eviction). Returns how many were removed.
    pub fn remove_batch(&self, ids: &[u64]) -> usize {
        let removed = {
            let mut inner = self.inner.write();
            let before = inner.records.len();
            inner.records.retain(|r| !ids.contains(&r.id));
            inner.by_hash.retain(|_, id| !ids.contains(id));
            before - inner.records.len()
        };
        if removed > 0 {
            self.persist();
        }
        removed
    }

    // ── Private ──────────────────────────────────────────────────────

    /// Snapshot to disk. I/O failures are logged, never propagated — the
    /// in-memory index stays authoritative.
    fn persist(&self) {
        let json = {
            let inner = self.inner.read();
            match serde_json::to_string(&*inner) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "memory index serialization failed");
                    return;
                }
            }
        };
        let write = || -> Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
                let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
                tmp.write_all(json.as_bytes())?;
                tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
            }
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(path = %self.path.display(), error = %e, "memory index snapshot failed");
        }
    }
}

fn clamp_text(text: &str) -> String {
    let text = text.trim();
    if text.len() <= MAX_TEXT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_TEXT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Normalized content hash: trimmed, lowercased, SHA-256, hex.
pub fn content_hash(text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    fn open(dir: &Path) -> MemoryIndex {
        MemoryIndex::load(
            &dir.join("index.json"),
            Arc::new(HashEmbedder::new(256)),
            4096,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn add_is_idempotent_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());

        let first = index
            .add("user likes espresso", MemoryCategory::Preference, "test", 0.8)
            .await
            .unwrap();
        let second = index
            .add("user likes espresso", MemoryCategory::Preference, "test", 0.8)
            .await
            .unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.id, second.id);
        assert_eq!(index.count(), 1);

        let hits = index.search("coffee espresso", 5, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn normalization_dedups_case_and_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        index
            .add("User Likes Espresso", MemoryCategory::Fact, "test", 0.5)
            .await
            .unwrap();
        let outcome = index
            .add("  user likes espresso  ", MemoryCategory::Fact, "test", 0.5)
            .await
            .unwrap();
        assert!(outcome.duplicate);
        assert_eq!(index.count(), 1);
    }

    #[tokio::test]
    async fn search_orders_by_score_then_importance() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());

        index
            .add("espresso in the morning", MemoryCategory::Fact, "t", 0.2)
            .await
            .unwrap();
        index
            .add("espresso in the evening", MemoryCategory::Fact, "t", 0.9)
            .await
            .unwrap();
        index
            .add("rust borrow checker", MemoryCategory::Fact, "t", 0.9)
            .await
            .unwrap();

        let hits = index.search("espresso", 10, 0.01).await.unwrap();
        assert!(hits.len() >= 2);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn min_score_filters_and_access_boost_applies() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        index
            .add("espresso machine maintenance", MemoryCategory::Fact, "t", 0.5)
            .await
            .unwrap();

        assert!(index.search("espresso", 5, 0.99).await.unwrap().is_empty());

        let hits = index.search("espresso machine", 5, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        // The boost is applied after scoring, so re-read the record.
        let boosted = index.search("espresso machine", 5, 0.0).await.unwrap();
        assert!(boosted[0].record.importance > 0.5);
        assert!(boosted[0].record.access_count >= 1);
    }

    #[tokio::test]
    async fn remove_and_category_counts() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let outcome = index
            .add("a fact", MemoryCategory::Fact, "t", 0.5)
            .await
            .unwrap();
        index
            .add("a preference", MemoryCategory::Preference, "t", 0.5)
            .await
            .unwrap();

        let counts = index.category_counts();
        assert_eq!(counts.get("fact"), Some(&1));
        assert_eq!(counts.get("preference"), Some(&1));

        assert!(index.remove(outcome.id));
        assert!(!index.remove(outcome.id));
        assert_eq!(index.count(), 1);
    }

    #[tokio::test]
    async fn decay_is_monotone_and_finds_eviction_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        index
            .add("fading fact", MemoryCategory::Fact, "t", 0.2)
            .await
            .unwrap();

        index.decay(0.1);
        let candidates = index.eviction_candidates(0.05, 3);
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn compression_replaces_originals_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let a = index
            .add("fact one", MemoryCategory::Fact, "t", 0.5)
            .await
            .unwrap();
        let b = index
            .add("fact two", MemoryCategory::Fact, "t", 0.5)
            .await
            .unwrap();

        let inserted = index
            .replace_with_compressed(&[a.id, b.id], vec!["facts one and two merged".into()])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(index.count(), 1);
        assert_eq!(index.count_in(MemoryCategory::Compressed), 1);
        assert_eq!(index.count_in(MemoryCategory::Fact), 0);
    }

    #[tokio::test]
    async fn snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = open(dir.path());
            index
                .add("persistent fact", MemoryCategory::Fact, "t", 0.5)
                .await
                .unwrap();
        }
        let index = open(dir.path());
        assert_eq!(index.count(), 1);
        // Dedup map was rebuilt from the snapshot.
        let outcome = index
            .add("persistent fact", MemoryCategory::Fact, "t", 0.5)
            .await
            .unwrap();
        assert!(outcome.duplicate);
    }

    #[tokio::test]
    async fn oversized_text_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let big = "x".repeat(5000);
        index
            .add(&big, MemoryCategory::Manual, "t", 0.5)
            .await
            .unwrap();
        let hits = index.search("x", 1, 0.0).await.unwrap();
        assert!(hits[0].record.text.len() <= 2048);
    }
}

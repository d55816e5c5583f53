//! Persisted vector index with brute-force dot-product search.
//!
//! Entries live in one JSON document. Every mutation reloads the document
//! under its exclusive lock, re-embeds the whole corpus with the current
//! embedder and rewrites it, so vectors always share one dimension and
//! corpus-fit backends always see the full vocabulary.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use limnus_core::document::{CorruptPolicy, JsonDocument};
use limnus_core::error::Result;

use crate::embedder::Embedder;

/// Key read for entry text by `ensure_indexed` callers that have no opinion.
pub const DEFAULT_TEXT_KEY: &str = "text";

/// Key read for entry ids by `ensure_indexed` callers that have no opinion.
pub const DEFAULT_ID_KEY: &str = "id";

/// Keys tried, in order, when an item has no value under the requested id key.
const FALLBACK_ID_KEYS: [&str; 2] = ["ts", "timestamp"];

pub type Metadata = BTreeMap<String, String>;

/// One indexed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A single hit returned from a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Dot product of the query and entry vectors.
    pub score: f64,
    pub entry: VectorEntry,
}

#[derive(Debug)]
pub struct VectorIndex {
    document: JsonDocument<Vec<VectorEntry>>,
    embedder: Embedder,
    entries: Vec<VectorEntry>,
}

impl VectorIndex {
    /// Load the index at `path` and re-embed it with `embedder`.
    ///
    /// The document is rewritten only if a stored vector changed, e.g. after
    /// the configured backend or dimension changed.
    pub fn open(path: impl Into<PathBuf>, embedder: Embedder, policy: CorruptPolicy) -> Result<Self> {
        let document: JsonDocument<Vec<VectorEntry>> = JsonDocument::new(path, policy);
        let entries = document.update(|entries| {
            let before = entries.len();
            dedupe(entries);
            let refreshed = refresh_vectors(&embedder, entries)?;
            Ok(refreshed || entries.len() != before)
        })?;

        info!(
            path = %document.path().display(),
            entries = entries.len(),
            backend = embedder.backend_name(),
            "Vector index opened"
        );
        Ok(Self {
            document,
            embedder,
            entries,
        })
    }

    /// Insert or update the entry `id`.
    ///
    /// An existing entry has its text replaced and `metadata` merged into its
    /// own key by key.
    pub fn upsert(&mut self, text: &str, id: &str, metadata: Metadata) -> Result<()> {
        let embedder = &self.embedder;
        let entries = self.document.update(|entries| {
            dedupe(entries);
            match entries.iter_mut().find(|e| e.id == id) {
                Some(entry) => {
                    entry.text = text.to_string();
                    entry.metadata.extend(metadata);
                }
                None => entries.push(VectorEntry {
                    id: id.to_string(),
                    text: text.to_string(),
                    vector: Vec::new(),
                    metadata,
                }),
            }
            refresh_vectors(embedder, entries)?;
            Ok(true)
        })?;
        self.entries = entries;

        info!(id, entries = self.entries.len(), "Vector entry upserted");
        Ok(())
    }

    /// Bulk-import JSON records, returning how many entries were inserted or
    /// updated.
    ///
    /// Records that are not objects or lack an id or text are skipped. An
    /// existing entry is only touched when its text differs or it does not
    /// already carry the record's metadata. Nothing is written when no entry
    /// changed.
    pub fn ensure_indexed(&mut self, items: &[Value], text_key: &str, id_key: &str) -> Result<usize> {
        let embedder = &self.embedder;
        let mut changed = 0usize;
        let entries = self.document.update(|entries| {
            dedupe(entries);
            for item in items {
                let Some((id, text, metadata)) = extract_record(item, text_key, id_key) else {
                    debug!(item = %item, "Skipping record without id or text");
                    continue;
                };
                match entries.iter_mut().find(|e| e.id == id) {
                    Some(entry) => {
                        let contained = metadata
                            .iter()
                            .all(|(k, v)| entry.metadata.get(k) == Some(v));
                        if entry.text != text || !contained {
                            entry.text = text;
                            entry.metadata.extend(metadata);
                            changed += 1;
                        }
                    }
                    None => {
                        entries.push(VectorEntry {
                            id,
                            text,
                            vector: Vec::new(),
                            metadata,
                        });
                        changed += 1;
                    }
                }
            }
            if changed == 0 {
                return Ok(false);
            }
            refresh_vectors(embedder, entries)?;
            Ok(true)
        })?;
        self.entries = entries;

        if changed > 0 {
            info!(changed, entries = self.entries.len(), "Vector index updated from records");
        }
        Ok(changed)
    }

    /// Rank entries against `query`, best first, at most `top_k` of them.
    ///
    /// Ties keep insertion order.
    pub fn semantic_search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || top_k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = if self.embedder.is_corpus_fit() {
            // Fit corpus and query together so they share one vocabulary.
            let mut texts: Vec<&str> = self.entries.iter().map(|e| e.text.as_str()).collect();
            texts.push(query);
            let mut vectors = self.embedder.embed_many(&texts)?;
            let query_vector = vectors.pop().unwrap_or_default();
            self.entries
                .iter()
                .zip(vectors.iter())
                .map(|(entry, vector)| SearchHit {
                    score: dot(&query_vector, vector),
                    entry: entry.clone(),
                })
                .collect()
        } else {
            let query_vector = self.embedder.embed(query)?;
            self.entries
                .iter()
                .map(|entry| SearchHit {
                    score: dot(&query_vector, &entry.vector),
                    entry: entry.clone(),
                })
                .collect()
        };

        // sort_by is stable, so equal scores stay in insertion order.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);

        debug!(top_k, hits = hits.len(), "Semantic search complete");
        Ok(hits)
    }

    /// Remove the entry `id`. Returns `false` (and writes nothing) if absent.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let mut removed = false;
        let entries = self.document.update(|entries| {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            removed = entries.len() != before;
            Ok(removed)
        })?;
        self.entries = entries;

        if removed {
            info!(id, entries = self.entries.len(), "Vector entry deleted");
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<&VectorEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entries(&self) -> &[VectorEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn path(&self) -> &Path {
        self.document.path()
    }

    /// Replace the in-memory entries with what is on disk.
    ///
    /// Stored vectors are kept unless their dimension differs from the
    /// embedder's (another process wrote them with another backend); then the
    /// corpus is re-embedded in memory. The document is not rewritten.
    pub fn reload(&mut self) -> Result<()> {
        let mut entries = self.document.load()?;
        dedupe(&mut entries);

        let dimensions = self.embedder.dimensions();
        let stale = entries
            .iter()
            .filter(|e| e.vector.len() != dimensions)
            .count();
        if stale > 0 {
            warn!(
                stale,
                dimensions,
                "Stored vectors do not match the embedder, re-embedding"
            );
            refresh_vectors(&self.embedder, &mut entries)?;
        }

        self.entries = entries;
        Ok(())
    }
}

/// Collapse duplicate ids: the first occurrence keeps its position, the last
/// occurrence supplies the content.
fn dedupe(entries: &mut Vec<VectorEntry>) {
    let mut positions: BTreeMap<String, usize> = BTreeMap::new();
    let mut unique: Vec<VectorEntry> = Vec::with_capacity(entries.len());
    for entry in entries.drain(..) {
        match positions.get(&entry.id) {
            Some(&pos) => unique[pos] = entry,
            None => {
                positions.insert(entry.id.clone(), unique.len());
                unique.push(entry);
            }
        }
    }
    *entries = unique;
}

/// Re-embed every entry. Returns whether any stored vector changed.
fn refresh_vectors(embedder: &Embedder, entries: &mut [VectorEntry]) -> Result<bool> {
    if entries.is_empty() {
        return Ok(false);
    }
    let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
    let vectors = embedder.embed_many(&texts)?;

    let mut changed = false;
    for (entry, vector) in entries.iter_mut().zip(vectors) {
        if entry.vector != vector {
            entry.vector = vector;
            changed = true;
        }
    }
    Ok(changed)
}

fn extract_record(item: &Value, text_key: &str, id_key: &str) -> Option<(String, String, Metadata)> {
    let object = item.as_object()?;

    let id = std::iter::once(id_key)
        .chain(FALLBACK_ID_KEYS)
        .find_map(|key| object.get(key).and_then(scalar_text))?;
    let text = object
        .get(text_key)
        .and_then(scalar_text)
        .or_else(|| object.get(DEFAULT_TEXT_KEY).and_then(scalar_text))?;

    let tags = match object.get("tags") {
        Some(Value::Array(tags)) => tags
            .iter()
            .map(|t| t.as_str().map(str::to_string).unwrap_or_else(|| t.to_string()))
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::String(tags)) => tags.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let mut metadata = Metadata::new();
    metadata.insert("tags".to_string(), tags);
    Some((id, text, metadata))
}

/// Non-empty string or number rendered as text.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Dot product, 0.0 when the lengths differ.
fn dot(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

//! Append-only memory journal: raw notes that feed the vector index.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use limnus_core::document::{CorruptPolicy, JsonDocument};
use limnus_core::error::Result;

/// Id key to pass to `VectorIndex::ensure_indexed` for journal items.
pub const JOURNAL_ID_KEY: &str = "ts";

/// One cached memory note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// RFC 3339 UTC timestamp, unique within the journal.
    pub ts: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug)]
pub struct MemoryJournal {
    document: JsonDocument<Vec<MemoryRecord>>,
    records: Vec<MemoryRecord>,
}

impl MemoryJournal {
    pub fn open(path: impl Into<PathBuf>, policy: CorruptPolicy) -> Result<Self> {
        let document = JsonDocument::new(path, policy);
        let records = document.load()?;
        Ok(Self { document, records })
    }

    /// Append a note stamped with the current UTC time.
    ///
    /// Timestamps double as index ids, so a stamp that does not sort after the
    /// last record is bumped to one microsecond past it.
    pub fn cache(&mut self, text: &str, tags: Vec<String>) -> Result<MemoryRecord> {
        let mut record = MemoryRecord {
            ts: String::new(),
            text: text.to_string(),
            tags,
        };
        let records = self.document.update(|records| {
            let mut stamp = Utc::now();
            if let Some(last) = records.last().and_then(|r| parse_ts(&r.ts)) {
                if stamp <= last {
                    stamp = last + Duration::microseconds(1);
                }
            }
            record.ts = stamp.to_rfc3339_opts(SecondsFormat::Micros, true);
            records.push(record.clone());
            Ok(true)
        })?;
        self.records = records;

        info!(ts = %record.ts, tags = record.tags.len(), "Memory cached");
        Ok(record)
    }

    /// Records whose text contains `query`, ignoring case. No query (or an
    /// empty one) returns everything.
    pub fn recall(&self, query: Option<&str>) -> Vec<&MemoryRecord> {
        let needle = query.map(str::to_lowercase).unwrap_or_default();
        if needle.is_empty() {
            return self.records.iter().collect();
        }
        self.records
            .iter()
            .filter(|r| r.text.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// Records as JSON objects for `VectorIndex::ensure_indexed`.
    pub fn as_items(&self) -> Vec<Value> {
        self.records
            .iter()
            .map(|r| json!({ "ts": r.ts, "text": r.text, "tags": r.tags }))
            .collect()
    }

    pub fn reload(&mut self) -> Result<()> {
        self.records = self.document.load()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        self.document.path()
    }
}

fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

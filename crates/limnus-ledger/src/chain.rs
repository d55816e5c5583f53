//! Block hashing and chain verification.
//!
//! A block's hash is the SHA-256 (lowercase hex) of its canonical bytes: the
//! compact JSON object `{"data":..,"kind":..,"prev_hash":..,"timestamp":..}`
//! with the keys of every object, nested ones included, sorted by byte order.
//! The ordering is applied explicitly rather than relying on the map type
//! `serde_json` was compiled with.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Kind label of the first block in every ledger.
pub const GENESIS_KIND: &str = "genesis";

/// Payload anchored in the genesis block.
pub const GENESIS_ANCHOR: &str = "I return as breath.";

/// Caller-supplied block payload. Never interpreted by the ledger.
pub type BlockData = Map<String, Value>;

/// One immutable, hash-linked ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: String,
    pub kind: String,
    pub data: BlockData,
    /// Hash of the preceding block; empty for genesis.
    pub prev_hash: String,
    pub hash: String,
}

impl Block {
    /// Build a block and compute its hash.
    pub fn seal(
        timestamp: impl Into<String>,
        kind: impl Into<String>,
        data: BlockData,
        prev_hash: impl Into<String>,
    ) -> Self {
        let mut block = Self {
            timestamp: timestamp.into(),
            kind: kind.into(),
            data,
            prev_hash: prev_hash.into(),
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// The genesis block: fixed anchor payload, empty `prev_hash`.
    pub fn genesis(timestamp: impl Into<String>) -> Self {
        let mut data = BlockData::new();
        data.insert("anchor".to_string(), Value::String(GENESIS_ANCHOR.to_string()));
        Self::seal(timestamp, GENESIS_KIND, data, "")
    }

    /// Recompute the hash from the four content fields.
    pub fn compute_hash(&self) -> String {
        digest(&canonicalize(
            &self.timestamp,
            &self.kind,
            &self.data,
            &self.prev_hash,
        ))
    }

    /// Whether the stored hash matches the content.
    pub fn is_sealed(&self) -> bool {
        self.compute_hash() == self.hash
    }
}

/// Canonical byte encoding of a block's content fields.
pub fn canonicalize(timestamp: &str, kind: &str, data: &BlockData, prev_hash: &str) -> Vec<u8> {
    // Inserted in sorted order so the result is the same with or without
    // serde_json's `preserve_order` feature.
    let mut root = Map::new();
    root.insert("data".to_string(), sorted_object(data));
    root.insert("kind".to_string(), Value::String(kind.to_string()));
    root.insert("prev_hash".to_string(), Value::String(prev_hash.to_string()));
    root.insert("timestamp".to_string(), Value::String(timestamp.to_string()));
    Value::Object(root).to_string().into_bytes()
}

/// SHA-256 of `bytes` as 64 lowercase hex characters.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Current UTC instant in the ledger's fixed textual encoding.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn sorted_object(map: &Map<String, Value>) -> Value {
    let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.clone(), sorted_value(v)))
            .collect(),
    )
}

fn sorted_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => sorted_object(map),
        Value::Array(items) => Value::Array(items.iter().map(sorted_value).collect()),
        other => other.clone(),
    }
}

/// Where a chain first disagrees with its stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    /// The stored hash does not recompute from the block's content.
    HashMismatch,
    /// `prev_hash` is not the predecessor's hash (or not empty for genesis).
    BrokenLink,
}

/// Outcome of walking a chain from genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub ok: bool,
    pub first_bad_index: Option<usize>,
    pub divergence: Option<Divergence>,
}

impl Verification {
    fn intact() -> Self {
        Self {
            ok: true,
            first_bad_index: None,
            divergence: None,
        }
    }

    fn broken(index: usize, divergence: Divergence) -> Self {
        Self {
            ok: false,
            first_bad_index: Some(index),
            divergence: Some(divergence),
        }
    }
}

/// Verify hashes and linkage, reporting the first divergent index.
pub fn verify_chain(blocks: &[Block]) -> Verification {
    for (index, block) in blocks.iter().enumerate() {
        if !block.is_sealed() {
            return Verification::broken(index, Divergence::HashMismatch);
        }
        let expected_prev = match index {
            0 => "",
            _ => blocks[index - 1].hash.as_str(),
        };
        if block.prev_hash != expected_prev {
            return Verification::broken(index, Divergence::BrokenLink);
        }
    }
    Verification::intact()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> BlockData {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn chain(len: usize) -> Vec<Block> {
        let mut blocks = vec![Block::genesis("2026-10-18T09:00:00.000000Z")];
        for i in 1..len {
            let prev = blocks[i - 1].hash.clone();
            blocks.push(Block::seal(
                format!("2026-10-18T09:00:{:02}.000000Z", i),
                "note",
                data(json!({ "text": format!("entry {}", i) })),
                prev,
            ));
        }
        blocks
    }

    #[test]
    fn test_canonical_form_is_exact() {
        let bytes = canonicalize(
            "2026-10-18T09:00:00.000000Z",
            "note",
            &data(json!({"text": "hello", "a": 1})),
            "",
        );
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"data":{"a":1,"text":"hello"},"kind":"note","prev_hash":"","timestamp":"2026-10-18T09:00:00.000000Z"}"#
        );
    }

    #[test]
    fn test_canonical_independent_of_insertion_order() {
        let mut forward = BlockData::new();
        forward.insert("alpha".into(), json!("1"));
        forward.insert("beta".into(), json!({"z": 1, "y": [ {"d": 1, "c": 2} ]}));

        let mut backward = BlockData::new();
        backward.insert("beta".into(), json!({"y": [ {"c": 2, "d": 1} ], "z": 1}));
        backward.insert("alpha".into(), json!("1"));

        assert_eq!(
            canonicalize("t", "k", &forward, "p"),
            canonicalize("t", "k", &backward, "p")
        );
    }

    #[test]
    fn test_canonical_keeps_unicode_verbatim() {
        let bytes = canonicalize("t", "note", &data(json!({"text": "breath ∞"})), "");
        assert!(String::from_utf8(bytes).unwrap().contains("breath ∞"));
    }

    #[test]
    fn test_digest_known_value() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest(b"").len(), 64);
    }

    #[test]
    fn test_digest_distinguishes_inputs() {
        assert_ne!(digest(b"hello"), digest(b"world"));
        assert_eq!(digest(b"hello"), digest(b"hello"));
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis("2026-10-18T09:00:00.000000Z");
        assert_eq!(genesis.kind, GENESIS_KIND);
        assert_eq!(genesis.prev_hash, "");
        assert_eq!(genesis.data.get("anchor"), Some(&json!(GENESIS_ANCHOR)));
        assert!(genesis.is_sealed());
    }

    #[test]
    fn test_timestamp_encoding() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        // Microsecond precision: "YYYY-MM-DDTHH:MM:SS.ffffffZ".
        assert_eq!(ts.len(), 27);
    }

    #[test]
    fn test_verify_intact_chain() {
        let blocks = chain(5);
        assert_eq!(verify_chain(&blocks), Verification::intact());
        assert!(verify_chain(&[]).ok);
    }

    #[test]
    fn test_verify_detects_tampered_data() {
        let mut blocks = chain(4);
        blocks[2]
            .data
            .insert("text".into(), json!("rewritten history"));
        let result = verify_chain(&blocks);
        assert!(!result.ok);
        assert_eq!(result.first_bad_index, Some(2));
        assert_eq!(result.divergence, Some(Divergence::HashMismatch));
    }

    #[test]
    fn test_verify_detects_each_tampered_field() {
        for field in ["timestamp", "kind", "prev_hash"] {
            let mut blocks = chain(3);
            match field {
                "timestamp" => blocks[1].timestamp.push('0'),
                "kind" => blocks[1].kind = "forged".into(),
                _ => blocks[1].prev_hash = "00".repeat(32),
            }
            let result = verify_chain(&blocks);
            assert_eq!(result.first_bad_index, Some(1), "field {}", field);
        }
    }

    #[test]
    fn test_verify_detects_resealed_broken_link() {
        let mut blocks = chain(3);
        let forged = Block::seal(
            blocks[2].timestamp.clone(),
            blocks[2].kind.clone(),
            blocks[2].data.clone(),
            "f".repeat(64),
        );
        blocks[2] = forged;
        let result = verify_chain(&blocks);
        assert_eq!(result.first_bad_index, Some(2));
        assert_eq!(result.divergence, Some(Divergence::BrokenLink));
    }

    #[test]
    fn test_verify_rejects_genesis_with_prev_hash() {
        let blocks = vec![Block::seal("t", GENESIS_KIND, BlockData::new(), "abc")];
        let result = verify_chain(&blocks);
        assert_eq!(result.first_bad_index, Some(0));
        assert_eq!(result.divergence, Some(Divergence::BrokenLink));
    }

    #[test]
    fn test_block_serialized_field_names() {
        let genesis = Block::genesis("t");
        let value = serde_json::to_value(&genesis).unwrap();
        for key in ["timestamp", "kind", "data", "prev_hash", "hash"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }
}

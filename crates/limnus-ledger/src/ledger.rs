//! Append-only, hash-chained event ledger persisted as one JSON document.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use limnus_core::document::{CorruptPolicy, JsonDocument};
use limnus_core::error::Result;

use crate::chain::{timestamp_now, verify_chain, Block, BlockData, Verification};

/// The ordered block sequence plus the document it lives in.
///
/// Every mutating call reloads the document under its exclusive lock,
/// applies the change and rewrites it atomically, so appends from separate
/// handles (or processes) on the same file serialize instead of clobbering
/// each other.
#[derive(Debug)]
pub struct Ledger {
    document: JsonDocument<Vec<Block>>,
    blocks: Vec<Block>,
}

impl Ledger {
    /// Open the ledger at `path`. Nothing is written until `init` or `append`.
    pub fn open(path: impl Into<PathBuf>, policy: CorruptPolicy) -> Result<Self> {
        let document = JsonDocument::new(path, policy);
        let blocks = document.load()?;
        Ok(Self { document, blocks })
    }

    /// Write the genesis block if the ledger is empty.
    ///
    /// Returns `true` when genesis was created, `false` if the ledger already
    /// had blocks.
    pub fn init(&mut self) -> Result<bool> {
        let mut created = false;
        let blocks = self.document.update(|blocks| {
            if blocks.is_empty() {
                blocks.push(Block::genesis(timestamp_now()));
                created = true;
            }
            Ok(created)
        })?;
        self.blocks = blocks;
        if created {
            info!(path = %self.document.path().display(), "Ledger initialized with genesis block");
        }
        Ok(created)
    }

    /// Append a block and return its hash.
    ///
    /// An empty ledger gets its genesis block in the same write. On error the
    /// in-memory sequence is left as it was; call `reload` before retrying.
    pub fn append(&mut self, kind: &str, data: BlockData) -> Result<String> {
        let mut sealed = String::new();
        let blocks = self.document.update(|blocks| {
            if blocks.is_empty() {
                blocks.push(Block::genesis(timestamp_now()));
            }
            let prev_hash = blocks
                .last()
                .map(|b| b.hash.clone())
                .unwrap_or_default();
            let block = Block::seal(timestamp_now(), kind, data, prev_hash);
            sealed = block.hash.clone();
            blocks.push(block);
            Ok(true)
        })?;
        self.blocks = blocks;

        info!(
            kind,
            hash = %sealed,
            height = self.blocks.len() - 1,
            "Block committed"
        );
        Ok(sealed)
    }

    /// Walk the in-memory sequence from genesis and report the first divergence.
    pub fn verify(&self) -> Verification {
        let verification = verify_chain(&self.blocks);
        if let Some(index) = verification.first_bad_index {
            warn!(
                index,
                divergence = ?verification.divergence,
                "Ledger integrity check failed"
            );
        }
        verification
    }

    /// Replace the in-memory sequence with what is on disk.
    pub fn reload(&mut self) -> Result<()> {
        self.blocks = self.document.load()?;
        Ok(())
    }

    /// Write a copy of the current sequence to `path`.
    pub fn export_to(&self, path: &Path) -> Result<()> {
        let copy: JsonDocument<Vec<Block>> = JsonDocument::new(path, self.document.policy());
        copy.store(&self.blocks)?;
        info!(out = %path.display(), blocks = self.blocks.len(), "Ledger exported");
        Ok(())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Hash of the last block, if any.
    pub fn head(&self) -> Option<&str> {
        self.blocks.last().map(|b| b.hash.as_str())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn path(&self) -> &Path {
        self.document.path()
    }
}

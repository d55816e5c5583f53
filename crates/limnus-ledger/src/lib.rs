//! Limnus Ledger crate - tamper-evident, append-only event log.
//!
//! Blocks are chained by SHA-256 over a canonical JSON encoding of their
//! content; `Ledger::verify` reports the first block whose hash or link no
//! longer matches.

pub mod chain;
pub mod ledger;

pub use chain::{
    canonicalize, digest, Block, BlockData, Divergence, Verification, GENESIS_ANCHOR,
    GENESIS_KIND,
};
pub use ledger::Ledger;

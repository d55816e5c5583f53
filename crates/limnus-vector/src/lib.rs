//! Limnus vector crate - embedding backends, backend registry, persisted
//! vector index and the memory journal that feeds it.
//!
//! The hash backend is always available. TF-IDF and feature hashing are
//! default features; the sentence-transformer backend needs `onnx`.

pub mod embedder;
pub mod embedding;
pub mod index;
pub mod journal;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use embedder::{BackendKind, Embedder, EmbedderOptions};
pub use embedding::{EmbeddingBackend, HashEmbedding};
pub use index::{Metadata, SearchHit, VectorEntry, VectorIndex};
pub use journal::{MemoryJournal, MemoryRecord};

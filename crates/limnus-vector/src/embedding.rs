//! Embedding backend trait and the dependency-light implementations.
//!
//! - `HashEmbedding` buckets whitespace tokens by MD5. Always available,
//!   pure function of (text, dimensions).
//! - `TfidfEmbedding` (feature `tfidf`) fits a vocabulary over the texts it is
//!   given. Corpus-fit: `embed_many` over the whole corpus is the unit of work.
//! - `FeatureHashEmbedding` (feature `feature-hash`) hashes word tokens with
//!   seahash.
//!
//! The model-backed backend lives in `crate::onnx`.

use md5::{Digest, Md5};

use limnus_core::error::Result;

/// Text-to-vector capability shared by every backend.
///
/// Every vector a backend returns has exactly `dimensions()` components.
pub trait EmbeddingBackend: Send + Sync {
    /// Registry name of the backend.
    fn name(&self) -> &'static str;

    /// Output dimension.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. Corpus-fit backends fit over exactly this batch.
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Whether each vector depends on the whole batch it was computed in.
    fn is_corpus_fit(&self) -> bool {
        false
    }
}

/// Divide by the Euclidean norm; a zero vector is returned unchanged.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// HashEmbedding - dependency-free fallback
// ---------------------------------------------------------------------------

/// Bag-of-tokens vector with MD5 bucketing.
///
/// Lower-cases the text, splits on whitespace, and for each token adds 1.0 to
/// bucket `md5(token) mod dimensions` (the digest read as one big-endian
/// integer), then L2-normalizes.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
}

impl HashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Md5::digest(token.as_bytes());
        let modulus = self.dimensions as u128;
        let bucket = digest
            .iter()
            .fold(0u128, |acc, &byte| ((acc << 8) | byte as u128) % modulus);
        bucket as usize
    }
}

impl EmbeddingBackend for HashEmbedding {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.to_lowercase().split_whitespace() {
            vector[self.bucket(token)] += 1.0;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

// ---------------------------------------------------------------------------
// Word tokenization shared by the TF-IDF and feature-hash backends
// ---------------------------------------------------------------------------

#[cfg(any(feature = "tfidf", feature = "feature-hash"))]
mod words {
    use std::sync::LazyLock;

    use regex::Regex;

    static WORD: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?u)\b\w\w+\b").expect("Invalid word regex"));

    /// Lower-cased runs of two or more word characters.
    pub(crate) fn tokenize(text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        WORD.find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TfidfEmbedding - corpus-fit vectorizer
// ---------------------------------------------------------------------------

#[cfg(feature = "tfidf")]
pub use tfidf::TfidfEmbedding;

#[cfg(feature = "tfidf")]
mod tfidf {
    use std::collections::{HashMap, HashSet};

    use limnus_core::error::Result;

    use super::words::tokenize;
    use super::{l2_normalize, EmbeddingBackend};

    /// TF-IDF over the batch being embedded.
    ///
    /// The vocabulary is the `dimensions` most frequent terms of the batch
    /// (ties broken by term), laid out in term order; rows are zero-padded to
    /// `dimensions`. Weights are raw term counts times the smoothed idf
    /// `ln((1 + n) / (1 + df)) + 1`, then L2-normalized.
    #[derive(Debug, Clone)]
    pub struct TfidfEmbedding {
        dimensions: usize,
    }

    impl TfidfEmbedding {
        pub fn new(dimensions: usize) -> Self {
            Self { dimensions }
        }

        fn fit_transform(&self, texts: &[&str]) -> Vec<Vec<f32>> {
            let docs: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t)).collect();

            let mut term_count: HashMap<&str, usize> = HashMap::new();
            let mut doc_freq: HashMap<&str, usize> = HashMap::new();
            for doc in &docs {
                let mut seen: HashSet<&str> = HashSet::new();
                for token in doc {
                    *term_count.entry(token.as_str()).or_insert(0) += 1;
                    if seen.insert(token.as_str()) {
                        *doc_freq.entry(token.as_str()).or_insert(0) += 1;
                    }
                }
            }

            let mut ranked: Vec<(&str, usize)> = term_count.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            ranked.truncate(self.dimensions);
            let mut vocabulary: Vec<&str> = ranked.into_iter().map(|(term, _)| term).collect();
            vocabulary.sort_unstable();

            let column: HashMap<&str, usize> = vocabulary
                .iter()
                .enumerate()
                .map(|(i, term)| (*term, i))
                .collect();
            let n = docs.len() as f32;
            let idf: Vec<f32> = vocabulary
                .iter()
                .map(|term| {
                    let df = doc_freq.get(term).copied().unwrap_or(0) as f32;
                    ((1.0 + n) / (1.0 + df)).ln() + 1.0
                })
                .collect();

            docs.iter()
                .map(|doc| {
                    let mut row = vec![0.0f32; self.dimensions];
                    for token in doc {
                        if let Some(&col) = column.get(token.as_str()) {
                            row[col] += 1.0;
                        }
                    }
                    for (col, weight) in idf.iter().enumerate() {
                        row[col] *= weight;
                    }
                    l2_normalize(&mut row);
                    row
                })
                .collect()
        }
    }

    impl EmbeddingBackend for TfidfEmbedding {
        fn name(&self) -> &'static str {
            "tfidf"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self.fit_transform(&[text]).remove(0))
        }

        fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(self.fit_transform(texts))
        }

        fn is_corpus_fit(&self) -> bool {
            true
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureHashEmbedding - stateless hashing vectorizer
// ---------------------------------------------------------------------------

#[cfg(feature = "feature-hash")]
pub use feature_hash::FeatureHashEmbedding;

#[cfg(feature = "feature-hash")]
mod feature_hash {
    use limnus_core::error::Result;

    use super::words::tokenize;
    use super::{l2_normalize, EmbeddingBackend};

    /// Word-token counts hashed into `dimensions` buckets with seahash.
    #[derive(Debug, Clone)]
    pub struct FeatureHashEmbedding {
        dimensions: usize,
    }

    impl FeatureHashEmbedding {
        pub fn new(dimensions: usize) -> Self {
            Self { dimensions }
        }
    }

    impl EmbeddingBackend for FeatureHashEmbedding {
        fn name(&self) -> &'static str {
            "sklearn-hash"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vector = vec![0.0f32; self.dimensions];
            for token in tokenize(text) {
                let bucket = seahash::hash(token.as_bytes()) % self.dimensions as u64;
                vector[bucket as usize] += 1.0;
            }
            l2_normalize(&mut vector);
            Ok(vector)
        }
    }
}

//! Backend registry: picks one embedding backend at construction time.
//!
//! Resolution is total. An explicitly named backend is used when it is
//! compiled in and initializes; otherwise the embedder falls back to `hash`.
//! Without a name, backends are tried in `PRIORITY` order and the first that
//! initializes wins. `hash` has no dependencies and always terminates the
//! chain.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use limnus_core::config::{expand_home, EmbeddingConfig, DEFAULT_DIMENSIONS};
use limnus_core::error::{LimnusError, Result};

use crate::embedding::{EmbeddingBackend, HashEmbedding};

/// Environment variable naming the backend.
pub const BACKEND_ENV: &str = "LIMNUS_VECTOR_BACKEND";

/// Environment variable naming the model for model-backed backends.
pub const MODEL_ENV: &str = "LIMNUS_VECTOR_MODEL";

/// Backends known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Tfidf,
    Sbert,
    FeatureHash,
    Hash,
}

/// Auto-detection order.
pub const PRIORITY: [BackendKind; 4] = [
    BackendKind::Tfidf,
    BackendKind::Sbert,
    BackendKind::FeatureHash,
    BackendKind::Hash,
];

impl BackendKind {
    /// Parse a configured identifier (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "hash" => Some(Self::Hash),
            "tfidf" => Some(Self::Tfidf),
            "sbert" | "sentence-bert" | "sentence_transformer" => Some(Self::Sbert),
            "sklearn-hash" => Some(Self::FeatureHash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Tfidf => "tfidf",
            Self::Sbert => "sbert",
            Self::FeatureHash => "sklearn-hash",
        }
    }

    /// Whether the backend's dependency was compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Hash => true,
            Self::Tfidf => cfg!(feature = "tfidf"),
            Self::Sbert => cfg!(feature = "onnx"),
            Self::FeatureHash => cfg!(feature = "feature-hash"),
        }
    }

    fn build(&self, options: &EmbedderOptions) -> Result<Box<dyn EmbeddingBackend>> {
        match self {
            Self::Hash => Ok(Box::new(HashEmbedding::new(options.dimensions))),
            Self::Tfidf => {
                #[cfg(feature = "tfidf")]
                {
                    Ok(Box::new(crate::embedding::TfidfEmbedding::new(
                        options.dimensions,
                    )))
                }
                #[cfg(not(feature = "tfidf"))]
                {
                    Err(unavailable(self))
                }
            }
            Self::FeatureHash => {
                #[cfg(feature = "feature-hash")]
                {
                    Ok(Box::new(crate::embedding::FeatureHashEmbedding::new(
                        options.dimensions,
                    )))
                }
                #[cfg(not(feature = "feature-hash"))]
                {
                    Err(unavailable(self))
                }
            }
            Self::Sbert => {
                #[cfg(feature = "onnx")]
                {
                    let dir = crate::onnx::resolve_model_dir(
                        options.model_name.as_deref(),
                        &options.models_dir,
                    );
                    Ok(Box::new(crate::onnx::OnnxEmbedding::from_directory(&dir)?))
                }
                #[cfg(not(feature = "onnx"))]
                {
                    Err(unavailable(self))
                }
            }
        }
    }
}

#[allow(dead_code)]
fn unavailable(kind: &BackendKind) -> LimnusError {
    LimnusError::Embedding(format!("{} backend not compiled in", kind.as_str()))
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved embedder settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedderOptions {
    /// Explicit backend name; `None` means auto-detect.
    pub backend: Option<String>,
    pub model_name: Option<String>,
    pub dimensions: usize,
    pub models_dir: PathBuf,
}

impl Default for EmbedderOptions {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

impl EmbedderOptions {
    /// Options taken from the config file section alone.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            backend: non_empty(config.backend.clone()),
            model_name: non_empty(config.model_name.clone()),
            dimensions: config.dimensions,
            models_dir: expand_home(&config.models_dir),
        }
    }

    /// Layer the sources: call-site override, then `env`, then `config`.
    ///
    /// `env` is a lookup function so callers decide whether the process
    /// environment takes part.
    pub fn resolve<F>(config: &EmbeddingConfig, override_backend: Option<&str>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::from_config(config);
        if let Some(model) = non_empty(env(MODEL_ENV)) {
            options.model_name = Some(model);
        }
        if let Some(backend) = non_empty(env(BACKEND_ENV)) {
            options.backend = Some(backend);
        }
        if let Some(backend) = non_empty(override_backend.map(str::to_string)) {
            options.backend = Some(backend);
        }
        options
    }

    /// `resolve` against the process environment.
    pub fn from_env(config: &EmbeddingConfig, override_backend: Option<&str>) -> Self {
        Self::resolve(config, override_backend, |key| std::env::var(key).ok())
    }

    /// Options forcing one backend with the given dimension.
    pub fn forced(backend: &str, dimensions: usize) -> Self {
        Self {
            backend: Some(backend.to_string()),
            dimensions,
            ..Self::from_config(&EmbeddingConfig::default())
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// The selected backend, fixed for the embedder's lifetime.
pub struct Embedder {
    kind: BackendKind,
    backend: Box<dyn EmbeddingBackend>,
}

impl fmt::Debug for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("backend", &self.kind)
            .field("dimensions", &self.backend.dimensions())
            .finish()
    }
}

impl Embedder {
    /// Resolve a backend. Fails only on an invalid dimension.
    pub fn new(options: &EmbedderOptions) -> Result<Self> {
        if options.dimensions == 0 {
            return Err(LimnusError::Config(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }

        let selected = match options.backend.as_deref() {
            Some(name) => match BackendKind::parse(name) {
                Some(kind) => {
                    let built = try_build(kind, options);
                    if built.is_none() {
                        warn!(requested = name, "Requested embedding backend unavailable, using hash");
                    }
                    built
                }
                None => {
                    warn!(requested = name, "Unknown embedding backend, using hash");
                    None
                }
            },
            None => PRIORITY.iter().find_map(|kind| try_build(*kind, options)),
        };

        let (kind, backend) = match selected {
            Some(found) => found,
            None => (
                BackendKind::Hash,
                Box::new(HashEmbedding::new(options.dimensions)) as Box<dyn EmbeddingBackend>,
            ),
        };

        info!(
            backend = %kind,
            dimensions = backend.dimensions(),
            "Embedding backend selected"
        );
        Ok(Self { kind, backend })
    }

    /// The dependency-free backend with the given dimension.
    ///
    /// Infallible: a `dimensions` of 0 is raised to 1. Use `Embedder::new`
    /// to have a zero dimension rejected as a configuration error.
    pub fn hash(dimensions: usize) -> Self {
        Self {
            kind: BackendKind::Hash,
            backend: Box::new(HashEmbedding::new(dimensions.max(1))),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn dimensions(&self) -> usize {
        self.backend.dimensions()
    }

    pub fn is_corpus_fit(&self) -> bool {
        self.backend.is_corpus_fit()
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.backend.embed(text)
    }

    pub fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.backend.embed_many(texts)
    }
}

impl Default for Embedder {
    fn default() -> Self {
        Self::hash(DEFAULT_DIMENSIONS)
    }
}

fn try_build(
    kind: BackendKind,
    options: &EmbedderOptions,
) -> Option<(BackendKind, Box<dyn EmbeddingBackend>)> {
    if !kind.is_available() {
        debug!(backend = %kind, "Embedding backend not compiled in, skipping");
        return None;
    }
    match kind.build(options) {
        Ok(backend) => Some((kind, backend)),
        Err(e) => {
            warn!(backend = %kind, error = %e, "Embedding backend failed to initialize");
            None
        }
    }
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::document::CorruptPolicy;
use crate::error::{LimnusError, Result};

/// Default embedding dimension for the hashing and TF-IDF backends.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Top-level configuration for the Limnus memory core.
///
/// Loaded from `~/.limnus/config.toml` by default. Every section falls back
/// to its defaults when absent, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimnusConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl LimnusConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LimnusConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LimnusError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Resolved state directory (`~` expanded).
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir().join(&self.ledger.file_name)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir().join(&self.vector.index_file)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir().join(&self.vector.journal_file)
    }

    pub fn models_dir(&self) -> PathBuf {
        expand_home(&self.embedding.models_dir)
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the ledger, vector index and journal documents.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.limnus/state".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Ledger storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger document, relative to `general.data_dir`.
    pub file_name: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            file_name: "ledger.json".to_string(),
        }
    }
}

/// Vector index and memory journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Vector index document, relative to `general.data_dir`.
    pub index_file: String,
    /// Memory journal document, relative to `general.data_dir`.
    pub journal_file: String,
    /// Number of results returned by a search when none is requested.
    pub default_top_k: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            index_file: "vector_store/limnus_vectors.json".to_string(),
            journal_file: "limnus_memory.json".to_string(),
            default_top_k: 3,
        }
    }
}

/// Embedding backend selection.
///
/// `backend` and `model_name` are optional: when unset the embedder picks the
/// first available backend in its priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend identifier: hash, tfidf, sbert, sentence-bert, sklearn-hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Model name or directory for model-backed backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Output dimension for hashing and corpus-fit backends.
    pub dimensions: usize,
    /// Directory searched for model directories by name.
    pub models_dir: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: None,
            model_name: None,
            dimensions: DEFAULT_DIMENSIONS,
            models_dir: "~/.limnus/models".to_string(),
        }
    }
}

/// Persistence settings shared by every document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// What to do with a document that cannot be read or parsed.
    pub on_corrupt: CorruptPolicy,
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = LimnusConfig::default();
        assert_eq!(config.general.data_dir, "~/.limnus/state");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.ledger.file_name, "ledger.json");
        assert_eq!(config.vector.default_top_k, 3);
        assert_eq!(config.embedding.dimensions, 256);
        assert!(config.embedding.backend.is_none());
        assert!(config.embedding.model_name.is_none());
        assert_eq!(config.storage.on_corrupt, CorruptPolicy::Quarantine);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/state"
log_level = "debug"

[embedding]
backend = "hash"
dimensions = 64

[storage]
on_corrupt = "fail"
"#;
        let file = create_temp_config(content);
        let config = LimnusConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/state");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.embedding.backend.as_deref(), Some("hash"));
        assert_eq!(config.embedding.dimensions, 64);
        assert_eq!(config.storage.on_corrupt, CorruptPolicy::Fail);
        // Untouched sections keep their defaults.
        assert_eq!(config.vector.journal_file, "limnus_memory.json");
    }

    #[test]
    fn test_load_partial_section_uses_defaults() {
        let content = r#"
[embedding]
model_name = "all-MiniLM-L6-v2"
"#;
        let file = create_temp_config(content);
        let config = LimnusConfig::load(file.path()).unwrap();
        assert_eq!(config.embedding.model_name.as_deref(), Some("all-MiniLM-L6-v2"));
        assert_eq!(config.embedding.dimensions, DEFAULT_DIMENSIONS);
        assert_eq!(config.embedding.models_dir, "~/.limnus/models");
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = LimnusConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "~/.limnus/state");
        assert_eq!(config.vector.index_file, "vector_store/limnus_vectors.json");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = LimnusConfig::load(file.path());
        assert!(matches!(result, Err(LimnusError::Config(_))));
    }

    #[test]
    fn test_unknown_corrupt_policy_rejected() {
        let file = create_temp_config("[storage]\non_corrupt = \"shrug\"\n");
        assert!(LimnusConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = LimnusConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = LimnusConfig::default();
        config.embedding.backend = Some("tfidf".to_string());
        config.storage.on_corrupt = CorruptPolicy::Reset;
        config.save(&path).unwrap();

        let reloaded = LimnusConfig::load(&path).unwrap();
        assert_eq!(reloaded.embedding.backend.as_deref(), Some("tfidf"));
        assert_eq!(reloaded.storage.on_corrupt, CorruptPolicy::Reset);
    }

    #[test]
    fn test_document_paths_join_data_dir() {
        let mut config = LimnusConfig::default();
        config.general.data_dir = "/var/lib/limnus".to_string();
        assert_eq!(config.ledger_path(), PathBuf::from("/var/lib/limnus/ledger.json"));
        assert_eq!(
            config.index_path(),
            PathBuf::from("/var/lib/limnus/vector_store/limnus_vectors.json")
        );
        assert_eq!(
            config.journal_path(),
            PathBuf::from("/var/lib/limnus/limnus_memory.json")
        );
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/etc/limnus"), PathBuf::from("/etc/limnus"));
        assert!(!expand_home("~/state").to_string_lossy().starts_with('~'));
    }
}

//! CLI argument definitions for the Limnus binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Limnus - a personal memory core: hash-chained ledger plus semantic recall.
#[derive(Parser, Debug)]
#[command(name = "limnus", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// State directory for the ledger, index and journal.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Embedding backend (hash, tfidf, sbert, sklearn-hash).
    #[arg(short = 'b', long = "backend", global = true)]
    pub backend: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create the ledger's genesis block (and a default config file).
    Init,
    /// Append a block to the ledger.
    Commit {
        /// Block kind, e.g. `note`.
        kind: String,
        /// Payload field as key=value (repeatable).
        #[arg(long = "data", value_parser = parse_key_value)]
        data: Vec<(String, String)>,
        /// Payload as a JSON object; `--data` fields are applied on top.
        #[arg(long = "json")]
        json: Option<String>,
    },
    /// Check the ledger's hash chain.
    Verify,
    /// Print the most recent blocks.
    Log {
        #[arg(long = "limit", default_value_t = 10)]
        limit: usize,
    },
    /// Copy the ledger document to another file.
    Export { path: PathBuf },
    /// Append a note to the memory journal.
    Cache {
        text: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List journal notes containing the query.
    Recall { query: Option<String> },
    /// Import the memory journal into the vector index.
    Index,
    /// Insert or update one vector index entry.
    Remember {
        id: String,
        text: String,
        /// Metadata as key=value (repeatable).
        #[arg(long = "meta", value_parser = parse_key_value)]
        meta: Vec<(String, String)>,
    },
    /// Rank indexed entries against a query.
    Search {
        query: String,
        /// Number of results (defaults to `vector.default_top_k`).
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
    },
    /// Remove one vector index entry.
    Forget { id: String },
    /// Summarize the ledger, index and journal.
    Status,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > LIMNUS_CONFIG env var > platform default (~/.limnus/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("LIMNUS_CONFIG") {
            if !p.is_empty() {
                return PathBuf::from(p);
            }
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > config file value.
    /// Returns `None` if not overridden (use config default).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Parse a `key=value` argument. The value may itself contain `=`.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{}`", raw)),
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".limnus").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".limnus").join("config.toml");
    }
    PathBuf::from("config.toml")
}

//! Limnus application binary - composition root.
//!
//! Ties the Limnus crates together behind one command line:
//! 1. Load configuration from TOML (CLI flags and env vars on top)
//! 2. Install the tracing subscriber
//! 3. Open only the stores the command needs (ledger, vector index, journal)
//! 4. Run the command and print its result to stdout
//!
//! Logs go to stderr so command output stays pipeable.

mod cli;

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use limnus_core::config::LimnusConfig;
use limnus_core::error::LimnusError;
use limnus_ledger::{BlockData, Ledger};
use limnus_vector::embedder::{Embedder, EmbedderOptions};
use limnus_vector::index::{Metadata, VectorIndex, DEFAULT_TEXT_KEY};
use limnus_vector::journal::{MemoryJournal, JOURNAL_ID_KEY};

use cli::{CliArgs, Command};

type AppResult<T> = std::result::Result<T, Box<dyn Error>>;

/// Resolved configuration shared by every command.
struct App {
    config: LimnusConfig,
    config_path: PathBuf,
    backend_override: Option<String>,
}

impl App {
    fn open_ledger(&self) -> AppResult<Ledger> {
        Ok(Ledger::open(
            self.config.ledger_path(),
            self.config.storage.on_corrupt,
        )?)
    }

    fn open_journal(&self) -> AppResult<MemoryJournal> {
        Ok(MemoryJournal::open(
            self.config.journal_path(),
            self.config.storage.on_corrupt,
        )?)
    }

    fn open_index(&self) -> AppResult<VectorIndex> {
        let options =
            EmbedderOptions::from_env(&self.config.embedding, self.backend_override.as_deref());
        let embedder = Embedder::new(&options)?;
        Ok(VectorIndex::open(
            self.config.index_path(),
            embedder,
            self.config.storage.on_corrupt,
        )?)
    }
}

fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    // Config. Loaded before tracing so the configured level applies; a load
    // failure is reported once the subscriber is up.
    let config_path = args.resolve_config_path();
    let (mut config, load_error) = match LimnusConfig::load(&config_path) {
        Ok(config) => (config, None),
        Err(_) if !config_path.exists() => (LimnusConfig::default(), None),
        Err(e) => (LimnusConfig::default(), Some(e)),
    };
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    let log_level = args.resolve_log_level(&config.general.log_level);

    // Tracing.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    if let Some(e) = load_error {
        warn!(path = %config_path.display(), error = %e, "Failed to load config, using defaults");
    }
    info!(
        config = %config_path.display(),
        data_dir = %config.data_dir().display(),
        "Starting Limnus v{}",
        env!("CARGO_PKG_VERSION")
    );

    let app = App {
        config,
        config_path,
        backend_override: args.backend.clone(),
    };

    match args.command {
        Command::Init => init(&app),
        Command::Commit { kind, data, json } => commit(&app, &kind, data, json.as_deref()),
        Command::Verify => verify(&app),
        Command::Log { limit } => log(&app, limit),
        Command::Export { path } => export(&app, &path),
        Command::Cache { text, tags } => cache(&app, &text, tags),
        Command::Recall { query } => recall(&app, query.as_deref()),
        Command::Index => index(&app),
        Command::Remember { id, text, meta } => remember(&app, &id, &text, meta),
        Command::Search { query, top_k } => search(&app, &query, top_k),
        Command::Forget { id } => forget(&app, &id),
        Command::Status => status(&app),
    }
}

fn init(app: &App) -> AppResult<()> {
    if !app.config_path.exists() {
        app.config.save(&app.config_path)?;
        println!("wrote default config to {}", app.config_path.display());
    }

    let mut ledger = app.open_ledger()?;
    let created = ledger.init()?;
    let head = ledger.head().unwrap_or_default();
    if created {
        println!("ledger initialized at {} (genesis {})", ledger.path().display(), head);
    } else {
        println!("ledger already initialized ({} blocks, head {})", ledger.len(), head);
    }
    Ok(())
}

fn commit(
    app: &App,
    kind: &str,
    pairs: Vec<(String, String)>,
    json: Option<&str>,
) -> AppResult<()> {
    let mut data = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw).map_err(LimnusError::from)? {
            Value::Object(map) => map,
            _ => {
                return Err(
                    LimnusError::Serialization("--json must be a JSON object".to_string()).into(),
                )
            }
        },
        None => BlockData::new(),
    };
    for (key, value) in pairs {
        data.insert(key, Value::String(value));
    }

    let mut ledger = app.open_ledger()?;
    let hash = ledger.append(kind, data)?;
    println!("{}", hash);
    Ok(())
}

fn verify(app: &App) -> AppResult<()> {
    let ledger = app.open_ledger()?;
    let verification = ledger.verify();
    match (verification.first_bad_index, verification.divergence) {
        (Some(index), Some(divergence)) => Err(LimnusError::Ledger(format!(
            "chain diverges at block {} ({:?})",
            index, divergence
        ))
        .into()),
        _ => {
            println!("ok: {} blocks verified", ledger.len());
            Ok(())
        }
    }
}

fn log(app: &App, limit: usize) -> AppResult<()> {
    let ledger = app.open_ledger()?;
    let blocks = ledger.blocks();
    let start = blocks.len().saturating_sub(limit);
    for (height, block) in blocks.iter().enumerate().skip(start) {
        println!(
            "{:>5}  {}  {:<10} {}  {}",
            height,
            block.timestamp,
            block.kind,
            short_hash(&block.hash),
            Value::Object(block.data.clone())
        );
    }
    Ok(())
}

fn export(app: &App, path: &Path) -> AppResult<()> {
    let ledger = app.open_ledger()?;
    ledger.export_to(path)?;
    println!("exported {} blocks to {}", ledger.len(), path.display());
    Ok(())
}

fn cache(app: &App, text: &str, tags: Vec<String>) -> AppResult<()> {
    let mut journal = app.open_journal()?;
    let record = journal.cache(text, tags)?;
    println!("{}", record.ts);
    Ok(())
}

fn recall(app: &App, query: Option<&str>) -> AppResult<()> {
    let journal = app.open_journal()?;
    for record in journal.recall(query) {
        if record.tags.is_empty() {
            println!("{}  {}", record.ts, record.text);
        } else {
            println!("{}  {}  [{}]", record.ts, record.text, record.tags.join(","));
        }
    }
    Ok(())
}

fn index(app: &App) -> AppResult<()> {
    let journal = app.open_journal()?;
    let mut index = app.open_index()?;
    let changed = index.ensure_indexed(&journal.as_items(), DEFAULT_TEXT_KEY, JOURNAL_ID_KEY)?;
    println!(
        "indexed {} of {} journal records ({} entries total)",
        changed,
        journal.len(),
        index.len()
    );
    Ok(())
}

fn remember(app: &App, id: &str, text: &str, meta: Vec<(String, String)>) -> AppResult<()> {
    let mut index = app.open_index()?;
    let metadata: Metadata = meta.into_iter().collect();
    index.upsert(text, id, metadata)?;
    println!("remembered {} ({} entries)", id, index.len());
    Ok(())
}

fn search(app: &App, query: &str, top_k: Option<usize>) -> AppResult<()> {
    let index = app.open_index()?;
    let top_k = top_k.unwrap_or(app.config.vector.default_top_k);
    for hit in index.semantic_search(query, top_k)? {
        println!("{:.4}  {}  {}", hit.score, hit.entry.id, hit.entry.text);
    }
    Ok(())
}

fn forget(app: &App, id: &str) -> AppResult<()> {
    let mut index = app.open_index()?;
    if index.delete(id)? {
        println!("forgot {}", id);
    } else {
        println!("no entry {}", id);
    }
    Ok(())
}

fn status(app: &App) -> AppResult<()> {
    let ledger = app.open_ledger()?;
    let journal = app.open_journal()?;
    let index = app.open_index()?;
    let verification = ledger.verify();

    println!("config      {}", app.config_path.display());
    println!("data dir    {}", app.config.data_dir().display());
    println!(
        "ledger      {} blocks, head {}, {}",
        ledger.len(),
        ledger.head().map(short_hash).unwrap_or("-"),
        if verification.ok { "intact" } else { "DIVERGED" }
    );
    println!("journal     {} records", journal.len());
    println!(
        "index       {} entries, backend {} ({} dims)",
        index.len(),
        index.embedder().backend_name(),
        index.embedder().dimensions()
    );
    Ok(())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

//! `intake`: ingest custody-record batches into the entity graph and inspect
//! what was persisted.
//!
//! # Usage
//!
//! ```
//! intake ingest roster-2024-06-01.json roster-2024-06-02.json
//! intake graph us_al_jefferson
//! intake history 6f1c2a9e-2b8e-4c36-9a4f-0c8d0b5f6d21
//! intake batches us_al_jefferson
//! ```
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `INTAKE_*` environment variables.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use intake_core::{
  entity::EntityId,
  graph::tree_json,
  normalize::RawBatch,
  store::GraphStore,
};
use intake_pipeline::{IngestConfig, Ingestor};
use intake_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Custody-record intake and reconciliation")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Ingest one or more JSON batch files. Batches run concurrently.
  Ingest {
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },
  /// Print the persisted graph of a jurisdiction.
  Graph { jurisdiction: String },
  /// Print the history rows of one entity.
  History { entity_id: Uuid },
  /// List committed batches of a jurisdiction.
  Batches { jurisdiction: String },
}

// ─── Configuration ───────────────────────────────────────────────────────────

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/intake/intake.db") }

fn default_commit_timeout_secs() -> u64 { 30 }

#[derive(Deserialize)]
struct CliConfig {
  #[serde(default = "default_store_path")]
  store_path:          PathBuf,
  #[serde(default = "default_commit_timeout_secs")]
  commit_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("INTAKE"))
    .build()
    .context("failed to read config file")?;

  let cfg: CliConfig = settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  if let Some(dir) = store_path.parent().filter(|d| !d.as_os_str().is_empty()) {
    std::fs::create_dir_all(dir)
      .with_context(|| format!("failed to create store directory {dir:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Ingest { files } => {
      let ingestor = Ingestor::new(Arc::new(store), IngestConfig {
        commit_timeout: Duration::from_secs(cfg.commit_timeout_secs),
      });
      ingest(&ingestor, &files).await
    }
    Command::Graph { jurisdiction } => {
      let people = store
        .fetch_existing_graph(&jurisdiction)
        .await
        .context("failed to read graph")?;
      let trees = people
        .iter()
        .map(tree_json)
        .collect::<Result<Vec<_>, _>>()?;
      print_json(&trees)
    }
    Command::History { entity_id } => {
      let rows = store
        .history(EntityId(entity_id))
        .await
        .context("failed to read history")?;
      print_json(&rows)
    }
    Command::Batches { jurisdiction } => {
      let batches = store
        .batches(&jurisdiction)
        .await
        .context("failed to read batches")?;
      print_json(&batches)
    }
  }
}

async fn ingest(ingestor: &Ingestor<SqliteStore>, files: &[PathBuf]) -> anyhow::Result<()> {
  let mut batches = Vec::with_capacity(files.len());
  for file in files {
    let text = std::fs::read_to_string(file)
      .with_context(|| format!("failed to read {file:?}"))?;
    let batch: RawBatch =
      serde_json::from_str(&text).with_context(|| format!("failed to parse batch {file:?}"))?;
    batches.push(batch);
  }

  let mut aborted = 0;
  for (file, result) in files.iter().zip(ingestor.ingest_all(batches).await) {
    match result {
      Ok(summary) => print_json(&summary)?,
      Err(e) => {
        aborted += 1;
        eprintln!("{}: batch aborted: {e}", file.display());
      }
    }
  }

  if aborted > 0 {
    bail!("{aborted} of {} batch(es) aborted; safe to retry", files.len());
  }
  Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

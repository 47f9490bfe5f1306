//! Error types for `intake-pipeline`.
//!
//! Every variant aborts the whole batch. Nothing is committed in any of these
//! cases, so the batch can be retried in full.

use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to fingerprint batch: {0}")]
  Fingerprint(#[from] serde_json::Error),

  #[error("failed to read existing graph: {0}")]
  GraphRead(#[source] BoxError),

  #[error("reconciliation failed: {0}")]
  Reconcile(#[from] intake_core::Error),

  #[error("commit failed: {0}")]
  Commit(#[source] BoxError),

  #[error("commit did not finish within {0:?}")]
  CommitTimeout(Duration),

  #[error("ingest task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

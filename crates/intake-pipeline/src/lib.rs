//! Batch orchestration for Intake.
//!
//! An [`Ingestor`] drives one raw batch through the whole lifecycle:
//! normalize, lock the jurisdiction, fetch the existing graph, reconcile and
//! commit under a timeout. Batches for different jurisdictions run
//! concurrently; batches for the same jurisdiction are serialized from the
//! graph fetch through the commit.

mod config;
mod digest;
mod lock;

pub mod error;

pub use config::IngestConfig;
pub use digest::fingerprint;
pub use error::{Error, Result};
pub use lock::JurisdictionLocks;

use std::sync::Arc;

use chrono::Utc;
use intake_core::{
  normalize::{Batch, RawBatch, normalize},
  reconcile::{BatchPhase, reconcile},
  store::{CommitResult, GraphStore},
};
use tracing::{Instrument as _, Span, debug, field, info, info_span, warn};

/// Runs batches against one [`GraphStore`].
///
/// Cloning is cheap; clones share the store and the jurisdiction locks.
pub struct Ingestor<S> {
  store:  Arc<S>,
  locks:  JurisdictionLocks,
  config: IngestConfig,
}

impl<S> Clone for Ingestor<S> {
  fn clone(&self) -> Self {
    Self {
      store:  Arc::clone(&self.store),
      locks:  self.locks.clone(),
      config: self.config.clone(),
    }
  }
}

impl<S: GraphStore + 'static> Ingestor<S> {
  pub fn new(store: Arc<S>, config: IngestConfig) -> Self {
    Self {
      store,
      locks: JurisdictionLocks::new(),
      config,
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Ingest one raw batch. On error nothing was committed and the batch can
  /// be retried as a whole.
  pub async fn ingest(&self, raw: RawBatch) -> Result<CommitResult> {
    let fingerprint = fingerprint(&raw)?;
    let batch = normalize(&raw, Utc::now().date_naive());

    let span = info_span!(
      "batch",
      batch_id = field::Empty,
      jurisdiction = %batch.jurisdiction,
      fingerprint = %fingerprint,
    );
    self.run(batch, fingerprint).instrument(span).await
  }

  /// Ingest several batches concurrently. Results are in input order.
  pub async fn ingest_all(&self, batches: Vec<RawBatch>) -> Vec<Result<CommitResult>> {
    let handles: Vec<_> = batches
      .into_iter()
      .map(|raw| {
        let this = self.clone();
        tokio::spawn(async move { this.ingest(raw).await })
      })
      .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
      results.push(handle.await.map_err(Error::Task).and_then(|r| r));
    }
    results
  }

  async fn run(&self, batch: Batch, fingerprint: String) -> Result<CommitResult> {
    info!(
      phase = %BatchPhase::Loaded,
      people = batch.people.len(),
      warnings = batch.warnings.len(),
      "normalized"
    );

    let _guard = self.locks.acquire(&batch.jurisdiction).await;

    let existing = self
      .store
      .fetch_existing_graph(&batch.jurisdiction)
      .await
      .map_err(|e| aborted(Error::GraphRead(Box::new(e))))?;

    let staged = reconcile(batch, existing, fingerprint).map_err(|e| aborted(e.into()))?;
    Span::current().record("batch_id", field::display(staged.batch_id));
    if staged.is_noop() {
      debug!("no entity changes; recording the batch only");
    }

    let timeout = self.config.commit_timeout;
    let deadline = tokio::time::Instant::now() + timeout;
    let applied = tokio::time::timeout_at(
      deadline,
      self.store.apply(&staged, Some(deadline.into_std())),
    )
    .await;

    match applied {
      Ok(Ok(result)) => {
        info!(
          phase = %BatchPhase::Committed,
          inserted = ?result.inserted,
          updated = ?result.updated,
          unchanged = ?result.unchanged,
          warnings = result.warnings.len(),
          "committed"
        );
        Ok(result)
      }
      Ok(Err(e)) => Err(aborted(Error::Commit(Box::new(e)))),
      Err(_) => Err(aborted(Error::CommitTimeout(timeout))),
    }
  }
}

fn aborted(error: Error) -> Error {
  warn!(phase = %BatchPhase::Aborted, %error, "batch aborted");
  error
}

//! The `GraphStore` port and the types that cross it.
//!
//! The trait is implemented by storage backends (e.g. `intake-store-sqlite`).
//! The pipeline depends on this abstraction, not on any concrete backend.

use std::{collections::BTreeMap, future::Future, time::Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  entity::{EntityId, EntityKind, Person},
  reconcile::StagedBatch,
  warning::Warning,
};

// ─── Results ─────────────────────────────────────────────────────────────────

/// Outcome of one committed batch. Count maps only carry non-zero entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
  pub batch_id:     Uuid,
  pub jurisdiction: String,
  pub inserted:     BTreeMap<EntityKind, usize>,
  pub updated:      BTreeMap<EntityKind, usize>,
  pub unchanged:    BTreeMap<EntityKind, usize>,
  pub warnings:     Vec<Warning>,
}

/// One append-only history row. `valid_until` is the `valid_from` of the
/// next row for the same entity, or `None` for the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub history_id:   i64,
  pub entity_id:    EntityId,
  pub kind:         EntityKind,
  pub batch_id:     Uuid,
  pub valid_from:   DateTime<Utc>,
  pub valid_until:  Option<DateTime<Utc>>,
  /// `None` for the row that created the entity.
  pub value_before: Option<serde_json::Value>,
  pub value_after:  serde_json::Value,
}

/// A committed batch as recorded by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
  pub batch_id:     Uuid,
  pub jurisdiction: String,
  /// Hex SHA-256 of the raw batch.
  pub fingerprint:  String,
  pub committed_at: DateTime<Utc>,
  pub summary:      CommitResult,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Read and write port for the persisted entity graph.
///
/// All methods return `Send` futures so the trait can be used from spawned
/// tokio tasks.
pub trait GraphStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The full tree of every person in `jurisdiction`, as of call time, in
  /// one round trip.
  fn fetch_existing_graph<'a>(
    &'a self,
    jurisdiction: &'a str,
  ) -> impl Future<Output = Result<Vec<Person>, Self::Error>> + Send + 'a;

  /// Execute every staged operation plus one history row per mutated entity
  /// atomically. If `deadline` passes before the commit point the
  /// transaction is rolled back and an error returned.
  fn apply<'a>(
    &'a self,
    staged: &'a StagedBatch,
    deadline: Option<Instant>,
  ) -> impl Future<Output = Result<CommitResult, Self::Error>> + Send + 'a;

  /// History rows of one entity, oldest first.
  fn history(
    &self,
    entity_id: EntityId,
  ) -> impl Future<Output = Result<Vec<HistoryEntry>, Self::Error>> + Send + '_;

  /// Committed batches of one jurisdiction, oldest first.
  fn batches<'a>(
    &'a self,
    jurisdiction: &'a str,
  ) -> impl Future<Output = Result<Vec<BatchRecord>, Self::Error>> + Send + 'a;
}

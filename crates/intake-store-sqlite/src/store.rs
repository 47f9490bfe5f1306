//! [`SqliteStore`] is the SQLite implementation of [`GraphStore`].

use std::{path::Path, time::Instant};

use chrono::Utc;
use intake_core::{
  entity::{EntityId, Person},
  graph::assemble,
  reconcile::{Action, StagedBatch},
  store::{BatchRecord, CommitResult, GraphStore, HistoryEntry},
};

use crate::{
  Error, Result,
  encode::{
    RawBatchRecord, RawEntity, RawHistory, encode_dt, encode_entity_id, encode_kind,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An entity graph store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Why a transaction was rolled back without a database error.
enum Abort {
  MissingRow(EntityId),
  DeadlineExceeded,
}

/// One staged insert or update, encoded for the database thread.
struct EntityWrite {
  action:      Action,
  id:          EntityId,
  entity_id:   String,
  kind:        String,
  parent_id:   Option<String>,
  external_id: Option<String>,
  body:        String,
  before:      Option<String>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  fn encode_writes(staged: &StagedBatch) -> Result<Vec<EntityWrite>> {
    staged
      .operations
      .iter()
      .filter(|op| op.action != Action::Unchanged)
      .map(|op| {
        Ok(EntityWrite {
          action:      op.action,
          id:          op.record.id,
          entity_id:   encode_entity_id(op.record.id),
          kind:        encode_kind(op.record.kind),
          parent_id:   op.record.parent_id.map(encode_entity_id),
          external_id: op.record.external_id.clone(),
          body:        serde_json::to_string(&op.record.body)?,
          before:      op.before.as_ref().map(serde_json::to_string).transpose()?,
        })
      })
      .collect()
  }
}

// ─── GraphStore impl ─────────────────────────────────────────────────────────

impl GraphStore for SqliteStore {
  type Error = Error;

  async fn fetch_existing_graph(&self, jurisdiction: &str) -> Result<Vec<Person>> {
    let jurisdiction = jurisdiction.to_owned();

    let raws: Vec<RawEntity> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entity_id, kind, parent_id, external_id, body
           FROM entities
           WHERE jurisdiction = ?1
           ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![jurisdiction], |row| {
            Ok(RawEntity {
              entity_id:   row.get(0)?,
              kind:        row.get(1)?,
              parent_id:   row.get(2)?,
              external_id: row.get(3)?,
              body:        row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let records = raws
      .into_iter()
      .map(RawEntity::into_record)
      .collect::<Result<Vec<_>>>()?;
    Ok(assemble(records)?)
  }

  async fn apply(
    &self,
    staged: &StagedBatch,
    deadline: Option<Instant>,
  ) -> Result<CommitResult> {
    let summary = staged.summary();
    let writes = Self::encode_writes(staged)?;

    let batch_id_str = encode_uuid(staged.batch_id);
    let jurisdiction = staged.jurisdiction.clone();
    let fingerprint = staged.fingerprint.clone();
    let summary_str = serde_json::to_string(&summary)?;
    let at_str = encode_dt(Utc::now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        tx.execute(
          "INSERT INTO batches (batch_id, jurisdiction, fingerprint, summary, committed_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![batch_id_str, jurisdiction, fingerprint, summary_str, at_str],
        )?;

        for w in &writes {
          let previous: Option<i64> = match w.action {
            Action::Insert => {
              tx.execute(
                "INSERT INTO entities (
                   entity_id, jurisdiction, kind, parent_id, external_id, body,
                   created_batch, updated_batch
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                  w.entity_id,
                  jurisdiction,
                  w.kind,
                  w.parent_id,
                  w.external_id,
                  w.body,
                  batch_id_str,
                ],
              )?;
              None
            }
            Action::Update => {
              let touched = tx.execute(
                "UPDATE entities
                 SET external_id = ?1, body = ?2, updated_batch = ?3
                 WHERE entity_id = ?4 AND jurisdiction = ?5 AND kind = ?6",
                rusqlite::params![
                  w.external_id,
                  w.body,
                  batch_id_str,
                  w.entity_id,
                  jurisdiction,
                  w.kind,
                ],
              )?;
              if touched == 0 {
                return Ok(Err(Abort::MissingRow(w.id)));
              }
              tx.query_row(
                "SELECT MAX(history_id) FROM history WHERE entity_id = ?1",
                rusqlite::params![w.entity_id],
                |row| row.get(0),
              )?
            }
            Action::Unchanged => continue,
          };

          tx.execute(
            "INSERT INTO history (
               entity_id, kind, batch_id, recorded_at,
               value_before, value_after, previous_history_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
              w.entity_id,
              w.kind,
              batch_id_str,
              at_str,
              w.before,
              w.body,
              previous,
            ],
          )?;
        }

        // Dropping `tx` rolls back.
        if deadline.is_some_and(|d| Instant::now() >= d) {
          return Ok(Err(Abort::DeadlineExceeded));
        }
        tx.commit()?;
        Ok(Ok(()))
      })
      .await?;

    match outcome {
      Ok(()) => Ok(summary),
      Err(Abort::MissingRow(id)) => Err(Error::MissingUpdateTarget(id)),
      Err(Abort::DeadlineExceeded) => Err(Error::DeadlineExceeded),
    }
  }

  async fn history(&self, entity_id: EntityId) -> Result<Vec<HistoryEntry>> {
    let id_str = encode_entity_id(entity_id);

    let raws: Vec<RawHistory> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT
             h.history_id, h.entity_id, h.kind, h.batch_id, h.recorded_at,
             h.value_before, h.value_after,
             n.recorded_at AS closed_at
           FROM history h
           LEFT JOIN history n ON n.previous_history_id = h.history_id
           WHERE h.entity_id = ?1
           ORDER BY h.history_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawHistory {
              history_id:   row.get(0)?,
              entity_id:    row.get(1)?,
              kind:         row.get(2)?,
              batch_id:     row.get(3)?,
              recorded_at:  row.get(4)?,
              value_before: row.get(5)?,
              value_after:  row.get(6)?,
              closed_at:    row.get(7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistory::into_entry).collect()
  }

  async fn batches(&self, jurisdiction: &str) -> Result<Vec<BatchRecord>> {
    let jurisdiction = jurisdiction.to_owned();

    let raws: Vec<RawBatchRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT batch_id, jurisdiction, fingerprint, summary, committed_at
           FROM batches
           WHERE jurisdiction = ?1
           ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![jurisdiction], |row| {
            Ok(RawBatchRecord {
              batch_id:     row.get(0)?,
              jurisdiction: row.get(1)?,
              fingerprint:  row.get(2)?,
              summary:      row.get(3)?,
              committed_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawBatchRecord::into_record).collect()
  }
}

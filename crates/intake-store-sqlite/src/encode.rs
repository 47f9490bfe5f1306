//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Entity bodies, history
//! images and batch summaries are stored as compact JSON. UUIDs are stored as
//! hyphenated lowercase strings.

use chrono::{DateTime, Utc};
use intake_core::{
  entity::{EntityId, EntityKind},
  graph::EntityRecord,
  store::{BatchRecord, HistoryEntry},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_entity_id(id: EntityId) -> String { encode_uuid(id.0) }

pub fn decode_entity_id(s: &str) -> Result<EntityId> { decode_uuid(s).map(EntityId) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── EntityKind ──────────────────────────────────────────────────────────────

pub fn encode_kind(kind: EntityKind) -> String { kind.to_string() }

pub fn decode_kind(s: &str) -> Result<EntityKind> {
  s.parse()
    .map_err(|_| Error::Core(intake_core::Error::UnknownEntityKind(s.to_owned())))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from an `entities` row.
pub struct RawEntity {
  pub entity_id:   String,
  pub kind:        String,
  pub parent_id:   Option<String>,
  pub external_id: Option<String>,
  pub body:        String,
}

impl RawEntity {
  pub fn into_record(self) -> Result<EntityRecord> {
    Ok(EntityRecord {
      id:          decode_entity_id(&self.entity_id)?,
      kind:        decode_kind(&self.kind)?,
      parent_id:   self.parent_id.as_deref().map(decode_entity_id).transpose()?,
      external_id: self.external_id,
      body:        serde_json::from_str(&self.body)?,
    })
  }
}

/// Raw strings read from a `history` row joined with its successor.
pub struct RawHistory {
  pub history_id:   i64,
  pub entity_id:    String,
  pub kind:         String,
  pub batch_id:     String,
  pub recorded_at:  String,
  pub value_before: Option<String>,
  pub value_after:  String,
  /// `recorded_at` of the successor row, if any.
  pub closed_at:    Option<String>,
}

impl RawHistory {
  pub fn into_entry(self) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
      history_id:   self.history_id,
      entity_id:    decode_entity_id(&self.entity_id)?,
      kind:         decode_kind(&self.kind)?,
      batch_id:     decode_uuid(&self.batch_id)?,
      valid_from:   decode_dt(&self.recorded_at)?,
      valid_until:  self.closed_at.as_deref().map(decode_dt).transpose()?,
      value_before: self
        .value_before
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      value_after:  serde_json::from_str(&self.value_after)?,
    })
  }
}

/// Raw strings read directly from a `batches` row.
pub struct RawBatchRecord {
  pub batch_id:     String,
  pub jurisdiction: String,
  pub fingerprint:  String,
  pub summary:      String,
  pub committed_at: String,
}

impl RawBatchRecord {
  pub fn into_record(self) -> Result<BatchRecord> {
    Ok(BatchRecord {
      batch_id:     decode_uuid(&self.batch_id)?,
      jurisdiction: self.jurisdiction,
      fingerprint:  self.fingerprint,
      committed_at: decode_dt(&self.committed_at)?,
      summary:      serde_json::from_str(&self.summary)?,
    })
  }
}

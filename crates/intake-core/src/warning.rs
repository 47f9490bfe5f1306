//! Entity-level problems that are recovered locally.
//!
//! None of these abort a batch. They travel with the staged batch and are
//! reported back to the caller in [`crate::store::CommitResult`].

use serde::{Deserialize, Serialize};

use crate::{entity::EntityKind, matcher::MatchStrategy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WarningType {
  /// A field was supplied but could not be parsed; the raw text is kept.
  UnparsedField { field: String, raw: String },
  /// Every identifying field failed to parse; the entity was dropped.
  UnparsableEntity,
  /// More than one candidate matched; the entity was persisted as new.
  AmbiguousMatch {
    strategy:   MatchStrategy,
    candidates: usize,
  },
  /// The record's parent is missing, was dropped, or is of the wrong kind.
  OrphanedRecord { parent: Option<String> },
  /// A record key (or a booking's single arrest) appeared more than once;
  /// the later record was dropped.
  DuplicateRecord,
  /// A charge referenced a bond or sentence that is not in its booking.
  DanglingReference { field: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
  pub entity_kind:  EntityKind,
  pub external_id:  Option<String>,
  /// Batch-local key of the raw record, when the warning arose before the
  /// entity entered the graph.
  pub record_key:   Option<String>,
  pub warning_type: WarningType,
}

impl Warning {
  pub fn new(
    entity_kind: EntityKind,
    external_id: Option<String>,
    warning_type: WarningType,
  ) -> Self {
    Self {
      entity_kind,
      external_id,
      record_key: None,
      warning_type,
    }
  }

  pub fn with_record_key(mut self, key: impl Into<String>) -> Self {
    self.record_key = Some(key.into());
    self
  }
}

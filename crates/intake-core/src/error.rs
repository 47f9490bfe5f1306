//! Error types for `intake-core`.

use thiserror::Error;

use crate::entity::{EntityId, EntityKind};

#[derive(Debug, Error)]
pub enum Error {
  #[error("record {id} ({kind}) references missing parent {parent}")]
  OrphanedRecord {
    id:     EntityId,
    kind:   EntityKind,
    parent: EntityId,
  },

  #[error("record {id} ({kind}) must not have a parent")]
  UnexpectedParent { id: EntityId, kind: EntityKind },

  #[error("record {0} ({1}) has no parent")]
  MissingParent(EntityId, EntityKind),

  #[error("unknown entity kind: {0:?}")]
  UnknownEntityKind(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Error type for `intake-store-sqlite`.

use intake_core::entity::EntityId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] intake_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A staged update addressed an entity that is not persisted in the
  /// batch's jurisdiction.
  #[error("update target not found: {0}")]
  MissingUpdateTarget(EntityId),

  /// The commit deadline passed before the transaction could commit.
  #[error("commit deadline exceeded; transaction rolled back")]
  DeadlineExceeded,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

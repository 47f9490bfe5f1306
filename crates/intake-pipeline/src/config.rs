//! Pipeline configuration.

use std::time::Duration;

use serde::Deserialize;

fn default_commit_timeout() -> Duration { Duration::from_secs(30) }

/// Runtime settings for an [`Ingestor`](crate::Ingestor).
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
  /// Upper bound on the commit step. A batch that does not commit in time
  /// is rolled back and reported as aborted.
  ///
  /// A commit that lands just as the timeout fires is kept by the store but
  /// still reported as [`CommitTimeout`](crate::Error::CommitTimeout).
  /// Retrying it is safe: the rerun matches every entity and writes only a
  /// batch record.
  #[serde(default = "default_commit_timeout")]
  pub commit_timeout: Duration,
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self {
      commit_timeout: default_commit_timeout(),
    }
  }
}

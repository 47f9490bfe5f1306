//! In-process mutual exclusion per jurisdiction.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::OwnedMutexGuard;

/// One async mutex per jurisdiction, created on first use.
///
/// Cloning is cheap and clones share the same locks.
#[derive(Clone, Default)]
pub struct JurisdictionLocks {
  inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl JurisdictionLocks {
  pub fn new() -> Self { Self::default() }

  /// Wait for exclusive access to `jurisdiction`. Access ends when the
  /// guard is dropped.
  pub async fn acquire(&self, jurisdiction: &str) -> OwnedMutexGuard<()> {
    let lock = {
      let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
      map.entry(jurisdiction.to_owned()).or_default().clone()
    };
    lock.lock_owned().await
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn same_jurisdiction_is_exclusive() {
    let locks = JurisdictionLocks::new();
    let guard = locks.acquire("us_al_jefferson").await;

    let blocked = tokio::time::timeout(
      Duration::from_millis(20),
      locks.acquire("us_al_jefferson"),
    )
    .await;
    assert!(blocked.is_err());

    drop(guard);
    let _again = locks.acquire("us_al_jefferson").await;
  }

  #[tokio::test]
  async fn other_jurisdictions_do_not_wait() {
    let locks = JurisdictionLocks::new();
    let _held = locks.acquire("us_al_jefferson").await;
    let other = tokio::time::timeout(Duration::from_millis(20), locks.acquire("us_ga_fulton")).await;
    assert!(other.is_ok());
  }
}

//! Batch fingerprints for replay auditing.

use intake_core::normalize::RawBatch;
use sha2::{Digest, Sha256};

/// Hex SHA-256 over the canonical JSON of `raw`.
///
/// Record fields are kept in a sorted map, so equal batches always produce
/// equal fingerprints.
pub fn fingerprint(raw: &RawBatch) -> Result<String, serde_json::Error> {
  let bytes = serde_json::to_vec(raw)?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
  use intake_core::{entity::EntityKind, normalize::RawRecord};

  use super::*;

  fn raw(name: &str) -> RawBatch {
    RawBatch {
      jurisdiction: "us_al_jefferson".into(),
      ingested_at:  None,
      records:      vec![RawRecord {
        kind:   EntityKind::Person,
        source: "roster".into(),
        key:    "p1".into(),
        parent: None,
        fields: [("full_name".to_owned(), name.to_owned())].into(),
      }],
    }
  }

  #[test]
  fn equal_batches_share_a_fingerprint() {
    let a = fingerprint(&raw("Jane Doe")).unwrap();
    assert_eq!(a, fingerprint(&raw("Jane Doe")).unwrap());
    assert_eq!(a.len(), 64);
    assert_ne!(a, fingerprint(&raw("John Doe")).unwrap());
  }
}

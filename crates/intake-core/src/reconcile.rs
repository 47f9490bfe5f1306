//! Batch reconciliation: decide, for every entity of a normalized batch,
//! whether it is inserted, updated or left unchanged.
//!
//! Persons are matched against the existing graph first; each matched
//! person is then merged top-down, which matches its children only against
//! the children of the matched parent. Nothing here performs I/O: the result
//! is a [`StagedBatch`] for the store to apply.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Result,
  entity::{EntityId, EntityKind, Person},
  graph::EntityRecord,
  matcher::{MatchOutcome, Matchable, match_collection},
  merge::{MergeFields, MergeSink, insert_person, merge_person},
  normalize::Batch,
  store::CommitResult,
  warning::{Warning, WarningType},
};

// ─── State ───────────────────────────────────────────────────────────────────

/// Lifecycle of one batch. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchPhase {
  Loaded,
  Matching,
  Merging,
  Staged,
  Committed,
  Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Action {
  Insert,
  Update,
  Unchanged,
}

/// One planned write.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedOperation {
  pub action: Action,
  /// The entity as it should be persisted.
  pub record: EntityRecord,
  /// Persisted body before this batch; set for updates only.
  pub before: Option<serde_json::Value>,
}

/// Everything the store needs to commit one batch. Operations are ordered
/// parents before children.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedBatch {
  pub batch_id:     Uuid,
  pub jurisdiction: String,
  pub fingerprint:  String,
  pub operations:   Vec<StagedOperation>,
  pub warnings:     Vec<Warning>,
}

impl StagedBatch {
  pub fn count(&self, action: Action) -> BTreeMap<EntityKind, usize> {
    let mut counts = BTreeMap::new();
    for op in self.operations.iter().filter(|op| op.action == action) {
      *counts.entry(op.record.kind).or_insert(0) += 1;
    }
    counts
  }

  /// Whether the batch writes anything besides its batch record.
  pub fn is_noop(&self) -> bool {
    self.operations.iter().all(|op| op.action == Action::Unchanged)
  }

  pub fn summary(&self) -> CommitResult {
    CommitResult {
      batch_id:     self.batch_id,
      jurisdiction: self.jurisdiction.clone(),
      inserted:     self.count(Action::Insert),
      updated:      self.count(Action::Update),
      unchanged:    self.count(Action::Unchanged),
      warnings:     self.warnings.clone(),
    }
  }
}

// ─── Staging sink ────────────────────────────────────────────────────────────

struct Stager {
  operations: Vec<StagedOperation>,
  warnings:   Vec<Warning>,
}

impl MergeSink for Stager {
  type Error = crate::Error;

  fn merged<T: Matchable>(
    &mut self,
    parent: Option<EntityId>,
    before: &T,
    after: &T,
  ) -> Result<()> {
    let before = before.body()?;
    let record = EntityRecord::of(after, parent)?;
    let action = if record.body == before {
      Action::Unchanged
    } else {
      Action::Update
    };
    debug!(kind = %T::KIND, id = %record.id, %action, "matched");
    self.operations.push(StagedOperation {
      action,
      before: (action == Action::Update).then_some(before),
      record,
    });
    Ok(())
  }

  fn inserted<T: Matchable>(
    &mut self,
    parent: Option<EntityId>,
    entity: &T,
    outcome: MatchOutcome,
  ) -> Result<()> {
    if let MatchOutcome::Ambiguous {
      strategy,
      candidates,
    } = outcome
    {
      debug!(kind = %T::KIND, ?strategy, candidates, "ambiguous match, inserting as new");
      self.warnings.push(Warning::new(
        T::KIND,
        entity.external_id().map(str::to_owned),
        WarningType::AmbiguousMatch {
          strategy,
          candidates,
        },
      ));
    }
    let record = EntityRecord::of(entity, parent)?;
    debug!(kind = %T::KIND, id = %record.id, "new");
    self.operations.push(StagedOperation {
      action: Action::Insert,
      record,
      before: None,
    });
    Ok(())
  }
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// Fold incoming persons that share an external id into the first of them.
fn fold_duplicate_people(people: Vec<Person>) -> Vec<Person> {
  let mut out: Vec<Person> = Vec::with_capacity(people.len());
  let mut by_external_id: HashMap<String, usize> = HashMap::new();

  for person in people {
    if let Some(ext) = &person.external_id {
      if let Some(&index) = by_external_id.get(ext) {
        let target = &mut out[index];
        let mut folded = target.merge_fields(&person);
        folded.bookings = std::mem::take(&mut target.bookings);
        folded.bookings.extend(person.bookings);
        *target = folded;
        continue;
      }
      by_external_id.insert(ext.clone(), out.len());
    }
    out.push(person);
  }
  out
}

/// Reconcile `batch` against the persisted graph of its jurisdiction.
///
/// Persons of other jurisdictions in `existing` are ignored.
pub fn reconcile(
  batch: Batch,
  mut existing: Vec<Person>,
  fingerprint: impl Into<String>,
) -> Result<StagedBatch> {
  let batch_id = Uuid::new_v4();
  let Batch {
    jurisdiction,
    people,
    warnings,
    ..
  } = batch;
  existing.retain(|p| p.jurisdiction == jurisdiction);

  info!(
    %batch_id,
    phase = %BatchPhase::Matching,
    people = people.len(),
    existing = existing.len(),
    "matching"
  );
  let people = fold_duplicate_people(people);
  let plan = match_collection(&people, &existing);

  info!(%batch_id, phase = %BatchPhase::Merging, "merging");
  let mut stager = Stager {
    operations: Vec::new(),
    warnings,
  };
  for (person, outcome) in people.into_iter().zip(plan) {
    match outcome.matched_index() {
      Some(index) => {
        merge_person(&existing[index], person, &mut stager)?;
      }
      None => {
        insert_person(person, outcome, &mut stager)?;
      }
    }
  }

  let staged = StagedBatch {
    batch_id,
    jurisdiction,
    fingerprint: fingerprint.into(),
    operations: stager.operations,
    warnings: stager.warnings,
  };
  info!(
    %batch_id,
    phase = %BatchPhase::Staged,
    operations = staged.operations.len(),
    warnings = staged.warnings.len(),
    "staged"
  );
  Ok(staged)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::{
    entity::{Booking, Charge, ChargeStatus, Field},
    graph::assemble,
    matcher::MatchStrategy,
  };

  const JURISDICTION: &str = "us_al_jefferson";

  fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

  fn batch(people: Vec<Person>) -> Batch {
    Batch {
      jurisdiction: JURISDICTION.into(),
      ingested_on: date(2024, 6, 1),
      people,
      warnings: Vec::new(),
    }
  }

  fn jane() -> Person {
    Person {
      external_id: Some("P1".into()),
      jurisdiction: JURISDICTION.into(),
      full_name: Field::Value("JANE DOE".into()),
      bookings: vec![Booking {
        admission_date: Field::Value(date(2024, 5, 1)),
        ..Default::default()
      }],
      ..Default::default()
    }
  }

  /// What the store would hand back after committing `staged`.
  fn committed(staged: &StagedBatch) -> Vec<Person> {
    assemble(staged.operations.iter().map(|op| op.record.clone())).unwrap()
  }

  fn counts(pairs: &[(EntityKind, usize)]) -> BTreeMap<EntityKind, usize> {
    pairs.iter().copied().collect()
  }

  #[test]
  fn first_run_inserts_and_rerun_is_unchanged() {
    let first = reconcile(batch(vec![jane()]), Vec::new(), "f").unwrap();
    let summary = first.summary();
    assert_eq!(
      summary.inserted,
      counts(&[(EntityKind::Person, 1), (EntityKind::Booking, 1)])
    );
    assert!(summary.updated.is_empty());
    assert!(summary.unchanged.is_empty());

    let second = reconcile(batch(vec![jane()]), committed(&first), "f").unwrap();
    let summary = second.summary();
    assert!(summary.inserted.is_empty());
    assert!(summary.updated.is_empty());
    assert_eq!(
      summary.unchanged,
      counts(&[(EntityKind::Person, 1), (EntityKind::Booking, 1)])
    );
    assert!(second.is_noop());
    assert_eq!(second.operations[0].record.id, first.operations[0].record.id);
  }

  #[test]
  fn ambiguous_person_is_inserted_with_warning() {
    let twin = || Person {
      jurisdiction: JURISDICTION.into(),
      full_name: Field::Value("JANE DOE".into()),
      ..Default::default()
    };
    let existing = vec![twin(), twin()];
    let staged = reconcile(batch(vec![twin()]), existing, "f").unwrap();

    assert_eq!(staged.summary().inserted, counts(&[(EntityKind::Person, 1)]));
    assert_eq!(staged.warnings, vec![Warning::new(
      EntityKind::Person,
      None,
      WarningType::AmbiguousMatch {
        strategy:   MatchStrategy::CompositeKey,
        candidates: 2,
      }
    )]);
  }

  #[test]
  fn changed_field_is_an_update_with_before_image() {
    let mut existing = jane();
    existing.bookings[0].charges.push(Charge {
      statute: Field::Value("13A-6-2".into()),
      status: Field::Value(ChargeStatus::Pending),
      ..Default::default()
    });

    let mut incoming = jane();
    incoming.bookings[0].charges.push(Charge {
      statute: Field::Value("13A-6-2".into()),
      status: Field::Value(ChargeStatus::Convicted),
      ..Default::default()
    });

    let staged = reconcile(batch(vec![incoming]), vec![existing.clone()], "f").unwrap();
    assert_eq!(staged.summary().updated, counts(&[(EntityKind::Charge, 1)]));

    let op = staged
      .operations
      .iter()
      .find(|op| op.action == Action::Update)
      .unwrap();
    assert_eq!(op.record.id, existing.bookings[0].charges[0].id);
    assert_eq!(op.before.as_ref().unwrap()["status"], serde_json::json!({ "value": "pending" }));
    assert_eq!(op.record.body["status"], serde_json::json!({ "value": "convicted" }));
  }

  #[test]
  fn unparsed_incoming_field_does_not_update() {
    let mut existing = jane();
    existing.gender = Field::Value(crate::entity::Gender::Female);
    let mut incoming = jane();
    incoming.gender = Field::Unparsed("??".into());

    let staged = reconcile(batch(vec![incoming]), vec![existing], "f").unwrap();
    assert!(staged.is_noop());
  }

  #[test]
  fn charges_are_matched_within_their_booking_only() {
    let charge = || Charge {
      statute: Field::Value("13A-6-2".into()),
      ..Default::default()
    };
    let mut existing = jane();
    existing.bookings[0].facility = Field::Value("NORTH".into());
    existing.bookings.push(Booking {
      admission_date: Field::Value(date(2024, 5, 1)),
      facility: Field::Value("SOUTH".into()),
      charges: vec![charge()],
      ..Default::default()
    });

    let mut incoming = jane();
    incoming.bookings[0].facility = Field::Value("NORTH".into());
    incoming.bookings[0].charges.push(charge());

    let staged = reconcile(batch(vec![incoming]), vec![existing.clone()], "f").unwrap();
    assert_eq!(staged.summary().inserted, counts(&[(EntityKind::Charge, 1)]));

    let insert = staged
      .operations
      .iter()
      .find(|op| op.action == Action::Insert)
      .unwrap();
    assert_eq!(insert.record.parent_id, Some(existing.bookings[0].id));
  }

  #[test]
  fn other_jurisdictions_are_not_candidates() {
    let mut elsewhere = jane();
    elsewhere.jurisdiction = "us_ga_fulton".into();
    let staged = reconcile(batch(vec![jane()]), vec![elsewhere], "f").unwrap();
    assert_eq!(
      staged.summary().inserted,
      counts(&[(EntityKind::Person, 1), (EntityKind::Booking, 1)])
    );
  }

  #[test]
  fn persons_sharing_an_external_id_are_folded() {
    let mut second = jane();
    second.bookings[0].admission_date = Field::Value(date(2024, 5, 20));
    second.gender = Field::Value(crate::entity::Gender::Female);

    let staged = reconcile(batch(vec![jane(), second]), Vec::new(), "f").unwrap();
    assert_eq!(
      staged.summary().inserted,
      counts(&[(EntityKind::Person, 1), (EntityKind::Booking, 2)])
    );
    assert_eq!(staged.operations[0].record.body["gender"], serde_json::json!({ "value": "female" }));
  }

  #[test]
  fn operations_are_parents_first() {
    let mut person = jane();
    person.bookings[0].charges.push(Charge::default());
    let staged = reconcile(batch(vec![person]), Vec::new(), "f").unwrap();
    let kinds: Vec<_> = staged.operations.iter().map(|op| op.record.kind).collect();
    assert_eq!(kinds, vec![EntityKind::Person, EntityKind::Booking, EntityKind::Charge]);
  }
}

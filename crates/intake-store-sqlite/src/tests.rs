//! Integration tests for `SqliteStore` against an in-memory database.

use std::{collections::BTreeMap, time::Instant};

use chrono::NaiveDate;
use intake_core::{
  entity::{Bond, Booking, Charge, ChargeStatus, EntityId, EntityKind, Field, Person},
  graph::EntityRecord,
  normalize::Batch,
  reconcile::{Action, StagedBatch, StagedOperation, reconcile},
  store::{CommitResult, GraphStore},
};

use crate::{Error, SqliteStore};

const JURISDICTION: &str = "us_al_jefferson";

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

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

fn jane_charged(status: ChargeStatus) -> Person {
  let mut person = jane();
  person.bookings[0].charges.push(Charge {
    statute: Field::Value("13A-6-2".into()),
    status: Field::Value(status),
    ..Default::default()
  });
  person
}

async fn stage(store: &SqliteStore, people: Vec<Person>) -> StagedBatch {
  let existing = store.fetch_existing_graph(JURISDICTION).await.unwrap();
  let batch = Batch {
    jurisdiction: JURISDICTION.into(),
    ingested_on: date(2024, 6, 1),
    people,
    warnings: Vec::new(),
  };
  reconcile(batch, existing, "c0ffee").unwrap()
}

async fn commit(store: &SqliteStore, people: Vec<Person>) -> CommitResult {
  let staged = stage(store, people).await;
  store.apply(&staged, None).await.unwrap()
}

fn counts(pairs: &[(EntityKind, usize)]) -> BTreeMap<EntityKind, usize> {
  pairs.iter().copied().collect()
}

// ─── Round trip ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn committed_graph_is_fetched_back() {
  let s = store().await;
  let result = commit(&s, vec![jane()]).await;
  assert_eq!(
    result.inserted,
    counts(&[(EntityKind::Person, 1), (EntityKind::Booking, 1)])
  );

  let graph = s.fetch_existing_graph(JURISDICTION).await.unwrap();
  assert_eq!(graph.len(), 1);
  assert_eq!(graph[0].external_id.as_deref(), Some("P1"));
  assert_eq!(graph[0].full_name, Field::Value("JANE DOE".into()));
  assert_eq!(graph[0].bookings.len(), 1);
  assert_eq!(graph[0].bookings[0].admission_date, Field::Value(date(2024, 5, 1)));
}

#[tokio::test]
async fn charge_references_survive_storage() {
  let s = store().await;
  let mut person = jane();
  let bond = Bond {
    amount_cents: Field::Value(250_000),
    ..Default::default()
  };
  person.bookings[0].charges.push(Charge {
    bond_id: Some(bond.id),
    ..Default::default()
  });
  person.bookings[0].bonds.push(bond);
  commit(&s, vec![person]).await;

  let graph = s.fetch_existing_graph(JURISDICTION).await.unwrap();
  let booking = &graph[0].bookings[0];
  assert_eq!(booking.charges[0].bond_id, Some(booking.bonds[0].id));
}

#[tokio::test]
async fn jurisdictions_are_isolated() {
  let s = store().await;
  commit(&s, vec![jane()]).await;
  assert!(s.fetch_existing_graph("us_ga_fulton").await.unwrap().is_empty());
  assert!(s.batches("us_ga_fulton").await.unwrap().is_empty());
}

// ─── Idempotence and history ─────────────────────────────────────────────────

#[tokio::test]
async fn rerun_is_unchanged_and_writes_no_history() {
  let s = store().await;
  commit(&s, vec![jane()]).await;
  let before = s.fetch_existing_graph(JURISDICTION).await.unwrap();

  let second = commit(&s, vec![jane()]).await;
  assert!(second.inserted.is_empty());
  assert!(second.updated.is_empty());
  assert_eq!(
    second.unchanged,
    counts(&[(EntityKind::Person, 1), (EntityKind::Booking, 1)])
  );

  let after = s.fetch_existing_graph(JURISDICTION).await.unwrap();
  assert_eq!(before, after);
  assert_eq!(s.history(after[0].id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_appends_history_and_closes_previous_row() {
  let s = store().await;
  commit(&s, vec![jane_charged(ChargeStatus::Pending)]).await;
  let result = commit(&s, vec![jane_charged(ChargeStatus::Convicted)]).await;
  assert_eq!(result.updated, counts(&[(EntityKind::Charge, 1)]));

  let graph = s.fetch_existing_graph(JURISDICTION).await.unwrap();
  let charge = &graph[0].bookings[0].charges[0];
  assert_eq!(charge.status, Field::Value(ChargeStatus::Convicted));

  let history = s.history(charge.id).await.unwrap();
  assert_eq!(history.len(), 2);
  assert!(history[0].value_before.is_none());
  assert_eq!(history[0].valid_until, Some(history[1].valid_from));
  assert_eq!(history[1].valid_until, None);
  assert_eq!(
    history[1].value_before.as_ref().unwrap()["status"],
    serde_json::json!({ "value": "pending" })
  );
  assert_eq!(history[1].value_after["status"], serde_json::json!({ "value": "convicted" }));
  assert_eq!(history[1].batch_id, result.batch_id);
}

#[tokio::test]
async fn batches_are_recorded_in_order() {
  let s = store().await;
  let first = commit(&s, vec![jane()]).await;
  let second = commit(&s, vec![jane()]).await;

  let batches = s.batches(JURISDICTION).await.unwrap();
  assert_eq!(batches.len(), 2);
  assert_eq!(batches[0].batch_id, first.batch_id);
  assert_eq!(batches[0].fingerprint, "c0ffee");
  assert_eq!(batches[0].summary, first);
  assert_eq!(batches[1].summary, second);
}

// ─── Rollback ────────────────────────────────────────────────────────────────

async fn assert_untouched(s: &SqliteStore) {
  assert!(s.fetch_existing_graph(JURISDICTION).await.unwrap().is_empty());
  assert!(s.batches(JURISDICTION).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_update_target_rolls_back() {
  let s = store().await;
  let mut staged = stage(&s, vec![jane()]).await;
  let ghost = Person {
    jurisdiction: JURISDICTION.into(),
    ..Default::default()
  };
  staged.operations.push(StagedOperation {
    action: Action::Update,
    record: EntityRecord::of(&ghost, None).unwrap(),
    before: Some(serde_json::json!({})),
  });

  let err = s.apply(&staged, None).await.unwrap_err();
  assert!(matches!(err, Error::MissingUpdateTarget(id) if id == ghost.id));
  assert_untouched(&s).await;
}

#[tokio::test]
async fn constraint_violation_rolls_back() {
  let s = store().await;
  let mut staged = stage(&s, vec![jane()]).await;
  let mut duplicate = staged.operations[0].clone();
  duplicate.record.id = EntityId::new();
  staged.operations.push(duplicate);

  let err = s.apply(&staged, None).await.unwrap_err();
  assert!(matches!(err, Error::Database(_)));
  assert_untouched(&s).await;
}

#[tokio::test]
async fn passed_deadline_rolls_back() {
  let s = store().await;
  let staged = stage(&s, vec![jane()]).await;

  let err = s.apply(&staged, Some(Instant::now())).await.unwrap_err();
  assert!(matches!(err, Error::DeadlineExceeded));
  assert_untouched(&s).await;

  s.apply(&staged, None).await.unwrap();
  assert_eq!(s.fetch_existing_graph(JURISDICTION).await.unwrap().len(), 1);
}

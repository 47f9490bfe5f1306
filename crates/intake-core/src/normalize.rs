//! Canonicalisation of raw, string-keyed source records into typed entity
//! trees.
//!
//! Parsing never fails past the entity boundary. A field that cannot be
//! parsed becomes [`Field::Unparsed`] and produces a warning; an entity whose
//! identifying fields all failed is dropped. Records are then linked into
//! person trees by their batch-local keys.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  entity::{
    Arrest, BirthDate, Bond, Booking, Charge, CustodyStatus, EntityId,
    EntityKind, Field, Hold, Metadata, Person, Sentence, SentenceStatus,
  },
  warning::{Warning, WarningType},
};

// ─── Input / output ──────────────────────────────────────────────────────────

/// One raw entity as handed over by a source parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
  pub kind:   EntityKind,
  /// Tag of the producing source; kept in metadata.
  #[serde(default)]
  pub source: String,
  /// Batch-local key, unique within the batch.
  pub key:    String,
  /// Key of the owning record: a person for bookings, a booking for every
  /// other non-person kind.
  #[serde(default)]
  pub parent: Option<String>,
  #[serde(default)]
  pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
  pub jurisdiction: String,
  #[serde(default)]
  pub ingested_at:  Option<DateTime<Utc>>,
  pub records:      Vec<RawRecord>,
}

/// A normalized batch, ready for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
  pub jurisdiction: String,
  pub ingested_on:  NaiveDate,
  pub people:       Vec<Person>,
  pub warnings:     Vec<Warning>,
}

// ─── Scalar parsers ──────────────────────────────────────────────────────────

/// Trim, collapse internal whitespace and upper-case.
pub fn clean_text(raw: &str) -> Option<String> {
  let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
  (!cleaned.is_empty()).then(|| cleaned.to_uppercase())
}

/// Clean a full name, turning `SURNAME, GIVEN` into `GIVEN SURNAME`.
pub fn normalize_name(raw: &str) -> Option<String> {
  match raw.split_once(',') {
    Some((surname, given)) => {
      let surname = clean_text(surname)?;
      match clean_text(given) {
        Some(given) => Some(format!("{given} {surname}")),
        None => Some(surname),
      }
    }
    None => clean_text(raw),
  }
}

const DATE_FORMATS: &[&str] = &[
  "%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%Y%m%d", "%d-%b-%Y", "%b %d, %Y",
  "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] =
  &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M:%S", "%m/%d/%Y %H:%M"];

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
  let raw = raw.trim();
  DATE_FORMATS
    .iter()
    .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
    .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.date_naive()))
    .or_else(|| {
      DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .map(|d| d.date())
    })
}

/// `$1,500.50` → `150050`. Negative amounts and sub-cent precision are
/// rejected.
pub fn parse_money(raw: &str) -> Option<i64> {
  let digits: String = raw
    .trim()
    .trim_start_matches('$')
    .chars()
    .filter(|c| *c != ',')
    .collect();
  let (whole, frac) = digits.split_once('.').unwrap_or((&digits, ""));
  if whole.is_empty() && frac.is_empty() {
    return None;
  }
  let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
  if !all_digits(whole) || !all_digits(frac) || frac.len() > 2 {
    return None;
  }
  let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
  let cents: i64 = match frac.len() {
    0 => 0,
    1 => frac.parse::<i64>().ok()? * 10,
    _ => frac.parse().ok()?,
  };
  whole.checked_mul(100)?.checked_add(cents)
}

/// `90`, `90 days`, `6 months`, `1 year 6 months`. Months count as 30 days,
/// years as 365.
pub fn parse_days(raw: &str) -> Option<u32> {
  let lowered = raw.trim().to_lowercase().replace(',', " ");
  if let Ok(days) = lowered.parse::<u32>() {
    return Some(days);
  }

  let tokens: Vec<&str> = lowered
    .split_whitespace()
    .filter(|t| *t != "and")
    .collect();
  if tokens.is_empty() || tokens.len() % 2 != 0 {
    return None;
  }

  tokens.chunks(2).try_fold(0u32, |total, pair| {
    let amount: u32 = pair[0].parse().ok()?;
    let unit = match pair[1] {
      "day" | "days" => 1,
      "month" | "months" => 30,
      "year" | "years" => 365,
      _ => return None,
    };
    total.checked_add(amount.checked_mul(unit)?)
  })
}

pub fn parse_flag(raw: &str) -> Option<bool> {
  match raw.trim().to_lowercase().as_str() {
    "y" | "yes" | "true" | "t" | "1" => Some(true),
    "n" | "no" | "false" | "f" | "0" => Some(false),
    _ => None,
  }
}

/// Parse a classification enum. Spaces and hyphens fold to underscores.
pub fn parse_enum<E: std::str::FromStr>(raw: &str) -> Option<E> {
  raw
    .split(|c: char| c.is_whitespace() || c == '-')
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("_")
    .parse()
    .ok()
}

fn parse_count(raw: &str) -> Option<u32> { raw.trim().replace(',', "").parse().ok() }

// ─── Per-record extraction ───────────────────────────────────────────────────

/// Pulls typed fields out of one record, recording a warning for each field
/// that fails to parse. Whatever is left over becomes metadata.
struct Extractor<'w> {
  kind:        EntityKind,
  key:         String,
  external_id: Option<String>,
  fields:      BTreeMap<String, String>,
  warnings:    &'w mut Vec<Warning>,
}

impl<'w> Extractor<'w> {
  fn new(record: &RawRecord, warnings: &'w mut Vec<Warning>) -> Self {
    let mut fields = record.fields.clone();
    let external_id = fields
      .remove("external_id")
      .map(|id| id.trim().to_owned())
      .filter(|id| !id.is_empty());
    Self {
      kind: record.kind,
      key: record.key.clone(),
      external_id,
      fields,
      warnings,
    }
  }

  fn take_raw(&mut self, name: &str) -> Option<String> {
    self
      .fields
      .remove(name)
      .map(|raw| raw.trim().to_owned())
      .filter(|raw| !raw.is_empty())
  }

  fn parse<T>(&mut self, name: &str, parser: impl Fn(&str) -> Option<T>) -> Field<T> {
    let Some(raw) = self.take_raw(name) else {
      return Field::Absent;
    };
    match parser(&raw) {
      Some(value) => Field::Value(value),
      None => {
        self.warnings.push(
          Warning::new(self.kind, self.external_id.clone(), WarningType::UnparsedField {
            field: name.to_owned(),
            raw:   raw.clone(),
          })
          .with_record_key(&self.key),
        );
        Field::Unparsed(raw)
      }
    }
  }

  fn text(&mut self, name: &str) -> Field<String> { self.parse(name, clean_text) }

  fn date(&mut self, name: &str) -> Field<NaiveDate> { self.parse(name, parse_date) }

  fn money(&mut self, name: &str) -> Field<i64> { self.parse(name, parse_money) }

  fn days(&mut self, name: &str) -> Field<u32> { self.parse(name, parse_days) }

  fn flag(&mut self, name: &str) -> Field<bool> { self.parse(name, parse_flag) }

  fn enumeration<E: std::str::FromStr>(&mut self, name: &str) -> Field<E> {
    self.parse(name, parse_enum::<E>)
  }

  fn finish(self, source: &str) -> (Option<String>, Metadata) {
    let mut metadata = self.fields;
    if !source.is_empty() {
      metadata.insert("source".to_owned(), source.to_owned());
    }
    (self.external_id, metadata)
  }
}

/// Whether any identifying field parsed, and whether any failed.
#[derive(Default)]
struct Identity {
  parsed: bool,
  failed: bool,
}

impl Identity {
  fn see<T>(mut self, field: &Field<T>) -> Self {
    self.parsed |= field.is_value();
    self.failed |= field.is_unparsed();
    self
  }

  fn unusable(&self, external_id: Option<&str>) -> bool {
    external_id.is_none() && !self.parsed && self.failed
  }
}

/// A normalized record before tree assembly.
enum Node {
  Person(Person),
  Booking(Booking),
  Arrest(Arrest),
  Hold(Hold),
  Bond(Bond),
  Sentence(Sentence),
  Charge {
    charge:   Charge,
    bond:     Option<String>,
    sentence: Option<String>,
  },
}

fn person(
  record: &RawRecord,
  jurisdiction: &str,
  ingested_on: NaiveDate,
  warnings: &mut Vec<Warning>,
) -> (Node, bool) {
  let mut x = Extractor::new(record, warnings);
  let mut full_name = x.parse("full_name", normalize_name);
  let surname = x.text("surname");
  let given_names = x.text("given_names");
  let mut birthdate = x.parse("birthdate", |raw| {
    parse_date(raw).map(|date| BirthDate {
      date,
      inferred: false,
    })
  });
  let age = x.parse("age", parse_count);
  let gender = x.enumeration("gender");
  let race = x.enumeration("race");
  let ethnicity = x.enumeration("ethnicity");
  let place_of_residence = x.text("place_of_residence");

  if full_name.is_absent() {
    let composed = [given_names.value(), surname.value()]
      .into_iter()
      .flatten()
      .cloned()
      .collect::<Vec<_>>()
      .join(" ");
    if !composed.is_empty() {
      full_name = Field::Value(composed);
    }
  }

  if !birthdate.is_value() {
    if let Some(date) = age
      .value()
      .and_then(|age| i32::try_from(*age).ok())
      .and_then(|age| NaiveDate::from_ymd_opt(ingested_on.year() - age, 1, 1))
    {
      birthdate = Field::Value(BirthDate {
        date,
        inferred: true,
      });
    }
  }

  let identity = Identity::default()
    .see(&full_name)
    .see(&surname)
    .see(&given_names)
    .see(&birthdate);
  let (external_id, metadata) = x.finish(&record.source);
  let drop = identity.unusable(external_id.as_deref());

  let person = Person {
    id: EntityId::new(),
    external_id,
    jurisdiction: jurisdiction.to_owned(),
    full_name,
    surname,
    given_names,
    birthdate,
    gender,
    race,
    ethnicity,
    place_of_residence,
    metadata,
    bookings: Vec::new(),
  };
  (Node::Person(person), drop)
}

fn booking(record: &RawRecord, warnings: &mut Vec<Warning>) -> (Node, bool) {
  let mut x = Extractor::new(record, warnings);
  let admission_date = x.date("admission_date");
  let admission_reason = x.enumeration("admission_reason");
  let release_date = x.date("release_date");
  let projected_release_date = x.date("projected_release_date");
  let release_reason = x.enumeration("release_reason");
  let mut custody_status = x.enumeration("custody_status");
  let facility = x.text("facility");
  let classification = x.enumeration("classification");

  if release_date.is_value() && custody_status.is_absent() {
    custody_status = Field::Value(CustodyStatus::Released);
  }

  let identity = Identity::default().see(&admission_date).see(&facility);
  let (external_id, metadata) = x.finish(&record.source);
  let drop = identity.unusable(external_id.as_deref());

  let booking = Booking {
    external_id,
    admission_date,
    admission_reason,
    release_date,
    projected_release_date,
    release_reason,
    custody_status,
    facility,
    classification,
    metadata,
    ..Default::default()
  };
  (Node::Booking(booking), drop)
}

fn arrest(record: &RawRecord, warnings: &mut Vec<Warning>) -> (Node, bool) {
  let mut x = Extractor::new(record, warnings);
  let arrest_date = x.date("arrest_date");
  let location = x.text("location");
  let agency = x.text("agency");
  let officer_name = x.text("officer_name");
  let officer_id = x.text("officer_id");

  let identity = Identity::default().see(&arrest_date).see(&agency);
  let (external_id, metadata) = x.finish(&record.source);
  let drop = identity.unusable(external_id.as_deref());

  let arrest = Arrest {
    id: EntityId::new(),
    external_id,
    arrest_date,
    location,
    agency,
    officer_name,
    officer_id,
    metadata,
  };
  (Node::Arrest(arrest), drop)
}

fn hold(record: &RawRecord, warnings: &mut Vec<Warning>) -> (Node, bool) {
  let mut x = Extractor::new(record, warnings);
  let jurisdiction_name = x.text("jurisdiction_name");
  let status = x.enumeration("status");

  let identity = Identity::default().see(&jurisdiction_name);
  let (external_id, metadata) = x.finish(&record.source);
  let drop = identity.unusable(external_id.as_deref());

  let hold = Hold {
    id: EntityId::new(),
    external_id,
    jurisdiction_name,
    status,
    metadata,
  };
  (Node::Hold(hold), drop)
}

fn bond(record: &RawRecord, warnings: &mut Vec<Warning>) -> (Node, bool) {
  let mut x = Extractor::new(record, warnings);
  let amount_cents = x.money("amount");
  let bond_type = x.enumeration("bond_type");
  let status = x.enumeration("status");
  let bond_agent = x.text("bond_agent");

  let identity = Identity::default()
    .see(&amount_cents)
    .see(&bond_type)
    .see(&bond_agent);
  let (external_id, metadata) = x.finish(&record.source);
  let drop = identity.unusable(external_id.as_deref());

  let bond = Bond {
    id: EntityId::new(),
    external_id,
    amount_cents,
    bond_type,
    status,
    bond_agent,
    metadata,
  };
  (Node::Bond(bond), drop)
}

fn sentence(
  record: &RawRecord,
  ingested_on: NaiveDate,
  warnings: &mut Vec<Warning>,
) -> (Node, bool) {
  let mut x = Extractor::new(record, warnings);
  let mut status = x.enumeration("status");
  let sentencing_region = x.text("sentencing_region");
  let min_length_days = x.days("min_length");
  let max_length_days = x.days("max_length");
  let date_imposed = x.date("date_imposed");
  let mut completion_date = x.date("completion_date");
  let mut projected_completion_date = x.date("projected_completion_date");
  let is_life = x.flag("is_life");
  let is_probation = x.flag("is_probation");
  let is_suspended = x.flag("is_suspended");
  let fine_cents = x.money("fine");
  let parole_possible = x.flag("parole_possible");
  let post_release_supervision_length_days = x.days("post_release_supervision_length");

  if let Some(date) = completion_date.cloned() {
    if date > ingested_on {
      if projected_completion_date.is_absent() {
        projected_completion_date = Field::Value(date);
      }
      completion_date = Field::Absent;
    } else if status.is_absent() {
      status = Field::Value(SentenceStatus::Completed);
    }
  }

  let identity = Identity::default()
    .see(&date_imposed)
    .see(&min_length_days)
    .see(&max_length_days)
    .see(&sentencing_region);
  let (external_id, metadata) = x.finish(&record.source);
  let drop = identity.unusable(external_id.as_deref());

  let sentence = Sentence {
    id: EntityId::new(),
    external_id,
    status,
    sentencing_region,
    min_length_days,
    max_length_days,
    date_imposed,
    completion_date,
    projected_completion_date,
    is_life,
    is_probation,
    is_suspended,
    fine_cents,
    parole_possible,
    post_release_supervision_length_days,
    metadata,
  };
  (Node::Sentence(sentence), drop)
}

fn charge(record: &RawRecord, warnings: &mut Vec<Warning>) -> (Node, bool) {
  let mut x = Extractor::new(record, warnings);
  let bond = x.take_raw("bond");
  let sentence = x.take_raw("sentence");
  let offense_date = x.date("offense_date");
  let statute = x.text("statute");
  let name = x.text("name");
  let attempted = x.flag("attempted");
  let degree = x.enumeration("degree");
  let class = x.enumeration("class");
  let level = x.text("level");
  let status = x.enumeration("status");
  let fee_cents = x.money("fee");
  let charging_entity = x.text("charging_entity");
  let court_type = x.enumeration("court_type");
  let case_number = x.text("case_number");
  let next_court_date = x.date("next_court_date");
  let judge_name = x.text("judge_name");
  let number_of_counts = x.parse("number_of_counts", parse_count);

  let identity = Identity::default()
    .see(&statute)
    .see(&name)
    .see(&offense_date)
    .see(&case_number);
  let (external_id, metadata) = x.finish(&record.source);
  let drop = identity.unusable(external_id.as_deref());

  let charge = Charge {
    id: EntityId::new(),
    external_id,
    offense_date,
    statute,
    name,
    attempted,
    degree,
    class,
    level,
    status,
    fee_cents,
    charging_entity,
    court_type,
    case_number,
    next_court_date,
    judge_name,
    number_of_counts,
    bond_id: None,
    sentence_id: None,
    metadata,
  };
  (
    Node::Charge {
      charge,
      bond,
      sentence,
    },
    drop,
  )
}

// ─── Tree assembly ───────────────────────────────────────────────────────────

fn stage(kind: EntityKind) -> u8 {
  match kind {
    EntityKind::Person => 0,
    EntityKind::Booking => 1,
    EntityKind::Arrest | EntityKind::Hold | EntityKind::Bond | EntityKind::Sentence => 2,
    EntityKind::Charge => 3,
  }
}

struct Assembly<'r> {
  people:   Vec<Person>,
  /// Person key → index into `people`.
  persons:  HashMap<&'r str, usize>,
  /// Booking key → (person index, booking index).
  bookings: HashMap<&'r str, (usize, usize)>,
  /// Bond and sentence keys → (booking key, id).
  bonds:    HashMap<&'r str, (&'r str, EntityId)>,
  sentences: HashMap<&'r str, (&'r str, EntityId)>,
  warnings: Vec<Warning>,
}

impl<'r> Assembly<'r> {
  fn warn(&mut self, record: &RawRecord, external_id: Option<String>, warning_type: WarningType) {
    self
      .warnings
      .push(Warning::new(record.kind, external_id, warning_type).with_record_key(&record.key));
  }

  fn orphan(&mut self, record: &RawRecord, external_id: Option<String>) {
    debug!(key = %record.key, kind = %record.kind, parent = ?record.parent, "orphaned record");
    self.warn(record, external_id, WarningType::OrphanedRecord {
      parent: record.parent.clone(),
    });
  }

  fn booking_mut(&mut self, key: &str) -> Option<&mut Booking> {
    let (p, b) = *self.bookings.get(key)?;
    self.people.get_mut(p)?.bookings.get_mut(b)
  }

  /// Resolve a charge's bond or sentence reference within its own booking.
  fn reference(
    &mut self,
    record: &'r RawRecord,
    external_id: &Option<String>,
    field: &str,
    key: Option<String>,
  ) -> Option<EntityId> {
    let key = key?;
    let table = if field == "bond" { &self.bonds } else { &self.sentences };
    let resolved = table
      .get(key.as_str())
      .filter(|(booking, _)| Some(*booking) == record.parent.as_deref())
      .map(|(_, id)| *id);
    if resolved.is_none() {
      self.warn(record, external_id.clone(), WarningType::DanglingReference {
        field: field.to_owned(),
        key,
      });
    }
    resolved
  }

  fn attach(&mut self, record: &'r RawRecord, node: Node) {
    let parent = record.parent.as_deref();
    match node {
      Node::Person(person) => {
        self.persons.insert(&record.key, self.people.len());
        self.people.push(person);
      }
      Node::Booking(booking) => {
        let Some(&p) = parent.and_then(|key| self.persons.get(key)) else {
          return self.orphan(record, booking.external_id);
        };
        let bookings = &mut self.people[p].bookings;
        self.bookings.insert(&record.key, (p, bookings.len()));
        bookings.push(booking);
      }
      Node::Arrest(arrest) => {
        let Some(parent) = parent.filter(|key| self.bookings.contains_key(key)) else {
          return self.orphan(record, arrest.external_id);
        };
        let ext = arrest.external_id.clone();
        let duplicate = match self.booking_mut(parent) {
          Some(booking) if booking.arrest.is_none() => {
            booking.arrest = Some(arrest);
            false
          }
          _ => true,
        };
        if duplicate {
          self.warn(record, ext, WarningType::DuplicateRecord);
        }
      }
      Node::Hold(hold) => match parent.and_then(|key| self.booking_mut(key)) {
        Some(booking) => booking.holds.push(hold),
        None => self.orphan(record, hold.external_id),
      },
      Node::Bond(bond) => {
        let id = bond.id;
        match parent.and_then(|key| self.booking_mut(key)) {
          Some(booking) => booking.bonds.push(bond),
          None => return self.orphan(record, bond.external_id),
        }
        if let Some(parent) = parent {
          self.bonds.insert(&record.key, (parent, id));
        }
      }
      Node::Sentence(sentence) => {
        let id = sentence.id;
        match parent.and_then(|key| self.booking_mut(key)) {
          Some(booking) => booking.sentences.push(sentence),
          None => return self.orphan(record, sentence.external_id),
        }
        if let Some(parent) = parent {
          self.sentences.insert(&record.key, (parent, id));
        }
      }
      Node::Charge {
        mut charge,
        bond,
        sentence,
      } => {
        if !parent.is_some_and(|key| self.bookings.contains_key(key)) {
          return self.orphan(record, charge.external_id);
        }
        let ext = charge.external_id.clone();
        charge.bond_id = self.reference(record, &ext, "bond", bond);
        charge.sentence_id = self.reference(record, &ext, "sentence", sentence);
        if let Some(booking) = parent.and_then(|key| self.booking_mut(key)) {
          booking.charges.push(charge);
        }
      }
    }
  }
}

/// Normalize a raw batch. `today` stands in for the ingest date when the
/// batch carries no timestamp.
pub fn normalize(raw: &RawBatch, today: NaiveDate) -> Batch {
  let ingested_on = raw.ingested_at.map(|at| at.date_naive()).unwrap_or(today);
  let mut warnings = Vec::new();

  let mut seen = HashSet::new();
  let mut nodes: Vec<(&RawRecord, Node)> = Vec::with_capacity(raw.records.len());
  for record in &raw.records {
    if !seen.insert(record.key.as_str()) {
      warnings.push(
        Warning::new(
          record.kind,
          record.fields.get("external_id").map(|id| id.trim().to_owned()),
          WarningType::DuplicateRecord,
        )
        .with_record_key(&record.key),
      );
      continue;
    }

    let (node, drop) = match record.kind {
      EntityKind::Person => person(record, &raw.jurisdiction, ingested_on, &mut warnings),
      EntityKind::Booking => booking(record, &mut warnings),
      EntityKind::Arrest => arrest(record, &mut warnings),
      EntityKind::Hold => hold(record, &mut warnings),
      EntityKind::Bond => bond(record, &mut warnings),
      EntityKind::Sentence => sentence(record, ingested_on, &mut warnings),
      EntityKind::Charge => charge(record, &mut warnings),
    };

    if drop {
      debug!(key = %record.key, kind = %record.kind, "dropping unparsable entity");
      warnings.push(
        Warning::new(record.kind, None, WarningType::UnparsableEntity).with_record_key(&record.key),
      );
      continue;
    }
    nodes.push((record, node));
  }

  nodes.sort_by_key(|(record, _)| stage(record.kind));

  let mut assembly = Assembly {
    people: Vec::new(),
    persons: HashMap::new(),
    bookings: HashMap::new(),
    bonds: HashMap::new(),
    sentences: HashMap::new(),
    warnings,
  };
  for (record, node) in nodes {
    assembly.attach(record, node);
  }

  Batch {
    jurisdiction: raw.jurisdiction.clone(),
    ingested_on,
    people: assembly.people,
    warnings: assembly.warnings,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::{ChargeClass, Gender};

  fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

  fn record(kind: EntityKind, key: &str, parent: Option<&str>, fields: &[(&str, &str)]) -> RawRecord {
    RawRecord {
      kind,
      source: "roster".into(),
      key: key.into(),
      parent: parent.map(str::to_owned),
      fields: fields
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect(),
    }
  }

  fn batch(records: Vec<RawRecord>) -> Batch {
    let raw = RawBatch {
      jurisdiction: "us_al_jefferson".into(),
      ingested_at: None,
      records,
    };
    normalize(&raw, date(2024, 6, 1))
  }

  #[test]
  fn scalar_parsers() {
    assert_eq!(clean_text("  jane \t  doe "), Some("JANE DOE".into()));
    assert_eq!(normalize_name("Doe,  Jane"), Some("JANE DOE".into()));
    assert_eq!(parse_date("2020-01-02"), Some(date(2020, 1, 2)));
    assert_eq!(parse_date("01/02/2020"), Some(date(2020, 1, 2)));
    assert_eq!(parse_date("Jan 2, 2020"), Some(date(2020, 1, 2)));
    assert_eq!(parse_date("2020-01-02T10:00:00Z"), Some(date(2020, 1, 2)));
    assert_eq!(parse_date("yesterday"), None);
    assert_eq!(parse_money("$1,500.50"), Some(150_050));
    assert_eq!(parse_money("25.5"), Some(2_550));
    assert_eq!(parse_money("1.234"), None);
    assert_eq!(parse_money("-5"), None);
    assert_eq!(parse_days("1 year 6 months"), Some(545));
    assert_eq!(parse_days("90"), Some(90));
    assert_eq!(parse_days("a while"), None);
    assert_eq!(parse_flag("Yes"), Some(true));
    assert_eq!(parse_enum::<ChargeClass>("Misd"), Some(ChargeClass::Misdemeanor));
    assert_eq!(parse_enum::<CustodyStatus>("in custody"), Some(CustodyStatus::InCustody));
  }

  #[test]
  fn builds_person_tree() {
    let batch = batch(vec![
      record(EntityKind::Charge, "c1", Some("b1"), &[("statute", "13a-6-2"), ("bond", "bd1")]),
      record(EntityKind::Person, "p1", None, &[
        ("external_id", "P1"),
        ("full_name", "Doe, Jane"),
        ("gender", "F"),
        ("eye_color", "brown"),
      ]),
      record(EntityKind::Booking, "b1", Some("p1"), &[("admission_date", "2024-05-01")]),
      record(EntityKind::Bond, "bd1", Some("b1"), &[("amount", "$500")]),
    ]);

    assert!(batch.warnings.is_empty(), "{:?}", batch.warnings);
    let [person] = batch.people.as_slice() else {
      panic!("expected one person");
    };
    assert_eq!(person.external_id.as_deref(), Some("P1"));
    assert_eq!(person.jurisdiction, "us_al_jefferson");
    assert_eq!(person.full_name, Field::Value("JANE DOE".into()));
    assert_eq!(person.gender, Field::Value(Gender::Female));
    assert_eq!(person.metadata.get("eye_color").map(String::as_str), Some("brown"));
    assert_eq!(person.metadata.get("source").map(String::as_str), Some("roster"));

    let booking = &person.bookings[0];
    assert_eq!(booking.bonds[0].amount_cents, Field::Value(50_000));
    assert_eq!(booking.charges[0].statute, Field::Value("13A-6-2".into()));
    assert_eq!(booking.charges[0].bond_id, Some(booking.bonds[0].id));
  }

  #[test]
  fn unparsed_field_is_kept_and_reported() {
    let batch = batch(vec![record(EntityKind::Person, "p1", None, &[
      ("full_name", "Jane Doe"),
      ("birthdate", "sometime"),
    ])]);
    assert_eq!(batch.people[0].birthdate, Field::Unparsed("sometime".into()));
    assert_eq!(batch.warnings.len(), 1);
    assert_eq!(batch.warnings[0].warning_type, WarningType::UnparsedField {
      field: "birthdate".into(),
      raw:   "sometime".into(),
    });
  }

  #[test]
  fn unparsable_entity_is_dropped_with_its_descendants() {
    let batch = batch(vec![
      record(EntityKind::Person, "p1", None, &[("birthdate", "??")]),
      record(EntityKind::Booking, "b1", Some("p1"), &[]),
    ]);
    assert!(batch.people.is_empty());
    let types: Vec<_> = batch.warnings.iter().map(|w| &w.warning_type).collect();
    assert!(types.contains(&&WarningType::UnparsableEntity));
    assert!(types.contains(&&WarningType::OrphanedRecord {
      parent: Some("p1".into()),
    }));
  }

  #[test]
  fn external_id_keeps_entity_with_unparsed_identity() {
    let batch = batch(vec![record(EntityKind::Person, "p1", None, &[
      ("external_id", "P9"),
      ("birthdate", "??"),
    ])]);
    assert_eq!(batch.people.len(), 1);
  }

  #[test]
  fn derived_values() {
    let batch = batch(vec![
      record(EntityKind::Person, "p1", None, &[("full_name", "Jane Doe"), ("age", "40")]),
      record(EntityKind::Booking, "b1", Some("p1"), &[("release_date", "2024-05-02")]),
      record(EntityKind::Sentence, "s1", Some("b1"), &[("completion_date", "2030-01-01")]),
      record(EntityKind::Sentence, "s2", Some("b1"), &[("completion_date", "2023-01-01")]),
    ]);
    let person = &batch.people[0];
    assert_eq!(
      person.birthdate,
      Field::Value(BirthDate {
        date:     date(1984, 1, 1),
        inferred: true,
      })
    );
    let booking = &person.bookings[0];
    assert_eq!(booking.custody_status, Field::Value(CustodyStatus::Released));
    assert_eq!(booking.sentences[0].completion_date, Field::Absent);
    assert_eq!(booking.sentences[0].projected_completion_date, Field::Value(date(2030, 1, 1)));
    assert_eq!(booking.sentences[1].status, Field::Value(SentenceStatus::Completed));
  }

  #[test]
  fn structural_problems_are_warnings() {
    let batch = batch(vec![
      record(EntityKind::Person, "p1", None, &[("full_name", "Jane Doe")]),
      record(EntityKind::Person, "p1", None, &[("full_name", "John Doe")]),
      record(EntityKind::Booking, "b1", Some("p1"), &[]),
      record(EntityKind::Booking, "b2", Some("nobody"), &[]),
      record(EntityKind::Arrest, "a1", Some("b1"), &[]),
      record(EntityKind::Arrest, "a2", Some("b1"), &[]),
      record(EntityKind::Charge, "c1", Some("b1"), &[("sentence", "missing")]),
    ]);

    let person = &batch.people[0];
    assert_eq!(person.full_name, Field::Value("JANE DOE".into()));
    assert_eq!(person.bookings.len(), 1);
    assert!(person.bookings[0].arrest.is_some());
    assert_eq!(person.bookings[0].charges[0].sentence_id, None);

    let keyed: Vec<_> = batch
      .warnings
      .iter()
      .map(|w| (w.record_key.as_deref().unwrap(), w.warning_type.clone()))
      .collect();
    assert_eq!(keyed, vec![
      ("p1", WarningType::DuplicateRecord),
      ("b2", WarningType::OrphanedRecord {
        parent: Some("nobody".into()),
      }),
      ("a2", WarningType::DuplicateRecord),
      ("c1", WarningType::DanglingReference {
        field: "sentence".into(),
        key:   "missing".into(),
      }),
    ]);
  }

  #[test]
  fn references_do_not_cross_bookings() {
    let batch = batch(vec![
      record(EntityKind::Person, "p1", None, &[("full_name", "Jane Doe")]),
      record(EntityKind::Booking, "b1", Some("p1"), &[("facility", "A")]),
      record(EntityKind::Booking, "b2", Some("p1"), &[("facility", "B")]),
      record(EntityKind::Bond, "bd1", Some("b1"), &[("amount", "100")]),
      record(EntityKind::Charge, "c1", Some("b2"), &[("bond", "bd1")]),
    ]);
    assert_eq!(batch.people[0].bookings[1].charges[0].bond_id, None);
    assert!(matches!(
      batch.warnings[0].warning_type,
      WarningType::DanglingReference { .. }
    ));
  }
}

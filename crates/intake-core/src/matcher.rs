//! Rule-based matching of incoming entities against the persisted entities
//! of the same kind and parent scope.
//!
//! Strategies run in order; the first one yielding any candidate decides:
//!
//! 1. [`MatchStrategy::ExternalId`]: exact equality on the source id.
//! 2. [`MatchStrategy::CompositeKey`]: a kind-specific comparison of stable
//!    fields, skipping candidates whose external id conflicts.
//!
//! Within a collection every external id is resolved before any composite
//! key, so an id-less entity can never claim the candidate that a later
//! entity names by id.
//!
//! More than one candidate is an ambiguous match and is never resolved by
//! guessing. Booking-owned kinds have two exceptions: a single candidate
//! identical to the incoming entity is an exact replay and is taken, and a
//! set of candidates identical to each other is interchangeable, so the
//! first one is taken.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::entity::{
  Arrest, Bond, BondType, Booking, Charge, ChargeClass, ChargeDegree, CourtType,
  Entity, Hold, Person, Sentence,
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
  ExternalId,
  CompositeKey,
}

/// The decision for one incoming entity. `index` points into the candidate
/// slice passed to the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
  Matched {
    index:    usize,
    strategy: MatchStrategy,
  },
  New,
  Ambiguous {
    strategy:   MatchStrategy,
    candidates: usize,
  },
}

impl MatchOutcome {
  pub fn matched_index(&self) -> Option<usize> {
    match self {
      Self::Matched { index, .. } => Some(*index),
      _ => None,
    }
  }
}

/// What to do when a strategy yields several candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityPolicy {
  /// Always ambiguous.
  Strict,
  /// Take the one candidate identical to the incoming entity, or the first
  /// candidate when all candidates are identical apart from their surrogate
  /// ids.
  CollapseDuplicates,
}

// ─── Matchable ───────────────────────────────────────────────────────────────

pub trait Matchable: Entity {
  type Key: PartialEq + std::fmt::Debug;

  const AMBIGUITY: AmbiguityPolicy = AmbiguityPolicy::CollapseDuplicates;

  /// The composite key, or `None` when the entity lacks the fields required
  /// to form one. Only parsed values take part; absent and unparsed both
  /// read as unknown.
  fn composite_key(&self) -> Option<Self::Key>;

  /// Whether two composite keys identify the same entity.
  fn keys_match(a: &Self::Key, b: &Self::Key) -> bool { a == b }
}

/// Birth component of a person's composite key. Inferred birth dates only
/// carry a year and only match other inferred dates, within one year either
/// way: the age a roster reports moves on birthdays and across New Year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BirthKey {
  Exact(NaiveDate),
  InferredYear(i32),
}

impl Matchable for Person {
  type Key = (String, Option<BirthKey>);

  const AMBIGUITY: AmbiguityPolicy = AmbiguityPolicy::Strict;

  fn composite_key(&self) -> Option<Self::Key> {
    let name = self.full_name.cloned()?;
    let birth = self.birthdate.value().map(|b| {
      if b.inferred {
        BirthKey::InferredYear(b.date.year())
      } else {
        BirthKey::Exact(b.date)
      }
    });
    Some((name, birth))
  }

  fn keys_match((name_a, birth_a): &Self::Key, (name_b, birth_b): &Self::Key) -> bool {
    name_a == name_b
      && match (birth_a, birth_b) {
        (Some(BirthKey::InferredYear(a)), Some(BirthKey::InferredYear(b))) => (a - b).abs() <= 1,
        _ => birth_a == birth_b,
      }
  }
}

impl Matchable for Booking {
  type Key = (Option<NaiveDate>, Option<String>);

  fn composite_key(&self) -> Option<Self::Key> {
    Some((self.admission_date.cloned(), self.facility.cloned()))
  }
}

/// A booking has at most one arrest, so any arrest of the matched booking is
/// the same arrest.
impl Matchable for Arrest {
  type Key = ();

  fn composite_key(&self) -> Option<Self::Key> { Some(()) }
}

impl Matchable for Hold {
  type Key = Option<String>;

  fn composite_key(&self) -> Option<Self::Key> {
    Some(self.jurisdiction_name.cloned())
  }
}

impl Matchable for Bond {
  type Key = (Option<i64>, Option<BondType>, Option<String>);

  fn composite_key(&self) -> Option<Self::Key> {
    Some((
      self.amount_cents.cloned(),
      self.bond_type.cloned(),
      self.bond_agent.cloned(),
    ))
  }
}

#[derive(Debug, PartialEq)]
pub struct ChargeKey {
  offense_date:    Option<NaiveDate>,
  statute:         Option<String>,
  name:            Option<String>,
  attempted:       Option<bool>,
  degree:          Option<ChargeDegree>,
  class:           Option<ChargeClass>,
  level:           Option<String>,
  charging_entity: Option<String>,
  case_number:     Option<String>,
  court_type:      Option<CourtType>,
}

impl Matchable for Charge {
  type Key = ChargeKey;

  fn composite_key(&self) -> Option<Self::Key> {
    Some(ChargeKey {
      offense_date:    self.offense_date.cloned(),
      statute:         self.statute.cloned(),
      name:            self.name.cloned(),
      attempted:       self.attempted.cloned(),
      degree:          self.degree.cloned(),
      class:           self.class.cloned(),
      level:           self.level.cloned(),
      charging_entity: self.charging_entity.cloned(),
      case_number:     self.case_number.cloned(),
      court_type:      self.court_type.cloned(),
    })
  }
}

#[derive(Debug, PartialEq)]
pub struct SentenceKey {
  sentencing_region: Option<String>,
  min_length_days:   Option<u32>,
  max_length_days:   Option<u32>,
  date_imposed:      Option<NaiveDate>,
  is_life:           Option<bool>,
  is_probation:      Option<bool>,
  is_suspended:      Option<bool>,
  fine_cents:        Option<i64>,
  parole_possible:   Option<bool>,
  post_release_days: Option<u32>,
}

impl Matchable for Sentence {
  type Key = SentenceKey;

  fn composite_key(&self) -> Option<Self::Key> {
    Some(SentenceKey {
      sentencing_region: self.sentencing_region.cloned(),
      min_length_days:   self.min_length_days.cloned(),
      max_length_days:   self.max_length_days.cloned(),
      date_imposed:      self.date_imposed.cloned(),
      is_life:           self.is_life.cloned(),
      is_probation:      self.is_probation.cloned(),
      is_suspended:      self.is_suspended.cloned(),
      fine_cents:        self.fine_cents.cloned(),
      parole_possible:   self.parole_possible.cloned(),
      post_release_days: self.post_release_supervision_length_days.cloned(),
    })
  }
}

// ─── Matching ────────────────────────────────────────────────────────────────

/// Match `incoming` against the unclaimed entries of `existing`.
///
/// `claimed[i]` marks candidates already taken by another incoming entity
/// of the same scope; it must be as long as `existing`.
pub fn match_one<T: Matchable>(
  incoming: &T,
  existing: &[T],
  claimed: &[bool],
) -> MatchOutcome {
  by_external_id(incoming, existing, claimed)
    .or_else(|| by_composite_key(incoming, existing, claimed))
    .unwrap_or(MatchOutcome::New)
}

/// Match every incoming entity of one scope. Each existing entity can be
/// claimed at most once; external ids claim first, in order, then composite
/// keys claim from what is left, in order.
pub fn match_collection<T: Matchable>(
  incoming: &[T],
  existing: &[T],
) -> Vec<MatchOutcome> {
  let mut claimed = vec![false; existing.len()];
  let mut outcomes = Vec::with_capacity(incoming.len());

  for entity in incoming {
    let outcome = by_external_id(entity, existing, &claimed);
    claim(&mut claimed, outcome);
    outcomes.push(outcome);
  }

  for (entity, outcome) in incoming.iter().zip(&mut outcomes) {
    if outcome.is_none() {
      *outcome = by_composite_key(entity, existing, &claimed);
      claim(&mut claimed, *outcome);
    }
  }

  outcomes
    .into_iter()
    .map(|outcome| outcome.unwrap_or(MatchOutcome::New))
    .collect()
}

fn claim(claimed: &mut [bool], outcome: Option<MatchOutcome>) {
  if let Some(index) = outcome.and_then(|o| o.matched_index()) {
    claimed[index] = true;
  }
}

fn open<'a, T>(existing: &'a [T], claimed: &'a [bool]) -> impl Iterator<Item = (usize, &'a T)> {
  existing
    .iter()
    .enumerate()
    .filter(|(i, _)| !claimed.get(*i).copied().unwrap_or(false))
}

fn by_external_id<T: Matchable>(
  incoming: &T,
  existing: &[T],
  claimed: &[bool],
) -> Option<MatchOutcome> {
  let ext = incoming.external_id()?;
  let hits: Vec<usize> = open(existing, claimed)
    .filter(|(_, e)| e.external_id() == Some(ext))
    .map(|(i, _)| i)
    .collect();
  decide(incoming, &hits, existing, MatchStrategy::ExternalId)
}

fn by_composite_key<T: Matchable>(
  incoming: &T,
  existing: &[T],
  claimed: &[bool],
) -> Option<MatchOutcome> {
  let key = incoming.composite_key()?;
  let hits: Vec<usize> = open(existing, claimed)
    .filter(|(_, e)| !external_ids_conflict(incoming, *e))
    .filter(|(_, e)| e.composite_key().is_some_and(|k| T::keys_match(&key, &k)))
    .map(|(i, _)| i)
    .collect();
  decide(incoming, &hits, existing, MatchStrategy::CompositeKey)
}

fn decide<T: Matchable>(
  incoming: &T,
  hits: &[usize],
  existing: &[T],
  strategy: MatchStrategy,
) -> Option<MatchOutcome> {
  let matched = |index: usize| MatchOutcome::Matched { index, strategy };
  let ambiguous = MatchOutcome::Ambiguous {
    strategy,
    candidates: hits.len(),
  };

  match hits {
    [] => None,
    [index] => Some(matched(*index)),
    _ if T::AMBIGUITY == AmbiguityPolicy::Strict => Some(ambiguous),
    [first, rest @ ..] => {
      let replays: Vec<usize> = hits
        .iter()
        .copied()
        .filter(|i| interchangeable(incoming, &existing[*i]))
        .collect();
      if let [index] = replays.as_slice() {
        return Some(matched(*index));
      }
      let collapse = rest
        .iter()
        .all(|i| interchangeable(&existing[*first], &existing[*i]));
      Some(if collapse { matched(*first) } else { ambiguous })
    }
  }
}

fn external_ids_conflict<T: Entity>(a: &T, b: &T) -> bool {
  matches!((a.external_id(), b.external_id()), (Some(x), Some(y)) if x != y)
}

/// True when the two entities differ only in their surrogate id.
fn interchangeable<T: Entity>(a: &T, b: &T) -> bool {
  let strip = |e: &T| {
    e.body().ok().map(|mut body| {
      if let Some(obj) = body.as_object_mut() {
        obj.remove("id");
      }
      body
    })
  };
  matches!((strip(a), strip(b)), (Some(x), Some(y)) if x == y)
}

//! Field-level precedence and child-collection union.
//!
//! Given an existing entity `E` and a matched incoming entity `I`, the merged
//! entity keeps `E`'s surrogate id and takes each attribute from `I` when `I`
//! parsed a value for it, otherwise from `E`. Child collections are merged as
//! sets keyed by the [matcher](crate::matcher): matched pairs recurse,
//! unmatched incoming children are appended and unmatched existing children
//! are kept as they are.
//!
//! Every decision is reported to a [`MergeSink`]; the reconciler uses this to
//! stage writes, [`NoopSink`] makes the merge a pure function.

use std::{collections::HashMap, convert::Infallible};

use crate::{
  entity::{
    Arrest, Bond, Booking, Charge, EntityId, Field, Hold, Metadata, Person,
    Sentence,
  },
  matcher::{MatchOutcome, Matchable, match_collection},
};

// ─── Field precedence ────────────────────────────────────────────────────────

impl<T: Clone> Field<T> {
  /// Incoming parsed values win. An incoming unparsed value only fills a
  /// field that was never supplied; it never erases a known value.
  pub fn merge(&self, incoming: &Self) -> Self {
    match (self, incoming) {
      (_, Field::Value(_)) | (Field::Absent, Field::Unparsed(_)) => {
        incoming.clone()
      }
      _ => self.clone(),
    }
  }
}

fn merge_external_id(existing: &Option<String>, incoming: &Option<String>) -> Option<String> {
  incoming.clone().or_else(|| existing.clone())
}

fn merge_metadata(existing: &Metadata, incoming: &Metadata) -> Metadata {
  let mut merged = existing.clone();
  merged.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
  merged
}

/// Scalar merge of one matched pair. The result carries the existing id and
/// no children; children are merged separately.
pub trait MergeFields: Sized {
  fn merge_fields(&self, incoming: &Self) -> Self;
}

impl MergeFields for Person {
  fn merge_fields(&self, incoming: &Self) -> Self {
    Person {
      id:                 self.id,
      external_id:        merge_external_id(&self.external_id, &incoming.external_id),
      jurisdiction:       self.jurisdiction.clone(),
      full_name:          self.full_name.merge(&incoming.full_name),
      surname:            self.surname.merge(&incoming.surname),
      given_names:        self.given_names.merge(&incoming.given_names),
      birthdate:          self.birthdate.merge(&incoming.birthdate),
      gender:             self.gender.merge(&incoming.gender),
      race:               self.race.merge(&incoming.race),
      ethnicity:          self.ethnicity.merge(&incoming.ethnicity),
      place_of_residence: self.place_of_residence.merge(&incoming.place_of_residence),
      metadata:           merge_metadata(&self.metadata, &incoming.metadata),
      bookings:           Vec::new(),
    }
  }
}

impl MergeFields for Booking {
  fn merge_fields(&self, incoming: &Self) -> Self {
    Booking {
      id:                     self.id,
      external_id:            merge_external_id(&self.external_id, &incoming.external_id),
      admission_date:         self.admission_date.merge(&incoming.admission_date),
      admission_reason:       self.admission_reason.merge(&incoming.admission_reason),
      release_date:           self.release_date.merge(&incoming.release_date),
      projected_release_date: self
        .projected_release_date
        .merge(&incoming.projected_release_date),
      release_reason:         self.release_reason.merge(&incoming.release_reason),
      custody_status:         self.custody_status.merge(&incoming.custody_status),
      facility:               self.facility.merge(&incoming.facility),
      classification:         self.classification.merge(&incoming.classification),
      metadata:               merge_metadata(&self.metadata, &incoming.metadata),
      ..Default::default()
    }
  }
}

impl MergeFields for Arrest {
  fn merge_fields(&self, incoming: &Self) -> Self {
    Arrest {
      id:           self.id,
      external_id:  merge_external_id(&self.external_id, &incoming.external_id),
      arrest_date:  self.arrest_date.merge(&incoming.arrest_date),
      location:     self.location.merge(&incoming.location),
      agency:       self.agency.merge(&incoming.agency),
      officer_name: self.officer_name.merge(&incoming.officer_name),
      officer_id:   self.officer_id.merge(&incoming.officer_id),
      metadata:     merge_metadata(&self.metadata, &incoming.metadata),
    }
  }
}

impl MergeFields for Hold {
  fn merge_fields(&self, incoming: &Self) -> Self {
    Hold {
      id:                self.id,
      external_id:       merge_external_id(&self.external_id, &incoming.external_id),
      jurisdiction_name: self.jurisdiction_name.merge(&incoming.jurisdiction_name),
      status:            self.status.merge(&incoming.status),
      metadata:          merge_metadata(&self.metadata, &incoming.metadata),
    }
  }
}

impl MergeFields for Bond {
  fn merge_fields(&self, incoming: &Self) -> Self {
    Bond {
      id:           self.id,
      external_id:  merge_external_id(&self.external_id, &incoming.external_id),
      amount_cents: self.amount_cents.merge(&incoming.amount_cents),
      bond_type:    self.bond_type.merge(&incoming.bond_type),
      status:       self.status.merge(&incoming.status),
      bond_agent:   self.bond_agent.merge(&incoming.bond_agent),
      metadata:     merge_metadata(&self.metadata, &incoming.metadata),
    }
  }
}

impl MergeFields for Sentence {
  fn merge_fields(&self, incoming: &Self) -> Self {
    Sentence {
      id:                                   self.id,
      external_id:                          merge_external_id(
        &self.external_id,
        &incoming.external_id,
      ),
      status:                               self.status.merge(&incoming.status),
      sentencing_region:                    self
        .sentencing_region
        .merge(&incoming.sentencing_region),
      min_length_days:                      self.min_length_days.merge(&incoming.min_length_days),
      max_length_days:                      self.max_length_days.merge(&incoming.max_length_days),
      date_imposed:                         self.date_imposed.merge(&incoming.date_imposed),
      completion_date:                      self.completion_date.merge(&incoming.completion_date),
      projected_completion_date:            self
        .projected_completion_date
        .merge(&incoming.projected_completion_date),
      is_life:                              self.is_life.merge(&incoming.is_life),
      is_probation:                         self.is_probation.merge(&incoming.is_probation),
      is_suspended:                         self.is_suspended.merge(&incoming.is_suspended),
      fine_cents:                           self.fine_cents.merge(&incoming.fine_cents),
      parole_possible:                      self.parole_possible.merge(&incoming.parole_possible),
      post_release_supervision_length_days: self
        .post_release_supervision_length_days
        .merge(&incoming.post_release_supervision_length_days),
      metadata:                             merge_metadata(&self.metadata, &incoming.metadata),
    }
  }
}

impl MergeFields for Charge {
  fn merge_fields(&self, incoming: &Self) -> Self {
    Charge {
      id:               self.id,
      external_id:      merge_external_id(&self.external_id, &incoming.external_id),
      offense_date:     self.offense_date.merge(&incoming.offense_date),
      statute:          self.statute.merge(&incoming.statute),
      name:             self.name.merge(&incoming.name),
      attempted:        self.attempted.merge(&incoming.attempted),
      degree:           self.degree.merge(&incoming.degree),
      class:            self.class.merge(&incoming.class),
      level:            self.level.merge(&incoming.level),
      status:           self.status.merge(&incoming.status),
      fee_cents:        self.fee_cents.merge(&incoming.fee_cents),
      charging_entity:  self.charging_entity.merge(&incoming.charging_entity),
      court_type:       self.court_type.merge(&incoming.court_type),
      case_number:      self.case_number.merge(&incoming.case_number),
      next_court_date:  self.next_court_date.merge(&incoming.next_court_date),
      judge_name:       self.judge_name.merge(&incoming.judge_name),
      number_of_counts: self.number_of_counts.merge(&incoming.number_of_counts),
      bond_id:          incoming.bond_id.or(self.bond_id),
      sentence_id:      incoming.sentence_id.or(self.sentence_id),
      metadata:         merge_metadata(&self.metadata, &incoming.metadata),
    }
  }
}

// ─── Sink ────────────────────────────────────────────────────────────────────

/// Observer for merge decisions, called parents-first.
pub trait MergeSink {
  type Error;

  /// A matched pair was merged. `after` has no children attached.
  fn merged<T: Matchable>(
    &mut self,
    parent: Option<EntityId>,
    before: &T,
    after: &T,
  ) -> Result<(), Self::Error>;

  /// An entity enters the graph as new. `outcome` is what the matcher said
  /// about it: [`MatchOutcome::New`] or [`MatchOutcome::Ambiguous`].
  /// Descendants of a new entity are reported as `New`.
  fn inserted<T: Matchable>(
    &mut self,
    parent: Option<EntityId>,
    entity: &T,
    outcome: MatchOutcome,
  ) -> Result<(), Self::Error>;
}

/// Discards every decision.
pub struct NoopSink;

impl MergeSink for NoopSink {
  type Error = Infallible;

  fn merged<T: Matchable>(
    &mut self,
    _parent: Option<EntityId>,
    _before: &T,
    _after: &T,
  ) -> Result<(), Infallible> {
    Ok(())
  }

  fn inserted<T: Matchable>(
    &mut self,
    _parent: Option<EntityId>,
    _entity: &T,
    _outcome: MatchOutcome,
  ) -> Result<(), Infallible> {
    Ok(())
  }
}

// ─── Child collections ───────────────────────────────────────────────────────

/// One incoming child and what the matcher decided for it.
pub enum Pairing<'e, T> {
  Matched { existing: &'e T, incoming: T },
  Unmatched { incoming: T, outcome: MatchOutcome },
}

/// Set-union of a child collection. Existing children keep their order
/// (merged in place when matched); unmatched incoming children are appended.
pub fn merge_children<'e, T, E>(
  existing: &'e [T],
  incoming: Vec<T>,
  outcomes: &[MatchOutcome],
  mut resolve: impl FnMut(Pairing<'e, T>) -> Result<T, E>,
) -> Result<Vec<T>, E>
where
  T: Clone,
{
  let mut merged_at: Vec<Option<T>> = existing.iter().map(|_| None).collect();
  let mut appended = Vec::new();

  for (child, outcome) in incoming.into_iter().zip(outcomes) {
    match outcome.matched_index() {
      Some(index) => {
        merged_at[index] = Some(resolve(Pairing::Matched {
          existing: &existing[index],
          incoming: child,
        })?);
      }
      None => appended.push(resolve(Pairing::Unmatched {
        incoming: child,
        outcome:  *outcome,
      })?),
    }
  }

  Ok(
    existing
      .iter()
      .zip(merged_at)
      .map(|(old, new)| new.unwrap_or_else(|| old.clone()))
      .chain(appended)
      .collect(),
  )
}

/// Merge or insert every child of one collection, dispatching through the
/// sink.
fn resolve_collection<'e, T, S>(
  parent: EntityId,
  existing: &'e [T],
  incoming: Vec<T>,
  sink: &mut S,
) -> Result<Vec<T>, S::Error>
where
  T: Matchable + MergeFields,
  S: MergeSink,
{
  let outcomes = match_collection(&incoming, existing);
  merge_children(existing, incoming, &outcomes, |pairing| match pairing {
    Pairing::Matched { existing, incoming } => {
      let merged = existing.merge_fields(&incoming);
      sink.merged(Some(parent), existing, &merged)?;
      Ok(merged)
    }
    Pairing::Unmatched { incoming, outcome } => {
      sink.inserted(Some(parent), &incoming, outcome)?;
      Ok(incoming)
    }
  })
}

/// Map provisional ids of incoming children onto the existing ids they
/// matched.
fn matched_ids<T: Matchable>(
  incoming: &[T],
  existing: &[T],
  outcomes: &[MatchOutcome],
) -> HashMap<EntityId, EntityId> {
  incoming
    .iter()
    .zip(outcomes)
    .filter_map(|(child, outcome)| {
      outcome
        .matched_index()
        .map(|index| (child.id(), existing[index].id()))
    })
    .collect()
}

// ─── Tree merge ──────────────────────────────────────────────────────────────

/// Merge a matched person pair, recursing into bookings.
pub fn merge_person<S: MergeSink>(
  existing: &Person,
  incoming: Person,
  sink: &mut S,
) -> Result<Person, S::Error> {
  let mut merged = existing.merge_fields(&incoming);
  sink.merged(None, existing, &merged)?;

  let parent = merged.id;
  let outcomes = match_collection(&incoming.bookings, &existing.bookings);
  merged.bookings = merge_children(
    &existing.bookings,
    incoming.bookings,
    &outcomes,
    |pairing| match pairing {
      Pairing::Matched { existing, incoming } => {
        merge_booking(parent, existing, incoming, sink)
      }
      Pairing::Unmatched { incoming, outcome } => {
        insert_booking(parent, incoming, outcome, sink)
      }
    },
  )?;
  Ok(merged)
}

/// Insert a person and everything below it.
pub fn insert_person<S: MergeSink>(
  incoming: Person,
  outcome: MatchOutcome,
  sink: &mut S,
) -> Result<Person, S::Error> {
  sink.inserted(None, &incoming, outcome)?;
  let mut person = incoming;
  let person_id = person.id;
  let bookings = std::mem::take(&mut person.bookings);
  person.bookings = bookings
    .into_iter()
    .map(|b| insert_booking(person_id, b, MatchOutcome::New, sink))
    .collect::<Result<_, _>>()?;
  Ok(person)
}

/// Merge a matched booking pair. Bonds and sentences are resolved before
/// charges so that charge references can be remapped onto existing ids.
pub fn merge_booking<S: MergeSink>(
  person_id: EntityId,
  existing: &Booking,
  incoming: Booking,
  sink: &mut S,
) -> Result<Booking, S::Error> {
  let mut merged = existing.merge_fields(&incoming);
  sink.merged(Some(person_id), existing, &merged)?;
  let parent = merged.id;

  let Booking {
    arrest,
    holds,
    bonds,
    sentences,
    mut charges,
    ..
  } = incoming;

  let existing_arrest: Vec<Arrest> = existing.arrest.iter().cloned().collect();
  merged.arrest = resolve_collection(parent, &existing_arrest, arrest.into_iter().collect(), sink)?
    .into_iter()
    .next();
  merged.holds = resolve_collection(parent, &existing.holds, holds, sink)?;

  let mut remap = matched_ids(
    &bonds,
    &existing.bonds,
    &match_collection(&bonds, &existing.bonds),
  );
  remap.extend(matched_ids(
    &sentences,
    &existing.sentences,
    &match_collection(&sentences, &existing.sentences),
  ));
  merged.bonds = resolve_collection(parent, &existing.bonds, bonds, sink)?;
  merged.sentences = resolve_collection(parent, &existing.sentences, sentences, sink)?;

  for charge in &mut charges {
    charge.bond_id = charge.bond_id.map(|id| remap.get(&id).copied().unwrap_or(id));
    charge.sentence_id = charge
      .sentence_id
      .map(|id| remap.get(&id).copied().unwrap_or(id));
  }
  merged.charges = resolve_collection(parent, &existing.charges, charges, sink)?;

  Ok(merged)
}

/// Insert a booking and all of its children.
pub fn insert_booking<S: MergeSink>(
  person_id: EntityId,
  incoming: Booking,
  outcome: MatchOutcome,
  sink: &mut S,
) -> Result<Booking, S::Error> {
  sink.inserted(Some(person_id), &incoming, outcome)?;
  let parent = Some(incoming.id);
  if let Some(arrest) = &incoming.arrest {
    sink.inserted(parent, arrest, MatchOutcome::New)?;
  }
  for hold in &incoming.holds {
    sink.inserted(parent, hold, MatchOutcome::New)?;
  }
  for bond in &incoming.bonds {
    sink.inserted(parent, bond, MatchOutcome::New)?;
  }
  for sentence in &incoming.sentences {
    sink.inserted(parent, sentence, MatchOutcome::New)?;
  }
  for charge in &incoming.charges {
    sink.inserted(parent, charge, MatchOutcome::New)?;
  }
  Ok(incoming)
}

/// Pure merge of two person trees.
pub fn merge_trees(existing: &Person, incoming: Person) -> Person {
  match merge_person(existing, incoming, &mut NoopSink) {
    Ok(person) => person,
    Err(never) => match never {},
  }
}

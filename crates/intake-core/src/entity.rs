//! The canonical entity model.
//!
//! A batch describes a forest of people. Each [`Person`] owns an ordered
//! sequence of [`Booking`]s, and each booking owns its arrest, holds, bonds,
//! sentences and charges. Charges point at bonds and sentences by
//! [`EntityId`] rather than by ownership, because one bond or sentence may be
//! shared by several charges of the same booking.
//!
//! Every scalar attribute is a [`Field`], so a value that failed to parse is
//! distinguishable from one the source never provided.

use std::{collections::BTreeMap, fmt};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::{Display, EnumString};
use uuid::Uuid;

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Surrogate identifier. Assigned once; never changes after the entity is
/// first persisted.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
  pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for EntityId {
  fn default() -> Self { Self::new() }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.hyphenated().fmt(f)
  }
}

/// Discriminant for the seven entity kinds, in parent-before-child order.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EntityKind {
  Person,
  Booking,
  Arrest,
  Hold,
  Bond,
  Sentence,
  Charge,
}

impl EntityKind {
  /// The kind a record of this kind must hang under, if any.
  pub fn parent_kind(self) -> Option<EntityKind> {
    match self {
      Self::Person => None,
      Self::Booking => Some(Self::Person),
      Self::Arrest | Self::Hold | Self::Bond | Self::Sentence | Self::Charge => {
        Some(Self::Booking)
      }
    }
  }
}

// ─── Field ───────────────────────────────────────────────────────────────────

/// One scalar attribute as extracted from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field<T> {
  /// The source did not provide the field.
  Absent,
  /// The source provided text that could not be parsed; the raw text is
  /// kept verbatim.
  Unparsed(String),
  Value(T),
}

impl<T> Default for Field<T> {
  fn default() -> Self { Self::Absent }
}

impl<T> Field<T> {
  pub fn value(&self) -> Option<&T> {
    match self {
      Self::Value(v) => Some(v),
      _ => None,
    }
  }

  pub fn is_value(&self) -> bool { matches!(self, Self::Value(_)) }

  pub fn is_unparsed(&self) -> bool { matches!(self, Self::Unparsed(_)) }

  pub fn is_absent(&self) -> bool { matches!(self, Self::Absent) }
}

impl<T: Clone> Field<T> {
  /// Owned copy of the parsed value, if any.
  pub fn cloned(&self) -> Option<T> { self.value().cloned() }
}

impl<T> From<T> for Field<T> {
  fn from(value: T) -> Self { Self::Value(value) }
}

/// Source fields the normalizer did not recognise, plus the record's source
/// tag. Kept verbatim to aid debugging.
pub type Metadata = BTreeMap<String, String>;

// ─── Classification enums ────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Gender {
  #[strum(to_string = "male", serialize = "m")]
  Male,
  #[strum(to_string = "female", serialize = "f")]
  Female,
  Other,
  #[strum(to_string = "external_unknown", serialize = "unknown", serialize = "u")]
  ExternalUnknown,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Race {
  #[strum(to_string = "american_indian_alaskan_native", serialize = "i")]
  AmericanIndianAlaskanNative,
  #[strum(to_string = "asian", serialize = "a")]
  Asian,
  #[strum(to_string = "black", serialize = "b", serialize = "african_american")]
  Black,
  #[strum(to_string = "native_hawaiian_pacific_islander", serialize = "p")]
  NativeHawaiianPacificIslander,
  #[strum(to_string = "white", serialize = "w", serialize = "caucasian")]
  White,
  Other,
  #[strum(to_string = "external_unknown", serialize = "unknown", serialize = "u")]
  ExternalUnknown,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Ethnicity {
  #[strum(to_string = "hispanic", serialize = "h", serialize = "latino")]
  Hispanic,
  #[strum(to_string = "not_hispanic", serialize = "n", serialize = "non_hispanic")]
  NotHispanic,
  #[strum(to_string = "external_unknown", serialize = "unknown", serialize = "u")]
  ExternalUnknown,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CustodyStatus {
  Escaped,
  HeldElsewhere,
  #[strum(to_string = "in_custody", serialize = "incarcerated", serialize = "in_jail")]
  InCustody,
  InferredRelease,
  Released,
  RemovedWithoutInfo,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AdmissionReason {
  Escape,
  NewCommitment,
  ParoleViolation,
  ProbationViolation,
  Transfer,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReleaseReason {
  AcquittalOrDismissal,
  Bond,
  CaseDismissed,
  Death,
  Escape,
  ExpirationOfSentence,
  InferredRelease,
  #[strum(to_string = "own_recognizance", serialize = "ror")]
  OwnRecognizance,
  ParoleRelease,
  ProbationRelease,
  Transfer,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Classification {
  High,
  Low,
  Maximum,
  Medium,
  Minimum,
  WorkRelease,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ChargeDegree {
  #[strum(to_string = "first", serialize = "1", serialize = "1st")]
  First,
  #[strum(to_string = "second", serialize = "2", serialize = "2nd")]
  Second,
  #[strum(to_string = "third", serialize = "3", serialize = "3rd")]
  Third,
  #[strum(to_string = "fourth", serialize = "4", serialize = "4th")]
  Fourth,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ChargeClass {
  Civil,
  #[strum(to_string = "felony", serialize = "fel")]
  Felony,
  Infraction,
  #[strum(to_string = "misdemeanor", serialize = "misd", serialize = "misdemeanour")]
  Misdemeanor,
  Other,
  ParoleViolation,
  ProbationViolation,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ChargeStatus {
  Acquitted,
  Completed,
  Convicted,
  Dropped,
  InferredDropped,
  Pending,
  Pretrial,
  Sentenced,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CourtType {
  Circuit,
  District,
  Other,
  Superior,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BondType {
  Cash,
  Denied,
  NoBond,
  PartialCash,
  Secured,
  Unsecured,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BondStatus {
  Denied,
  InferredSet,
  NotRequired,
  Pending,
  Posted,
  Revoked,
  Set,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SentenceStatus {
  Commuted,
  Completed,
  Serving,
  Suspended,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum HoldStatus {
  Active,
  Inactive,
  InferredDropped,
}

// ─── Person ──────────────────────────────────────────────────────────────────

/// A birth date, flagged when it was derived from a reported age rather
/// than read from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirthDate {
  pub date:     NaiveDate,
  pub inferred: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
  pub id:                 EntityId,
  pub external_id:        Option<String>,
  pub jurisdiction:       String,
  /// Normalized as `GIVEN SURNAME`, upper-case.
  pub full_name:          Field<String>,
  pub surname:            Field<String>,
  pub given_names:        Field<String>,
  pub birthdate:          Field<BirthDate>,
  pub gender:             Field<Gender>,
  pub race:               Field<Race>,
  pub ethnicity:          Field<Ethnicity>,
  pub place_of_residence: Field<String>,
  pub metadata:           Metadata,
  #[serde(skip)]
  pub bookings:           Vec<Booking>,
}

// ─── Booking ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Booking {
  pub id:                     EntityId,
  pub external_id:            Option<String>,
  pub admission_date:         Field<NaiveDate>,
  pub admission_reason:       Field<AdmissionReason>,
  pub release_date:           Field<NaiveDate>,
  pub projected_release_date: Field<NaiveDate>,
  pub release_reason:         Field<ReleaseReason>,
  pub custody_status:         Field<CustodyStatus>,
  pub facility:               Field<String>,
  pub classification:         Field<Classification>,
  pub metadata:               Metadata,
  #[serde(skip)]
  pub arrest:                 Option<Arrest>,
  #[serde(skip)]
  pub holds:                  Vec<Hold>,
  #[serde(skip)]
  pub bonds:                  Vec<Bond>,
  #[serde(skip)]
  pub sentences:              Vec<Sentence>,
  #[serde(skip)]
  pub charges:                Vec<Charge>,
}

// ─── Booking-owned leaves ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arrest {
  pub id:           EntityId,
  pub external_id:  Option<String>,
  pub arrest_date:  Field<NaiveDate>,
  pub location:     Field<String>,
  pub agency:       Field<String>,
  pub officer_name: Field<String>,
  pub officer_id:   Field<String>,
  pub metadata:     Metadata,
}

/// A detainer placed on the booking by another jurisdiction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hold {
  pub id:                EntityId,
  pub external_id:       Option<String>,
  pub jurisdiction_name: Field<String>,
  pub status:            Field<HoldStatus>,
  pub metadata:          Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bond {
  pub id:           EntityId,
  pub external_id:  Option<String>,
  pub amount_cents: Field<i64>,
  pub bond_type:    Field<BondType>,
  pub status:       Field<BondStatus>,
  pub bond_agent:   Field<String>,
  pub metadata:     Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
  pub id:                                   EntityId,
  pub external_id:                          Option<String>,
  pub status:                               Field<SentenceStatus>,
  pub sentencing_region:                    Field<String>,
  pub min_length_days:                      Field<u32>,
  pub max_length_days:                      Field<u32>,
  pub date_imposed:                         Field<NaiveDate>,
  pub completion_date:                      Field<NaiveDate>,
  pub projected_completion_date:            Field<NaiveDate>,
  pub is_life:                              Field<bool>,
  pub is_probation:                         Field<bool>,
  pub is_suspended:                         Field<bool>,
  pub fine_cents:                           Field<i64>,
  pub parole_possible:                      Field<bool>,
  pub post_release_supervision_length_days: Field<u32>,
  pub metadata:                             Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Charge {
  pub id:               EntityId,
  pub external_id:      Option<String>,
  pub offense_date:     Field<NaiveDate>,
  pub statute:          Field<String>,
  pub name:             Field<String>,
  pub attempted:        Field<bool>,
  pub degree:           Field<ChargeDegree>,
  pub class:            Field<ChargeClass>,
  pub level:            Field<String>,
  pub status:           Field<ChargeStatus>,
  pub fee_cents:        Field<i64>,
  pub charging_entity:  Field<String>,
  pub court_type:       Field<CourtType>,
  pub case_number:      Field<String>,
  pub next_court_date:  Field<NaiveDate>,
  pub judge_name:       Field<String>,
  pub number_of_counts: Field<u32>,
  /// A bond of the same booking.
  pub bond_id:          Option<EntityId>,
  /// A sentence of the same booking.
  pub sentence_id:      Option<EntityId>,
  pub metadata:         Metadata,
}

// ─── Entity trait ────────────────────────────────────────────────────────────

/// Behaviour shared by every entity kind.
///
/// The serialised form of an entity is its own attributes only: child
/// collections are `#[serde(skip)]` and travel as separate records.
pub trait Entity: Clone + Serialize + DeserializeOwned {
  const KIND: EntityKind;

  fn id(&self) -> EntityId;

  fn set_id(&mut self, id: EntityId);

  fn external_id(&self) -> Option<&str>;

  /// JSON of the entity's own attributes; the `body` column of a record.
  fn body(&self) -> crate::Result<serde_json::Value> {
    Ok(serde_json::to_value(self)?)
  }
}

impl Entity for Person {
  const KIND: EntityKind = EntityKind::Person;

  fn id(&self) -> EntityId { self.id }

  fn set_id(&mut self, id: EntityId) { self.id = id; }

  fn external_id(&self) -> Option<&str> { self.external_id.as_deref() }
}

impl Entity for Booking {
  const KIND: EntityKind = EntityKind::Booking;

  fn id(&self) -> EntityId { self.id }

  fn set_id(&mut self, id: EntityId) { self.id = id; }

  fn external_id(&self) -> Option<&str> { self.external_id.as_deref() }
}

impl Entity for Arrest {
  const KIND: EntityKind = EntityKind::Arrest;

  fn id(&self) -> EntityId { self.id }

  fn set_id(&mut self, id: EntityId) { self.id = id; }

  fn external_id(&self) -> Option<&str> { self.external_id.as_deref() }
}

impl Entity for Hold {
  const KIND: EntityKind = EntityKind::Hold;

  fn id(&self) -> EntityId { self.id }

  fn set_id(&mut self, id: EntityId) { self.id = id; }

  fn external_id(&self) -> Option<&str> { self.external_id.as_deref() }
}

impl Entity for Bond {
  const KIND: EntityKind = EntityKind::Bond;

  fn id(&self) -> EntityId { self.id }

  fn set_id(&mut self, id: EntityId) { self.id = id; }

  fn external_id(&self) -> Option<&str> { self.external_id.as_deref() }
}

impl Entity for Sentence {
  const KIND: EntityKind = EntityKind::Sentence;

  fn id(&self) -> EntityId { self.id }

  fn set_id(&mut self, id: EntityId) { self.id = id; }

  fn external_id(&self) -> Option<&str> { self.external_id.as_deref() }
}

impl Entity for Charge {
  const KIND: EntityKind = EntityKind::Charge;

  fn id(&self) -> EntityId { self.id }

  fn set_id(&mut self, id: EntityId) { self.id = id; }

  fn external_id(&self) -> Option<&str> { self.external_id.as_deref() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn enums_parse_aliases_case_insensitively() {
    assert_eq!("M".parse::<Gender>().unwrap(), Gender::Male);
    assert_eq!("Female".parse::<Gender>().unwrap(), Gender::Female);
    assert_eq!("in_custody".parse::<CustodyStatus>().unwrap(), CustodyStatus::InCustody);
    assert_eq!("MISD".parse::<ChargeClass>().unwrap(), ChargeClass::Misdemeanor);
    assert_eq!("2nd".parse::<ChargeDegree>().unwrap(), ChargeDegree::Second);
    assert!("sideways".parse::<Race>().is_err());
  }

  #[test]
  fn display_uses_canonical_name() {
    assert_eq!(Gender::Male.to_string(), "male");
    assert_eq!(EntityKind::Sentence.to_string(), "sentence");
    assert_eq!(CustodyStatus::HeldElsewhere.to_string(), "held_elsewhere");
  }

  #[test]
  fn body_excludes_children() {
    let mut booking = Booking::default();
    booking.charges.push(Charge::default());
    let body = booking.body().unwrap();
    assert!(body.get("charges").is_none());
    assert!(body.get("admission_date").is_some());
  }

  #[test]
  fn field_serialises_with_state_tag() {
    let absent: Field<u32> = Field::Absent;
    let unparsed: Field<u32> = Field::Unparsed("ten".into());
    let value: Field<u32> = Field::Value(10);
    assert_eq!(serde_json::to_value(&absent).unwrap(), serde_json::json!("absent"));
    assert_eq!(
      serde_json::to_value(&unparsed).unwrap(),
      serde_json::json!({ "unparsed": "ten" })
    );
    assert_eq!(serde_json::to_value(&value).unwrap(), serde_json::json!({ "value": 10 }));
  }
}

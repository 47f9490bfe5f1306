//! Flat record form of the entity graph.
//!
//! Storage backends persist one [`EntityRecord`] per entity; [`assemble`]
//! rebuilds the person trees and refuses records whose parent is missing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  entity::{
    Arrest, Bond, Booking, Charge, Entity, EntityId, EntityKind, Hold, Person,
    Sentence,
  },
};

/// One entity without its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
  pub id:          EntityId,
  pub kind:        EntityKind,
  pub parent_id:   Option<EntityId>,
  pub external_id: Option<String>,
  /// JSON of the entity's own attributes.
  pub body:        serde_json::Value,
}

impl EntityRecord {
  pub fn of<T: Entity>(entity: &T, parent_id: Option<EntityId>) -> Result<Self> {
    Ok(Self {
      id: entity.id(),
      kind: T::KIND,
      parent_id,
      external_id: entity.external_id().map(str::to_owned),
      body: entity.body()?,
    })
  }

  /// Decode the body back into a typed entity. The record's `id` is
  /// authoritative over any id inside the body.
  pub fn decode<T: Entity>(&self) -> Result<T> {
    let mut entity: T = serde_json::from_value(self.body.clone())?;
    entity.set_id(self.id);
    Ok(entity)
  }
}

/// One person tree as nested JSON, children included. Used for display;
/// storage goes through [`EntityRecord`]s.
pub fn tree_json(person: &Person) -> Result<serde_json::Value> {
  fn bodies<T: Entity>(items: &[T]) -> Result<serde_json::Value> {
    Ok(serde_json::Value::Array(
      items.iter().map(Entity::body).collect::<Result<_>>()?,
    ))
  }

  let mut root = person.body()?;
  let mut bookings = Vec::with_capacity(person.bookings.len());
  for booking in &person.bookings {
    let mut node = booking.body()?;
    if let Some(obj) = node.as_object_mut() {
      obj.insert(
        "arrest".into(),
        booking.arrest.as_ref().map(Entity::body).transpose()?.unwrap_or_default(),
      );
      obj.insert("holds".into(), bodies(&booking.holds)?);
      obj.insert("bonds".into(), bodies(&booking.bonds)?);
      obj.insert("sentences".into(), bodies(&booking.sentences)?);
      obj.insert("charges".into(), bodies(&booking.charges)?);
    }
    bookings.push(node);
  }
  if let Some(obj) = root.as_object_mut() {
    obj.insert("bookings".into(), serde_json::Value::Array(bookings));
  }
  Ok(root)
}

// ─── Assembly ────────────────────────────────────────────────────────────────

struct Children<T> {
  by_parent: HashMap<EntityId, Vec<T>>,
}

impl<T> Default for Children<T> {
  fn default() -> Self {
    Self {
      by_parent: HashMap::new(),
    }
  }
}

impl<T: Entity> Children<T> {
  fn push(&mut self, parent: EntityId, child: T) {
    self.by_parent.entry(parent).or_default().push(child);
  }

  fn take(&mut self, parent: EntityId) -> Vec<T> {
    self.by_parent.remove(&parent).unwrap_or_default()
  }

  /// Fail on the first child whose parent was never claimed.
  fn ensure_claimed(&self) -> Result<()> {
    match self
      .by_parent
      .iter()
      .flat_map(|(parent, children)| children.iter().map(move |c| (*parent, c)))
      .next()
    {
      Some((parent, child)) => Err(Error::OrphanedRecord {
        id: child.id(),
        kind: T::KIND,
        parent,
      }),
      None => Ok(()),
    }
  }
}

#[derive(Default)]
struct Buckets {
  people:    Vec<Person>,
  bookings:  Children<Booking>,
  arrests:   Children<Arrest>,
  holds:     Children<Hold>,
  bonds:     Children<Bond>,
  sentences: Children<Sentence>,
  charges:   Children<Charge>,
}

/// Rebuild person trees from records. Record order is preserved within each
/// collection.
pub fn assemble(records: impl IntoIterator<Item = EntityRecord>) -> Result<Vec<Person>> {
  let mut b = Buckets::default();

  for record in records {
    match (record.kind, record.parent_id) {
      (EntityKind::Person, None) => b.people.push(record.decode()?),
      (EntityKind::Person, Some(_)) => {
        return Err(Error::UnexpectedParent {
          id:   record.id,
          kind: record.kind,
        });
      }
      (kind, None) => return Err(Error::MissingParent(record.id, kind)),
      (EntityKind::Booking, Some(p)) => b.bookings.push(p, record.decode()?),
      (EntityKind::Arrest, Some(p)) => b.arrests.push(p, record.decode()?),
      (EntityKind::Hold, Some(p)) => b.holds.push(p, record.decode()?),
      (EntityKind::Bond, Some(p)) => b.bonds.push(p, record.decode()?),
      (EntityKind::Sentence, Some(p)) => b.sentences.push(p, record.decode()?),
      (EntityKind::Charge, Some(p)) => b.charges.push(p, record.decode()?),
    }
  }

  let mut people = b.people;
  for person in &mut people {
    person.bookings = b.bookings.take(person.id);
    for booking in &mut person.bookings {
      booking.arrest = b.arrests.take(booking.id).into_iter().next();
      booking.holds = b.holds.take(booking.id);
      booking.bonds = b.bonds.take(booking.id);
      booking.sentences = b.sentences.take(booking.id);
      booking.charges = b.charges.take(booking.id);
    }
  }

  b.bookings.ensure_claimed()?;
  b.arrests.ensure_claimed()?;
  b.holds.ensure_claimed()?;
  b.bonds.ensure_claimed()?;
  b.sentences.ensure_claimed()?;
  b.charges.ensure_claimed()?;

  Ok(people)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::Field;

  /// Flatten one person tree into records, parents before children.
  fn flatten(person: &Person) -> Result<Vec<EntityRecord>> {
    let mut out = vec![EntityRecord::of(person, None)?];
    for booking in &person.bookings {
      let parent = Some(booking.id);
      out.push(EntityRecord::of(booking, Some(person.id))?);
      if let Some(arrest) = &booking.arrest {
        out.push(EntityRecord::of(arrest, parent)?);
      }
      for hold in &booking.holds {
        out.push(EntityRecord::of(hold, parent)?);
      }
      for bond in &booking.bonds {
        out.push(EntityRecord::of(bond, parent)?);
      }
      for sentence in &booking.sentences {
        out.push(EntityRecord::of(sentence, parent)?);
      }
      for charge in &booking.charges {
        out.push(EntityRecord::of(charge, parent)?);
      }
    }
    Ok(out)
  }

  fn sample() -> Person {
    let bond = Bond {
      amount_cents: Field::Value(50_000),
      ..Default::default()
    };
    let charge = Charge {
      statute: Field::Value("13A-6-2".into()),
      bond_id: Some(bond.id),
      ..Default::default()
    };
    let booking = Booking {
      facility: Field::Value("COUNTY JAIL".into()),
      arrest: Some(Arrest::default()),
      bonds: vec![bond],
      charges: vec![charge],
      ..Default::default()
    };
    Person {
      external_id: Some("P1".into()),
      jurisdiction: "us_al_jefferson".into(),
      full_name: Field::Value("JANE DOE".into()),
      bookings: vec![booking],
      ..Default::default()
    }
  }

  #[test]
  fn flatten_orders_parents_first() {
    let records = flatten(&sample()).unwrap();
    let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![
      EntityKind::Person,
      EntityKind::Booking,
      EntityKind::Arrest,
      EntityKind::Bond,
      EntityKind::Charge,
    ]);
    assert_eq!(records[0].external_id.as_deref(), Some("P1"));
    assert_eq!(records[0].parent_id, None);
    assert_eq!(records[2].parent_id, Some(records[1].id));
  }

  #[test]
  fn assemble_inverts_flatten() {
    let person = sample();
    let records = flatten(&person).unwrap();
    let rebuilt = assemble(records).unwrap();
    assert_eq!(rebuilt, vec![person]);
  }

  #[test]
  fn tree_json_nests_children() {
    let person = sample();
    let tree = tree_json(&person).unwrap();
    assert_eq!(tree["external_id"], "P1");
    let booking = &tree["bookings"][0];
    assert_eq!(booking["facility"], serde_json::json!({ "value": "COUNTY JAIL" }));
    assert!(booking["arrest"].is_object());
    assert_eq!(booking["bonds"].as_array().unwrap().len(), 1);
    assert_eq!(booking["charges"][0]["bond_id"], tree["bookings"][0]["bonds"][0]["id"]);
  }

  #[test]
  fn assemble_rejects_orphans() {
    let person = sample();
    let records: Vec<_> = flatten(&person)
      .unwrap()
      .into_iter()
      .filter(|r| r.kind != EntityKind::Booking)
      .collect();
    let err = assemble(records).unwrap_err();
    assert!(matches!(err, Error::OrphanedRecord { kind: EntityKind::Arrest, .. }
      | Error::OrphanedRecord { kind: EntityKind::Bond, .. }
      | Error::OrphanedRecord { kind: EntityKind::Charge, .. }));
  }

  #[test]
  fn assemble_rejects_parentless_children() {
    let mut records = flatten(&sample()).unwrap();
    records[1].parent_id = None;
    let err = assemble(records).unwrap_err();
    assert!(matches!(err, Error::MissingParent(_, EntityKind::Booking)));
  }
}

use std::collections::BTreeMap;

use crate::model::*;

/// In-memory state of every record kind, keyed by natural key.
#[derive(Debug, Default)]
pub struct Tables {
    pub universities: BTreeMap<String, University>,
    pub campuses: BTreeMap<String, Campus>,
    pub buildings: BTreeMap<String, Building>,
    pub departments: BTreeMap<String, Department>,
    pub rooms: BTreeMap<String, Room>,
    pub teachers: BTreeMap<TeacherId, Teacher>,
    pub bookings: BTreeMap<BookingId, Booking>,
}

impl Tables {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Put(entity) => match entity {
                Entity::University(u) => {
                    self.universities.insert(u.name.clone(), u.clone());
                }
                Entity::Campus(c) => {
                    self.campuses.insert(c.name.clone(), c.clone());
                }
                Entity::Building(b) => {
                    self.buildings.insert(b.code.clone(), b.clone());
                }
                Entity::Department(d) => {
                    self.departments.insert(d.acronym.clone(), d.clone());
                }
                Entity::Room(r) => {
                    self.rooms.insert(r.number.clone(), r.clone());
                }
                Entity::Teacher(t) => {
                    self.teachers.insert(t.id, t.clone());
                }
                Entity::Booking(b) => {
                    self.bookings.insert(b.id, b.clone());
                }
            },
            Event::Remove(key) => match key {
                EntityKey::University(k) => {
                    self.universities.remove(k);
                }
                EntityKey::Campus(k) => {
                    self.campuses.remove(k);
                }
                EntityKey::Building(k) => {
                    self.buildings.remove(k);
                }
                EntityKey::Department(k) => {
                    self.departments.remove(k);
                }
                EntityKey::Room(k) => {
                    self.rooms.remove(k);
                }
                EntityKey::Teacher(id) => {
                    self.teachers.remove(id);
                }
                EntityKey::Booking(id) => {
                    self.bookings.remove(id);
                }
            },
        }
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            universities: self.universities.len(),
            campuses: self.campuses.len(),
            buildings: self.buildings.len(),
            departments: self.departments.len(),
            rooms: self.rooms.len(),
            teachers: self.teachers.len(),
            bookings: self.bookings.len(),
        }
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            universities: self.universities.values().cloned().collect(),
            campuses: self.campuses.values().cloned().collect(),
            buildings: self.buildings.values().cloned().collect(),
            rooms: self.rooms.values().cloned().collect(),
            departments: self.departments.values().cloned().collect(),
            teachers: self.teachers.values().cloned().collect(),
            bookings: self.bookings.values().cloned().collect(),
        }
    }
}

/// A record kind stored in one of the `Tables` maps.
pub trait Record: Clone + Sized {
    type Key: Ord + Clone;

    fn key(&self) -> Self::Key;
    fn entity_key(key: Self::Key) -> EntityKey;
    fn into_entity(self) -> Entity;
    fn from_entity(entity: &Entity) -> Option<&Self>;
    fn key_from(key: &EntityKey) -> Option<&Self::Key>;
    fn table(tables: &Tables) -> &BTreeMap<Self::Key, Self>;
}

macro_rules! record {
    ($ty:ident, $key:ty, $field:ident, $table:ident) => {
        impl Record for $ty {
            type Key = $key;

            fn key(&self) -> $key {
                self.$field.clone()
            }

            fn entity_key(key: $key) -> EntityKey {
                EntityKey::$ty(key)
            }

            fn into_entity(self) -> Entity {
                Entity::$ty(self)
            }

            fn from_entity(entity: &Entity) -> Option<&Self> {
                match entity {
                    Entity::$ty(r) => Some(r),
                    _ => None,
                }
            }

            fn key_from(key: &EntityKey) -> Option<&$key> {
                match key {
                    EntityKey::$ty(k) => Some(k),
                    _ => None,
                }
            }

            fn table(tables: &Tables) -> &BTreeMap<$key, Self> {
                &tables.$table
            }
        }
    };
}

record!(University, String, name, universities);
record!(Campus, String, name, campuses);
record!(Building, String, code, buildings);
record!(Department, String, acronym, departments);
record!(Room, String, number, rooms);
record!(Teacher, TeacherId, id, teachers);
record!(Booking, BookingId, id, bookings);

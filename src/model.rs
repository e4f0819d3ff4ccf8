use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub type BookingId = Ulid;
pub type TeacherId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Catalog records ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct University {
    pub name: String,
    pub founded: i32,
    pub president: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campus {
    pub name: String,
    pub city: String,
    #[serde(default)]
    pub university: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub code: String,
    pub built: i32,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub campus: Option<String>,
}

/// Owns its side of the department ↔ building link table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub acronym: String,
    pub name: String,
    pub head: String,
    #[serde(default)]
    pub buildings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Amphitheater,
    Lecture,
    Tutorial,
    Lab,
    Computer,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Amphitheater => "amphitheater",
            RoomKind::Lecture => "lecture",
            RoomKind::Tutorial => "tutorial",
            RoomKind::Lab => "lab",
            RoomKind::Computer => "computer",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = String;

    /// Accepts the long names and the short campus codes (`amphi`, `sc`, `td`, `tp`, `numerique`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amphitheater" | "amphi" => Ok(RoomKind::Amphitheater),
            "lecture" | "sc" => Ok(RoomKind::Lecture),
            "tutorial" | "td" => Ok(RoomKind::Tutorial),
            "lab" | "tp" => Ok(RoomKind::Lab),
            "computer" | "numerique" => Ok(RoomKind::Computer),
            other => Err(format!("unknown room kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub number: String,
    pub capacity: u32,
    pub kind: RoomKind,
    #[serde(default)]
    pub accessible: bool,
    #[serde(default)]
    pub floor: i16,
    #[serde(default)]
    pub building: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: TeacherId,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room: String,
    pub teacher: TeacherId,
    pub span: Span,
    pub subject: String,
    pub created_at: Ms,
}

// ── Keys and write events ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    University,
    Campus,
    Building,
    Department,
    Room,
    Teacher,
    Booking,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::University => "university",
            EntityKind::Campus => "campus",
            EntityKind::Building => "building",
            EntityKind::Department => "department",
            EntityKind::Room => "room",
            EntityKind::Teacher => "teacher",
            EntityKind::Booking => "booking",
        }
    }
}

/// Natural key of any record, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKey {
    University(String),
    Campus(String),
    Building(String),
    Department(String),
    Room(String),
    Teacher(TeacherId),
    Booking(BookingId),
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityKey::University(_) => EntityKind::University,
            EntityKey::Campus(_) => EntityKind::Campus,
            EntityKey::Building(_) => EntityKind::Building,
            EntityKey::Department(_) => EntityKind::Department,
            EntityKey::Room(_) => EntityKind::Room,
            EntityKey::Teacher(_) => EntityKind::Teacher,
            EntityKey::Booking(_) => EntityKind::Booking,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind().as_str();
        match self {
            EntityKey::University(k)
            | EntityKey::Campus(k)
            | EntityKey::Building(k)
            | EntityKey::Department(k)
            | EntityKey::Room(k) => write!(f, "{kind} {k}"),
            EntityKey::Teacher(id) | EntityKey::Booking(id) => write!(f, "{kind} {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    University(University),
    Campus(Campus),
    Building(Building),
    Department(Department),
    Room(Room),
    Teacher(Teacher),
    Booking(Booking),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Entity::University(u) => EntityKey::University(u.name.clone()),
            Entity::Campus(c) => EntityKey::Campus(c.name.clone()),
            Entity::Building(b) => EntityKey::Building(b.code.clone()),
            Entity::Department(d) => EntityKey::Department(d.acronym.clone()),
            Entity::Room(r) => EntityKey::Room(r.number.clone()),
            Entity::Teacher(t) => EntityKey::Teacher(t.id),
            Entity::Booking(b) => EntityKey::Booking(b.id),
        }
    }
}

/// A single write, flat, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Put(Entity),
    Remove(EntityKey),
}

/// One committed transaction. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub committed_at: Ms,
    pub events: Vec<Event>,
}

// ── Cascade and query result types ───────────────────────────────

/// Counts of descendants removed by a cascading delete. The target itself
/// is reported in `target` and not counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeSummary {
    pub target: EntityKey,
    pub campuses: usize,
    pub buildings: usize,
    pub rooms: usize,
    pub bookings: usize,
    pub departments_unlinked: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CatalogStats {
    pub universities: usize,
    pub campuses: usize,
    pub buildings: usize,
    pub departments: usize,
    pub rooms: usize,
    pub teachers: usize,
    pub bookings: usize,
}

/// The whole catalog in dependency order. Used for import/export and WAL compaction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub universities: Vec<University>,
    #[serde(default)]
    pub campuses: Vec<Campus>,
    #[serde(default)]
    pub buildings: Vec<Building>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub departments: Vec<Department>,
    #[serde(default)]
    pub teachers: Vec<Teacher>,
    #[serde(default)]
    pub bookings: Vec<Booking>,
}

impl CatalogSnapshot {
    /// Flatten into `Put` events, parents before children.
    pub fn into_events(self) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.universities.into_iter().map(|u| Event::Put(Entity::University(u))));
        events.extend(self.campuses.into_iter().map(|c| Event::Put(Entity::Campus(c))));
        events.extend(self.buildings.into_iter().map(|b| Event::Put(Entity::Building(b))));
        events.extend(self.rooms.into_iter().map(|r| Event::Put(Entity::Room(r))));
        events.extend(self.departments.into_iter().map(|d| Event::Put(Entity::Department(d))));
        events.extend(self.teachers.into_iter().map(|t| Event::Put(Entity::Teacher(t))));
        events.extend(self.bookings.into_iter().map(|b| Event::Put(Entity::Booking(b))));
        events
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Distance {
    pub meters: f64,
    pub kilometers: f64,
}

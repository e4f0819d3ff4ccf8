use std::collections::{BTreeMap, HashSet};

use crate::limits::GROUP_SIZE;
use crate::model::*;

use super::{Engine, EngineError};

/// Mean earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters between two points given in degrees.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn by_start(mut bookings: Vec<Booking>) -> Vec<Booking> {
    bookings.sort_by_key(|b| (b.span.start, b.id));
    bookings
}

impl Engine {
    // ── Bookings ─────────────────────────────────────────

    pub async fn list_bookings(&self) -> Vec<Booking> {
        let tables = self.tables.read().await;
        by_start(tables.bookings.values().cloned().collect())
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let tables = self.tables.read().await;
        tables
            .bookings
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKey::Booking(id)))
    }

    pub async fn bookings_for_room(&self, room: &str) -> Result<Vec<Booking>, EngineError> {
        let tables = self.tables.read().await;
        if !tables.rooms.contains_key(room) {
            return Err(EngineError::NotFound(EntityKey::Room(room.to_string())));
        }
        Ok(by_start(
            tables.bookings.values().filter(|b| b.room == room).cloned().collect(),
        ))
    }

    pub async fn bookings_for_teacher(&self, teacher: TeacherId) -> Vec<Booking> {
        let tables = self.tables.read().await;
        by_start(
            tables
                .bookings
                .values()
                .filter(|b| b.teacher == teacher)
                .cloned()
                .collect(),
        )
    }

    /// The teacher's bookings starting at or after `now`, soonest first.
    pub async fn upcoming_bookings_for_teacher(&self, teacher: TeacherId, now: Ms) -> Vec<Booking> {
        let mut all = self.bookings_for_teacher(teacher).await;
        all.retain(|b| b.span.start >= now);
        all
    }

    // ── Capacity ─────────────────────────────────────────

    /// Total seats over the building's rooms.
    pub async fn building_capacity(&self, code: &str) -> Result<u64, EngineError> {
        let tables = self.tables.read().await;
        if !tables.buildings.contains_key(code) {
            return Err(EngineError::NotFound(EntityKey::Building(code.to_string())));
        }
        Ok(tables
            .rooms
            .values()
            .filter(|r| r.building.as_deref() == Some(code))
            .map(|r| u64::from(r.capacity))
            .sum())
    }

    /// Total seats over every room of every building on the campus.
    pub async fn campus_capacity(&self, campus: &str) -> Result<u64, EngineError> {
        let tables = self.tables.read().await;
        if !tables.campuses.contains_key(campus) {
            return Err(EngineError::NotFound(EntityKey::Campus(campus.to_string())));
        }
        let buildings: HashSet<&str> = tables
            .buildings
            .values()
            .filter(|b| b.campus.as_deref() == Some(campus))
            .map(|b| b.code.as_str())
            .collect();
        Ok(tables
            .rooms
            .values()
            .filter(|r| r.building.as_deref().is_some_and(|b| buildings.contains(b)))
            .map(|r| u64::from(r.capacity))
            .sum())
    }

    /// How many student groups the building seats at once.
    pub async fn building_groups(&self, code: &str) -> Result<u64, EngineError> {
        Ok(self.building_capacity(code).await? / u64::from(GROUP_SIZE))
    }

    pub async fn campus_groups(&self, campus: &str) -> Result<u64, EngineError> {
        Ok(self.campus_capacity(campus).await? / u64::from(GROUP_SIZE))
    }

    /// Number of buildings per campus. Campuses without buildings report 0.
    pub async fn campus_building_counts(&self) -> BTreeMap<String, usize> {
        let tables = self.tables.read().await;
        let mut counts: BTreeMap<String, usize> =
            tables.campuses.keys().map(|name| (name.clone(), 0)).collect();
        for campus in tables.buildings.values().filter_map(|b| b.campus.as_ref()) {
            if let Some(n) = counts.get_mut(campus) {
                *n += 1;
            }
        }
        counts
    }

    // ── Departments ──────────────────────────────────────

    pub async fn department_buildings(&self, acronym: &str) -> Result<Vec<Building>, EngineError> {
        let tables = self.tables.read().await;
        let department = tables
            .departments
            .get(acronym)
            .ok_or_else(|| EngineError::NotFound(EntityKey::Department(acronym.to_string())))?;
        Ok(department
            .buildings
            .iter()
            .filter_map(|code| tables.buildings.get(code))
            .cloned()
            .collect())
    }

    /// Seats over every room in the department's buildings.
    pub async fn department_capacity(&self, acronym: &str) -> Result<u64, EngineError> {
        Ok(self
            .department_rooms(acronym, None, 0)
            .await?
            .iter()
            .map(|r| u64::from(r.capacity))
            .sum())
    }

    /// Rooms in the department's buildings, optionally restricted to one kind,
    /// with at least `min_capacity` seats. Ordered by room number.
    pub async fn department_rooms(
        &self,
        acronym: &str,
        kind: Option<RoomKind>,
        min_capacity: u32,
    ) -> Result<Vec<Room>, EngineError> {
        let tables = self.tables.read().await;
        let department = tables
            .departments
            .get(acronym)
            .ok_or_else(|| EngineError::NotFound(EntityKey::Department(acronym.to_string())))?;
        let buildings: HashSet<&str> = department.buildings.iter().map(String::as_str).collect();
        Ok(tables
            .rooms
            .values()
            .filter(|r| r.building.as_deref().is_some_and(|b| buildings.contains(b)))
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .filter(|r| r.capacity >= min_capacity)
            .cloned()
            .collect())
    }

    // ── Geography ────────────────────────────────────────

    pub async fn distance_between(&self, from: &str, to: &str) -> Result<Distance, EngineError> {
        let tables = self.tables.read().await;
        let position = |code: &str| -> Result<(f64, f64), EngineError> {
            let building = tables
                .buildings
                .get(code)
                .ok_or_else(|| EngineError::NotFound(EntityKey::Building(code.to_string())))?;
            match (building.latitude, building.longitude) {
                (Some(lat), Some(lon)) => Ok((lat, lon)),
                _ => Err(EngineError::MissingCoordinates(code.to_string())),
            }
        };
        let (lat1, lon1) = position(from)?;
        let (lat2, lon2) = position(to)?;
        let meters = haversine_meters(lat1, lon1, lat2, lon2);
        Ok(Distance {
            meters: round2(meters),
            kilometers: round2(meters / 1000.0),
        })
    }

    // ── Whole catalog ────────────────────────────────────

    pub async fn catalog_snapshot(&self) -> CatalogSnapshot {
        self.tables.read().await.snapshot()
    }

    pub async fn stats(&self) -> CatalogStats {
        self.tables.read().await.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_same_point() {
        assert_eq!(haversine_meters(43.6, 1.46, 43.6, 1.46), 0.0);
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = haversine_meters(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = haversine_meters(43.5615, 1.4690, 43.5660, 1.4750);
        let b = haversine_meters(43.5660, 1.4750, 43.5615, 1.4690);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(1234.5678), 1234.57);
        assert_eq!(round2(0.004), 0.0);
    }
}

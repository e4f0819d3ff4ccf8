use tokio::sync::oneshot;
use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::observability::WAL_COMPACTIONS_TOTAL;

use super::conflict::{now_ms, overlapping, validate_subject, validate_window};
use super::txn::{LockPlan, Transaction};
use super::{Engine, EngineError, WalCommand};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.is_empty() || value.chars().count() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_university(u: &University) -> Result<(), EngineError> {
    check_len(&u.name, MAX_KEY_LEN, "university name length")?;
    check_len(&u.president, MAX_NAME_LEN, "president name length")
}

/// Field and reference checks shared by single upserts and catalog import.
/// References are resolved through the transaction, so records staged
/// earlier in the same import count as existing.
async fn validate_campus(txn: &Transaction<'_>, c: &Campus) -> Result<(), EngineError> {
    check_len(&c.name, MAX_KEY_LEN, "campus name length")?;
    check_len(&c.city, MAX_NAME_LEN, "city name length")?;
    if let Some(university) = &c.university {
        txn.require::<University>(university).await?;
    }
    Ok(())
}

async fn validate_building(txn: &Transaction<'_>, b: &Building) -> Result<(), EngineError> {
    check_len(&b.code, MAX_KEY_LEN, "building code length")?;
    if b.latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat))
        || b.longitude.is_some_and(|lon| !(-180.0..=180.0).contains(&lon))
    {
        return Err(EngineError::LimitExceeded("coordinates out of range"));
    }
    if let Some(campus) = &b.campus {
        txn.require::<Campus>(campus).await?;
    }
    Ok(())
}

async fn validate_room(txn: &Transaction<'_>, r: &Room) -> Result<(), EngineError> {
    check_len(&r.number, MAX_KEY_LEN, "room number length")?;
    if let Some(building) = &r.building {
        txn.require::<Building>(building).await?;
    }
    Ok(())
}

async fn validate_department(txn: &Transaction<'_>, d: &Department) -> Result<(), EngineError> {
    check_len(&d.acronym, MAX_ACRONYM_LEN, "department acronym length")?;
    check_len(&d.name, MAX_NAME_LEN, "department name length")?;
    if d.buildings.len() > MAX_BUILDINGS_PER_DEPARTMENT {
        return Err(EngineError::LimitExceeded("too many buildings for department"));
    }
    for code in &d.buildings {
        txn.require::<Building>(code).await?;
    }
    Ok(())
}

async fn validate_booking(txn: &Transaction<'_>, b: &Booking) -> Result<(), EngineError> {
    validate_window(b.span.start, b.span.end)?;
    validate_subject(&b.subject)?;
    txn.require::<Room>(&b.room).await?;
    txn.require::<Teacher>(&b.teacher).await?;

    let others = txn.find_by::<Booking>(|o| o.id != b.id && o.room == b.room).await;
    let conflicts = overlapping(&others, &b.span);
    if !conflicts.is_empty() {
        return Err(EngineError::RoomConflict(conflicts));
    }
    let others = txn
        .find_by::<Booking>(|o| o.id != b.id && o.teacher == b.teacher && o.subject == b.subject)
        .await;
    let conflicts = overlapping(&others, &b.span);
    if !conflicts.is_empty() {
        return Err(EngineError::SubjectConflict(conflicts));
    }
    Ok(())
}

fn dedup_links(buildings: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    buildings.retain(|b| seen.insert(b.clone()));
}

impl Engine {
    pub async fn upsert_university(&self, university: University) -> Result<(), EngineError> {
        validate_university(&university)?;
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::University(university.name.clone())))
            .await?;
        txn.upsert(university);
        txn.commit().await?;
        Ok(())
    }

    pub async fn upsert_campus(&self, campus: Campus) -> Result<(), EngineError> {
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::Campus(campus.name.clone())))
            .await?;
        validate_campus(&txn, &campus).await?;
        txn.upsert(campus);
        txn.commit().await?;
        Ok(())
    }

    pub async fn upsert_building(&self, building: Building) -> Result<(), EngineError> {
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::Building(building.code.clone())))
            .await?;
        validate_building(&txn, &building).await?;
        txn.upsert(building);
        txn.commit().await?;
        Ok(())
    }

    /// Shares the room lock with `check_and_reserve`.
    pub async fn upsert_room(&self, room: Room) -> Result<(), EngineError> {
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::Room(room.number.clone())))
            .await?;
        validate_room(&txn, &room).await?;
        txn.upsert(room);
        txn.commit().await?;
        Ok(())
    }

    pub async fn upsert_department(&self, mut department: Department) -> Result<(), EngineError> {
        dedup_links(&mut department.buildings);
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::Department(department.acronym.clone())))
            .await?;
        validate_department(&txn, &department).await?;
        txn.upsert(department);
        txn.commit().await?;
        Ok(())
    }

    pub async fn upsert_teacher(&self, teacher: Teacher) -> Result<(), EngineError> {
        check_len(&teacher.full_name, MAX_NAME_LEN, "teacher name length")?;
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::Teacher(teacher.id)))
            .await?;
        txn.upsert(teacher);
        txn.commit().await?;
        Ok(())
    }

    /// Link a department to a building. Returns false if already linked.
    pub async fn link_department(&self, acronym: &str, building: &str) -> Result<bool, EngineError> {
        let plan = LockPlan::shared()
            .entity(EntityKey::Department(acronym.to_string()))
            .entity(EntityKey::Building(building.to_string()));
        let mut txn = self.begin(plan).await?;
        let mut department = txn.require::<Department>(&acronym.to_string()).await?;
        txn.require::<Building>(&building.to_string()).await?;
        if department.buildings.iter().any(|b| b == building) {
            return Ok(false);
        }
        if department.buildings.len() >= MAX_BUILDINGS_PER_DEPARTMENT {
            return Err(EngineError::LimitExceeded("too many buildings for department"));
        }
        department.buildings.push(building.to_string());
        txn.upsert(department);
        txn.commit().await?;
        Ok(true)
    }

    /// Unlink a department from a building. Returns false if it was not linked.
    pub async fn unlink_department(&self, acronym: &str, building: &str) -> Result<bool, EngineError> {
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::Department(acronym.to_string())))
            .await?;
        let mut department = txn.require::<Department>(&acronym.to_string()).await?;
        let before = department.buildings.len();
        department.buildings.retain(|b| b != building);
        if department.buildings.len() == before {
            return Ok(false);
        }
        txn.upsert(department);
        txn.commit().await?;
        Ok(true)
    }

    /// Load a whole catalog in one exclusive transaction. Records replace
    /// existing ones with the same key; any invalid record aborts the import.
    pub async fn import_catalog(&self, snapshot: CatalogSnapshot) -> Result<CatalogStats, EngineError> {
        let stats = CatalogStats {
            universities: snapshot.universities.len(),
            campuses: snapshot.campuses.len(),
            buildings: snapshot.buildings.len(),
            departments: snapshot.departments.len(),
            rooms: snapshot.rooms.len(),
            teachers: snapshot.teachers.len(),
            bookings: snapshot.bookings.len(),
        };
        let mut txn = self.begin(LockPlan::exclusive()).await?;

        for university in snapshot.universities {
            validate_university(&university)?;
            txn.upsert(university);
        }
        for campus in snapshot.campuses {
            validate_campus(&txn, &campus).await?;
            txn.upsert(campus);
        }
        for building in snapshot.buildings {
            validate_building(&txn, &building).await?;
            txn.upsert(building);
        }
        for room in snapshot.rooms {
            validate_room(&txn, &room).await?;
            txn.upsert(room);
        }
        for mut department in snapshot.departments {
            dedup_links(&mut department.buildings);
            validate_department(&txn, &department).await?;
            txn.upsert(department);
        }
        for teacher in snapshot.teachers {
            check_len(&teacher.full_name, MAX_NAME_LEN, "teacher name length")?;
            txn.upsert(teacher);
        }
        for booking in snapshot.bookings {
            validate_booking(&txn, &booking).await?;
            txn.upsert(booking);
        }

        txn.commit().await?;
        info!(
            "imported catalog: {} universities, {} campuses, {} buildings, {} rooms, {} departments, {} teachers, {} bookings",
            stats.universities, stats.campuses, stats.buildings, stats.rooms, stats.departments, stats.teachers, stats.bookings
        );
        Ok(stats)
    }

    /// Rewrite the WAL as one snapshot record. Runs under the exclusive catalog
    /// lock so no commit can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let txn = self.begin(LockPlan::exclusive()).await?;
        let snapshot = self.tables.read().await.snapshot();
        let record = WalRecord {
            committed_at: now_ms(),
            events: snapshot.into_events(),
        };

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                records: vec![record],
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(txn);
        if result.is_ok() {
            metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
        }
        result
    }
}

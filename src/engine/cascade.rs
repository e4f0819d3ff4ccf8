use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::model::*;
use crate::observability::{CASCADE_DELETES_TOTAL, CASCADE_RECORDS_REMOVED_TOTAL};

use super::graph::{self, Descendants};
use super::txn::{LockPlan, Transaction};
use super::{Engine, EngineError};

/// A hierarchy node whose deletion cascades downward.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CascadeTarget {
    University(String),
    Campus(String),
    Building(String),
    Room(String),
}

impl CascadeTarget {
    pub fn key(&self) -> EntityKey {
        match self {
            CascadeTarget::University(k) => EntityKey::University(k.clone()),
            CascadeTarget::Campus(k) => EntityKey::Campus(k.clone()),
            CascadeTarget::Building(k) => EntityKey::Building(k.clone()),
            CascadeTarget::Room(k) => EntityKey::Room(k.clone()),
        }
    }

    pub fn label(&self) -> &'static str {
        self.key().kind().as_str()
    }

    pub(super) fn university(&self) -> Option<&String> {
        match self {
            CascadeTarget::University(k) => Some(k),
            _ => None,
        }
    }

    pub(super) fn campus(&self) -> Option<&String> {
        match self {
            CascadeTarget::Campus(k) => Some(k),
            _ => None,
        }
    }

    pub(super) fn building(&self) -> Option<&String> {
        match self {
            CascadeTarget::Building(k) => Some(k),
            _ => None,
        }
    }

    pub(super) fn room(&self) -> Option<&String> {
        match self {
            CascadeTarget::Room(k) => Some(k),
            _ => None,
        }
    }

    async fn exists(&self, txn: &Transaction<'_>) -> bool {
        match self {
            CascadeTarget::University(k) => txn.get::<University>(k).await.is_some(),
            CascadeTarget::Campus(k) => txn.get::<Campus>(k).await.is_some(),
            CascadeTarget::Building(k) => txn.get::<Building>(k).await.is_some(),
            CascadeTarget::Room(k) => txn.get::<Room>(k).await.is_some(),
        }
    }

    fn stage_delete(&self, txn: &mut Transaction<'_>) {
        match self.clone() {
            CascadeTarget::University(k) => txn.delete::<University>(k),
            CascadeTarget::Campus(k) => txn.delete::<Campus>(k),
            CascadeTarget::Building(k) => txn.delete::<Building>(k),
            CascadeTarget::Room(k) => txn.delete::<Room>(k),
        }
    }
}

impl fmt::Display for CascadeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for CascadeTarget {
    type Err = String;

    /// `<kind>:<key>`, e.g. `building:B36`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, key) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <kind>:<key>, got {s}"))?;
        if key.is_empty() {
            return Err("empty key".into());
        }
        let key = key.to_string();
        match kind {
            "university" => Ok(CascadeTarget::University(key)),
            "campus" => Ok(CascadeTarget::Campus(key)),
            "building" => Ok(CascadeTarget::Building(key)),
            "room" => Ok(CascadeTarget::Room(key)),
            other => Err(format!("not a cascading kind: {other}")),
        }
    }
}

impl Engine {
    /// Delete `target` and everything that references it, in one exclusive
    /// transaction: bookings, rooms, buildings, campuses, then the target.
    /// Departments only lose their links to removed buildings.
    pub async fn delete(&self, target: CascadeTarget) -> Result<CascadeSummary, EngineError> {
        let mut txn = self.begin(LockPlan::exclusive()).await?;

        if !target.exists(&txn).await {
            return Err(EngineError::NotFound(target.key()));
        }

        let found = graph::collect(&txn, &target).await;
        let departments_unlinked = unlink_departments(&mut txn, &found, &target).await;

        let summary = CascadeSummary {
            target: target.key(),
            campuses: found.campuses.len(),
            buildings: found.buildings.len(),
            rooms: found.rooms.len(),
            bookings: found.bookings.len(),
            departments_unlinked,
        };

        txn.delete_batch::<Booking>(found.bookings);
        txn.delete_batch::<Room>(found.rooms);
        txn.delete_batch::<Building>(found.buildings);
        txn.delete_batch::<Campus>(found.campuses);
        target.stage_delete(&mut txn);
        txn.commit().await?;

        info!(
            "deleted {target}: {} campuses, {} buildings, {} rooms, {} bookings, {} departments unlinked",
            summary.campuses, summary.buildings, summary.rooms, summary.bookings, summary.departments_unlinked
        );
        metrics::counter!(CASCADE_DELETES_TOTAL, "target" => target.label()).increment(1);
        metrics::counter!(CASCADE_RECORDS_REMOVED_TOTAL)
            .increment((summary.campuses + summary.buildings + summary.rooms + summary.bookings + 1) as u64);
        Ok(summary)
    }

    /// Remove a department. Buildings are untouched; only its link rows go.
    pub async fn delete_department(&self, acronym: &str) -> Result<Department, EngineError> {
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::Department(acronym.to_string())))
            .await?;
        let department = txn.require::<Department>(&acronym.to_string()).await?;
        txn.delete::<Department>(department.acronym.clone());
        txn.commit().await?;
        info!("deleted department {acronym} ({} building links)", department.buildings.len());
        Ok(department)
    }
}

/// Drop removed buildings from every department's list, staging an update
/// only for departments whose list actually changed.
async fn unlink_departments(txn: &mut Transaction<'_>, found: &Descendants, target: &CascadeTarget) -> usize {
    let removed = found.removed_buildings(target);
    if removed.is_empty() {
        return 0;
    }
    let linked = txn
        .find_by::<Department>(|d| d.buildings.iter().any(|b| removed.contains(b)))
        .await;
    let count = linked.len();
    for mut department in linked {
        department.buildings.retain(|b| !removed.contains(b));
        txn.upsert(department);
    }
    count
}

//! Downward traversal of the ownership hierarchy
//! University → Campus → Building → Room → Booking.

use std::collections::HashSet;

use crate::model::*;

use super::cascade::CascadeTarget;
use super::txn::Transaction;

/// Every record below a cascade target, one level at a time.
#[derive(Debug, Default)]
pub(super) struct Descendants {
    pub campuses: Vec<String>,
    pub buildings: Vec<String>,
    pub rooms: Vec<String>,
    pub bookings: Vec<BookingId>,
}

impl Descendants {
    /// Buildings leaving the catalog, the target included when it is one.
    pub fn removed_buildings(&self, target: &CascadeTarget) -> HashSet<String> {
        let mut set: HashSet<String> = self.buildings.iter().cloned().collect();
        if let CascadeTarget::Building(code) = target {
            set.insert(code.clone());
        }
        set
    }
}

/// Keys of the level's parents: the records collected at the previous level,
/// plus the target itself when it sits at that level.
fn frontier(collected: &[String], target_here: Option<&String>) -> HashSet<String> {
    collected.iter().chain(target_here).cloned().collect()
}

/// Breadth-first: each level is a single scan filtered by the parent set of
/// the level above, starting at the level just below the target.
pub(super) async fn collect(txn: &Transaction<'_>, target: &CascadeTarget) -> Descendants {
    let mut out = Descendants::default();

    let universities = frontier(&[], target.university());
    if !universities.is_empty() {
        out.campuses = txn
            .find_by::<Campus>(|c| c.university.as_ref().is_some_and(|u| universities.contains(u)))
            .await
            .into_iter()
            .map(|c| c.name)
            .collect();
    }

    let campuses = frontier(&out.campuses, target.campus());
    if !campuses.is_empty() {
        out.buildings = txn
            .find_by::<Building>(|b| b.campus.as_ref().is_some_and(|c| campuses.contains(c)))
            .await
            .into_iter()
            .map(|b| b.code)
            .collect();
    }

    let buildings = frontier(&out.buildings, target.building());
    if !buildings.is_empty() {
        out.rooms = txn
            .find_by::<Room>(|r| r.building.as_ref().is_some_and(|b| buildings.contains(b)))
            .await
            .into_iter()
            .map(|r| r.number)
            .collect();
    }

    let rooms = frontier(&out.rooms, target.room());
    if !rooms.is_empty() {
        out.bookings = txn
            .find_by::<Booking>(|b| rooms.contains(&b.room))
            .await
            .into_iter()
            .map(|b| b.id)
            .collect();
    }

    out
}

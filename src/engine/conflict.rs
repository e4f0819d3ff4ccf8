use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::RESERVATIONS_TOTAL;

use super::txn::{LockKey, LockPlan, Transaction};
use super::{Engine, EngineError};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidSpan { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(span)
}

/// Subjects are compared exactly, so they are only checked, never normalized.
pub(crate) fn validate_subject(subject: &str) -> Result<(), EngineError> {
    if subject.is_empty() {
        return Err(EngineError::LimitExceeded("subject must not be empty"));
    }
    if subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(EngineError::LimitExceeded("subject too long"));
    }
    Ok(())
}

/// Bookings whose window overlaps `span`, earliest first.
pub fn overlapping<'a>(bookings: impl IntoIterator<Item = &'a Booking>, span: &Span) -> Vec<Booking> {
    let mut hits: Vec<Booking> = bookings
        .into_iter()
        .filter(|b| b.span.overlaps(span))
        .cloned()
        .collect();
    hits.sort_by_key(|b| (b.span.start, b.id));
    hits
}

async fn room_conflicts_in(txn: &Transaction<'_>, room: &str, span: &Span) -> Vec<Booking> {
    let on_room = txn.find_by::<Booking>(|b| b.room == room).await;
    overlapping(&on_room, span)
}

async fn subject_conflicts_in(
    txn: &Transaction<'_>,
    teacher: TeacherId,
    subject: &str,
    span: &Span,
) -> Vec<Booking> {
    let same_subject = txn
        .find_by::<Booking>(|b| b.teacher == teacher && b.subject == subject)
        .await;
    overlapping(&same_subject, span)
}

impl Engine {
    /// Accept a booking only if the room is free for `[start, end)` and the
    /// teacher is not already teaching `subject` elsewhere in that window.
    ///
    /// Holds the room lock and the (teacher, subject) lock from the scans
    /// through the insert, so two concurrent requests for the same room or the
    /// same teacher+subject cannot both pass.
    pub async fn check_and_reserve(
        &self,
        room: &str,
        teacher: TeacherId,
        start: Ms,
        end: Ms,
        subject: &str,
    ) -> Result<Booking, EngineError> {
        let span = validate_window(start, end)?;
        validate_subject(subject)?;

        let plan = LockPlan::shared()
            .entity(EntityKey::Room(room.to_string()))
            .lock(LockKey::Subject(teacher, subject.to_string()));
        let mut txn = self.begin(plan).await?;

        txn.require::<Room>(&room.to_string()).await?;
        txn.require::<Teacher>(&teacher).await?;

        let conflicts = room_conflicts_in(&txn, room, &span).await;
        if !conflicts.is_empty() {
            debug!("room {room}: {} bookings overlap [{start}, {end})", conflicts.len());
            metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "room_conflict").increment(1);
            return Err(EngineError::RoomConflict(conflicts));
        }

        let conflicts = subject_conflicts_in(&txn, teacher, subject, &span).await;
        if !conflicts.is_empty() {
            debug!("teacher {teacher}: {subject} already scheduled in [{start}, {end})");
            metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "subject_conflict").increment(1);
            return Err(EngineError::SubjectConflict(conflicts));
        }

        let booking = Booking {
            id: Ulid::new(),
            room: room.to_string(),
            teacher,
            span,
            subject: subject.to_string(),
            created_at: now_ms(),
        };
        txn.upsert(booking.clone());
        txn.commit().await?;

        info!("booked {room} [{start}, {end}) for {teacher}: {subject} ({})", booking.id);
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => "accepted").increment(1);
        Ok(booking)
    }

    /// Delete a booking on behalf of the teacher who made it.
    pub async fn release(&self, booking_id: BookingId, teacher: TeacherId) -> Result<Booking, EngineError> {
        let mut txn = self
            .begin(LockPlan::shared().entity(EntityKey::Booking(booking_id)))
            .await?;
        let booking = txn.require::<Booking>(&booking_id).await?;
        if booking.teacher != teacher {
            return Err(EngineError::NotOwner {
                booking: booking_id,
                teacher,
            });
        }
        txn.delete::<Booking>(booking_id);
        txn.commit().await?;
        info!("released booking {booking_id} on {}", booking.room);
        Ok(booking)
    }

    /// Read-only re-check: bookings on `room` overlapping `[start, end)`.
    pub async fn room_conflicts(&self, room: &str, start: Ms, end: Ms) -> Result<Vec<Booking>, EngineError> {
        let span = validate_window(start, end)?;
        let txn = self.begin(LockPlan::shared()).await?;
        txn.require::<Room>(&room.to_string()).await?;
        Ok(room_conflicts_in(&txn, room, &span).await)
    }
}

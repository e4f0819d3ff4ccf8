use crate::model::{Booking, BookingId, EntityKey, Ms, TeacherId};

#[derive(Debug, PartialEq)]
pub enum EngineError {
    NotFound(EntityKey),
    /// Existing bookings on the same room overlap the requested window.
    RoomConflict(Vec<Booking>),
    /// The same teacher already teaches this subject in an overlapping window.
    SubjectConflict(Vec<Booking>),
    NotOwner {
        booking: BookingId,
        teacher: TeacherId,
    },
    /// Locks could not be acquired before the deadline. Nothing was written; safe to retry.
    Busy,
    InvalidSpan {
        start: Ms,
        end: Ms,
    },
    MissingCoordinates(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(key) => write!(f, "not found: {key}"),
            EngineError::RoomConflict(existing) => {
                write!(f, "room already booked in this window ({} conflicting)", existing.len())
            }
            EngineError::SubjectConflict(existing) => {
                let subject = existing.first().map(|b| b.subject.as_str()).unwrap_or_default();
                write!(
                    f,
                    "teacher already teaches {subject} in this window ({} conflicting)",
                    existing.len()
                )
            }
            EngineError::NotOwner { booking, teacher } => {
                write!(f, "booking {booking} does not belong to teacher {teacher}")
            }
            EngineError::Busy => write!(f, "busy: lock timeout, retry later"),
            EngineError::InvalidSpan { start, end } => {
                write!(f, "invalid window [{start}, {end}): start must be before end")
            }
            EngineError::MissingCoordinates(code) => {
                write!(f, "building {code} has no coordinates")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

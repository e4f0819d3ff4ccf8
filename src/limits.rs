use crate::model::Ms;

/// Natural keys: room numbers, building codes, campus and university names.
pub const MAX_KEY_LEN: usize = 64;
pub const MAX_ACRONYM_LEN: usize = 15;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_SUBJECT_LEN: usize = 100;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
pub const MAX_BOOKING_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_BUILDINGS_PER_DEPARTMENT: usize = 1024;

/// Seats per teaching group when turning capacity into group counts.
pub const GROUP_SIZE: u32 = 30;

/// Bookings accepted in one day's draft set.
pub const MAX_BOOKINGS_PER_DAY: usize = 2_000;

/// Coaches (or drivers) on a single booking.
pub const MAX_RESOURCES_PER_ROLE: usize = 64;

pub const MAX_NOTE_LEN: usize = 4_096;
pub const MAX_LABEL_LEN: usize = 256;

/// A booking may not run longer than a full day.
pub const MAX_DURATION_MINUTES: i64 = 24 * 60;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

pub type BookingId = Ulid;
pub type ResourceId = Ulid;

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

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Span of `minutes` starting at `start`. `None` for non-positive durations or overflow.
    pub fn from_minutes(start: Ms, minutes: i64) -> Option<Self> {
        if minutes <= 0 {
            return None;
        }
        let end = start.checked_add(minutes.checked_mul(MINUTE_MS)?)?;
        Self::try_new(start, end)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", clock(self.start), clock(self.end))
    }
}

/// UTC `[00:00, 24:00)` of a calendar day.
pub fn day_bounds(date: NaiveDate) -> Span {
    let start = date.and_time(NaiveTime::default()).and_utc().timestamp_millis();
    Span::new(start, start + DAY_MS)
}

/// Calendar day (UTC) an instant falls on.
pub fn day_of(t: Ms) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(t).map(|dt| dt.date_naive())
}

/// `HH:MM` in UTC, used in operator-facing messages.
pub fn clock(t: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(t)
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_else(|| t.to_string())
}

/// Role a resource holds on a booking. A person may hold both on the same booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceRole {
    Coach,
    Driver,
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRole::Coach => f.write_str("coach"),
            ResourceRole::Driver => f.write_str("driver"),
        }
    }
}

/// A booking as loaded from the booking store, with its persisted assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub id: BookingId,
    pub start: Ms,
    pub duration_minutes: i64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub coach_ids: BTreeSet<ResourceId>,
    #[serde(default)]
    pub driver_ids: BTreeSet<ResourceId>,
    #[serde(default)]
    pub note: String,
}

/// One junction row of a booking outside the draft set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAssignment {
    pub resource_id: ResourceId,
    pub role: ResourceRole,
    pub booking_id: BookingId,
    pub span: Span,
    #[serde(default)]
    pub label: Option<String>,
}

/// Store events, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingScheduled {
        id: BookingId,
        start: Ms,
        duration_minutes: i64,
        label: Option<String>,
        note: String,
    },
    BookingRemoved {
        id: BookingId,
    },
    AssignmentsReplaced {
        booking_id: BookingId,
        coach_ids: BTreeSet<ResourceId>,
        driver_ids: BTreeSet<ResourceId>,
    },
    NoteUpdated {
        booking_id: BookingId,
        note: String,
    },
}

impl Event {
    pub fn booking_id(&self) -> BookingId {
        match self {
            Event::BookingScheduled { id, .. } | Event::BookingRemoved { id } => *id,
            Event::AssignmentsReplaced { booking_id, .. } | Event::NoteUpdated { booking_id, .. } => {
                *booking_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_identical_overlaps() {
        let a = Span::new(100, 200);
        assert!(a.overlaps(&a));
    }

    #[test]
    fn span_contains_instant_half_open() {
        let s = Span::new(100, 200);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200));
    }

    #[test]
    fn from_minutes_rejects_non_positive() {
        assert_eq!(Span::from_minutes(0, 0), None);
        assert_eq!(Span::from_minutes(0, -30), None);
        assert_eq!(Span::from_minutes(Ms::MAX - 10, 60), None);
        let s = Span::from_minutes(9 * H, 90).unwrap();
        assert_eq!(s.end, 10 * H + 30 * MINUTE_MS);
        assert_eq!(s.duration_ms(), 90 * MINUTE_MS);
    }

    #[test]
    fn try_new_rejects_empty() {
        assert!(Span::try_new(5, 5).is_none());
        assert!(Span::try_new(6, 5).is_none());
        assert!(Span::try_new(5, 6).is_some());
    }

    #[test]
    fn day_bounds_and_day_of() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let bounds = day_bounds(date);
        assert_eq!(bounds.duration_ms(), DAY_MS);
        assert_eq!(day_of(bounds.start), Some(date));
        assert_eq!(day_of(bounds.end - 1), Some(date));
        assert_eq!(day_of(bounds.end), date.succ_opt());
    }

    #[test]
    fn span_display_uses_clock_time() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let base = day_bounds(date).start;
        let s = Span::from_minutes(base + 9 * H, 60).unwrap();
        assert_eq!(s.to_string(), "09:00-10:00");
    }

    #[test]
    fn role_ordering_and_display() {
        assert!(ResourceRole::Coach < ResourceRole::Driver);
        assert_eq!(ResourceRole::Driver.to_string(), "driver");
    }

    #[test]
    fn event_booking_id() {
        let id = Ulid::new();
        let event = Event::NoteUpdated {
            booking_id: id,
            note: "wetsuits".into(),
        };
        assert_eq!(event.booking_id(), id);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AssignmentsReplaced {
            booking_id: Ulid::new(),
            coach_ids: BTreeSet::from([Ulid::new(), Ulid::new()]),
            driver_ids: BTreeSet::new(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

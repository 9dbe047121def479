use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::limits::{MAX_DURATION_MINUTES, MAX_LABEL_LEN, MAX_NOTE_LEN};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use super::{BookingStore, JunctionStore, StoreError};

#[derive(Debug, Clone)]
struct StoredBooking {
    id: BookingId,
    date: NaiveDate,
    start: Ms,
    duration_minutes: i64,
    span: Span,
    label: Option<String>,
    note: String,
    coach_ids: BTreeSet<ResourceId>,
    driver_ids: BTreeSet<ResourceId>,
}

impl StoredBooking {
    fn snapshot(&self) -> BookingSnapshot {
        BookingSnapshot {
            id: self.id,
            start: self.start,
            duration_minutes: self.duration_minutes,
            label: self.label.clone(),
            coach_ids: self.coach_ids.clone(),
            driver_ids: self.driver_ids.clone(),
            note: self.note.clone(),
        }
    }
}

/// Reference booking + junction store. Volatile with [`InMemoryStore::new`],
/// durable with [`InMemoryStore::open`]: every write is appended to the WAL before it is applied.
pub struct InMemoryStore {
    bookings: DashMap<BookingId, StoredBooking>,
    /// Day → booking ids starting that day.
    days: DashMap<NaiveDate, Vec<BookingId>>,
    wal: Option<Mutex<Wal>>,
    pub notify: Arc<NotifyHub>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            days: DashMap::new(),
            wal: None,
            notify: Arc::new(NotifyHub::new()),
        }
    }

    /// Replay the WAL at `path` (if any) and keep appending to it.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let mut store = Self::new();
        for event in &events {
            store.apply_event(event);
        }
        info!(
            path = %wal.path().display(),
            events = events.len(),
            bookings = store.bookings.len(),
            "store replayed"
        );
        store.wal = Some(Mutex::new(wal));
        Ok(store)
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    /// Apply an event to the maps. Returns the day it touched, `None` if it referred to nothing.
    fn apply_event(&self, event: &Event) -> Option<NaiveDate> {
        match event {
            Event::BookingScheduled {
                id,
                start,
                duration_minutes,
                label,
                note,
            } => {
                let span = Span::from_minutes(*start, *duration_minutes)?;
                let date = day_of(*start)?;
                self.bookings.insert(
                    *id,
                    StoredBooking {
                        id: *id,
                        date,
                        start: *start,
                        duration_minutes: *duration_minutes,
                        span,
                        label: label.clone(),
                        note: note.clone(),
                        coach_ids: BTreeSet::new(),
                        driver_ids: BTreeSet::new(),
                    },
                );
                self.days.entry(date).or_default().push(*id);
                Some(date)
            }
            Event::BookingRemoved { id } => {
                let (_, removed) = self.bookings.remove(id)?;
                if let Some(mut ids) = self.days.get_mut(&removed.date) {
                    ids.retain(|b| b != id);
                }
                Some(removed.date)
            }
            Event::AssignmentsReplaced {
                booking_id,
                coach_ids,
                driver_ids,
            } => {
                let mut booking = self.bookings.get_mut(booking_id)?;
                booking.coach_ids = coach_ids.clone();
                booking.driver_ids = driver_ids.clone();
                Some(booking.date)
            }
            Event::NoteUpdated { booking_id, note } => {
                let mut booking = self.bookings.get_mut(booking_id)?;
                booking.note = note.clone();
                Some(booking.date)
            }
        }
    }

    /// WAL-append + apply + notify. The WAL lock is held through apply so log order matches apply order.
    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        let _wal_guard = match &self.wal {
            Some(wal) => {
                let mut guard = wal.lock().await;
                let started = Instant::now();
                guard.append(&event)?;
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                Some(guard)
            }
            None => None,
        };
        if let Some(date) = self.apply_event(&event) {
            self.notify.send(date, &event);
        }
        Ok(())
    }

    fn require(&self, booking_id: BookingId) -> Result<(), StoreError> {
        if self.bookings.contains_key(&booking_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(booking_id))
        }
    }

    pub async fn schedule_booking(
        &self,
        id: BookingId,
        start: Ms,
        duration_minutes: i64,
        label: Option<String>,
        note: impl Into<String>,
    ) -> Result<(), StoreError> {
        if Span::from_minutes(start, duration_minutes).is_none() {
            return Err(StoreError::Rejected(format!(
                "booking {id}: duration must be positive, got {duration_minutes} min"
            )));
        }
        if duration_minutes > MAX_DURATION_MINUTES {
            return Err(StoreError::Rejected(format!(
                "booking {id}: {duration_minutes} min exceeds the {MAX_DURATION_MINUTES} min limit"
            )));
        }
        let note = note.into();
        if note.len() > MAX_NOTE_LEN {
            return Err(StoreError::Rejected(format!("booking {id}: note too long")));
        }
        if label.as_ref().is_some_and(|l| l.len() > MAX_LABEL_LEN) {
            return Err(StoreError::Rejected(format!("booking {id}: label too long")));
        }
        if self.bookings.contains_key(&id) {
            return Err(StoreError::Rejected(format!("booking {id} already exists")));
        }
        let event = Event::BookingScheduled {
            id,
            start,
            duration_minutes,
            label,
            note,
        };
        self.persist_and_apply(event).await
    }

    pub async fn remove_booking(&self, id: BookingId) -> Result<(), StoreError> {
        self.require(id)?;
        self.persist_and_apply(Event::BookingRemoved { id }).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.lock().await.appends_since_compact(),
            None => 0,
        }
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let mut guard = wal.lock().await;
        let events = self.snapshot_events();
        guard.compact(&events)?;
        info!(events = events.len(), "WAL compacted");
        Ok(())
    }

    fn snapshot_events(&self) -> Vec<Event> {
        let mut bookings: Vec<StoredBooking> =
            self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| (b.start, b.id));

        let mut events = Vec::with_capacity(bookings.len() * 2);
        for b in bookings {
            let assigned = !b.coach_ids.is_empty() || !b.driver_ids.is_empty();
            events.push(Event::BookingScheduled {
                id: b.id,
                start: b.start,
                duration_minutes: b.duration_minutes,
                label: b.label,
                note: b.note,
            });
            if assigned {
                events.push(Event::AssignmentsReplaced {
                    booking_id: b.id,
                    coach_ids: b.coach_ids,
                    driver_ids: b.driver_ids,
                });
            }
        }
        events
    }

    fn day_bookings(&self, date: NaiveDate) -> Vec<StoredBooking> {
        let ids = self
            .days
            .get(&date)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.bookings.get(id).map(|b| b.value().clone()))
            .collect()
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn load_day(&self, date: NaiveDate) -> Result<Vec<BookingSnapshot>, StoreError> {
        let mut snapshots: Vec<BookingSnapshot> =
            self.day_bookings(date).iter().map(StoredBooking::snapshot).collect();
        snapshots.sort_by_key(|s| (s.start, s.id));
        debug!(%date, bookings = snapshots.len(), "day loaded");
        Ok(snapshots)
    }

    async fn load_other_assignments(
        &self,
        resource_ids: &BTreeSet<ResourceId>,
        date: NaiveDate,
        exclude: &HashSet<BookingId>,
    ) -> Result<Vec<PersistedAssignment>, StoreError> {
        let mut rows = Vec::new();
        for b in self.day_bookings(date) {
            if exclude.contains(&b.id) {
                continue;
            }
            let roles = [
                (ResourceRole::Coach, &b.coach_ids),
                (ResourceRole::Driver, &b.driver_ids),
            ];
            for (role, ids) in roles {
                for resource_id in ids.intersection(resource_ids) {
                    rows.push(PersistedAssignment {
                        resource_id: *resource_id,
                        role,
                        booking_id: b.id,
                        span: b.span,
                        label: b.label.clone(),
                    });
                }
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl JunctionStore for InMemoryStore {
    async fn replace_assignments(
        &self,
        booking_id: BookingId,
        coach_ids: &BTreeSet<ResourceId>,
        driver_ids: &BTreeSet<ResourceId>,
    ) -> Result<(), StoreError> {
        self.require(booking_id)?;
        let event = Event::AssignmentsReplaced {
            booking_id,
            coach_ids: coach_ids.clone(),
            driver_ids: driver_ids.clone(),
        };
        self.persist_and_apply(event).await
    }

    async fn update_note(&self, booking_id: BookingId, note: &str) -> Result<(), StoreError> {
        self.require(booking_id)?;
        if note.len() > MAX_NOTE_LEN {
            return Err(StoreError::Rejected(format!("booking {booking_id}: note too long")));
        }
        let event = Event::NoteUpdated {
            booking_id,
            note: note.to_string(),
        };
        self.persist_and_apply(event).await
    }
}

//! Collaborator contracts for reading a day's bookings and writing junction rows.

mod memory;

pub use memory::InMemoryStore;

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{BookingId, BookingSnapshot, PersistedAssignment, ResourceId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("booking not found: {0}")]
    NotFound(BookingId),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("WAL error: {0}")]
    Wal(#[from] std::io::Error),
}

/// Read side: bookings of a day and the assignments other bookings hold.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Every booking starting on `date`, with its current assignments and note.
    async fn load_day(&self, date: NaiveDate) -> Result<Vec<BookingSnapshot>, StoreError>;

    /// Junction rows on `date` for any of `resource_ids`, skipping bookings in `exclude`.
    async fn load_other_assignments(
        &self,
        resource_ids: &BTreeSet<ResourceId>,
        date: NaiveDate,
        exclude: &HashSet<BookingId>,
    ) -> Result<Vec<PersistedAssignment>, StoreError>;
}

/// Write side. Each call stands alone; there is no transaction spanning calls.
#[async_trait]
pub trait JunctionStore: Send + Sync {
    /// Delete every coach and driver row of the booking, then insert the given ones.
    async fn replace_assignments(
        &self,
        booking_id: BookingId,
        coach_ids: &BTreeSet<ResourceId>,
        driver_ids: &BTreeSet<ResourceId>,
    ) -> Result<(), StoreError>;

    async fn update_note(&self, booking_id: BookingId, note: &str) -> Result<(), StoreError>;
}

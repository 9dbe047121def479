use thiserror::Error;

use crate::model::BookingId;
use crate::store::StoreError;

use super::commit::CommitReport;
use super::conflict::ConflictReport;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("booking {booking_id}: duration must be positive, got {duration_minutes} min")]
    InvalidSpan {
        booking_id: BookingId,
        duration_minutes: i64,
    },
    #[error("booking {booking_id}: {duration_minutes} min exceeds the {max} min limit")]
    DurationTooLong {
        booking_id: BookingId,
        duration_minutes: i64,
        max: i64,
    },
    #[error("booking {0} does not start on the requested day")]
    OutsideDay(BookingId),
    #[error("booking {0} appears twice in the day")]
    DuplicateBooking(BookingId),
    #[error("booking {0} is not in this draft set")]
    UnknownBooking(BookingId),
    #[error("draft set already committed; reload the day")]
    DraftSetClosed,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("{} conflict(s) block the commit", .0.conflicts().len())]
    ConflictsDetected(ConflictReport),
    #[error("conflict check does not match the drafts (checked revision {detected}, drafts at {current})")]
    StaleDetection { detected: u64, current: u64 },
    #[error("{operation} failed: {source}")]
    StoreRead {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("commit incomplete: {} committed, {} failed", .0.committed.len(), .0.failed.len())]
    PartialCommit(CommitReport),
}

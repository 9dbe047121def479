use std::fmt;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::model::BookingId;
use crate::observability::BOOKING_WRITES_TOTAL;
use crate::store::{JunctionStore, StoreError};

use super::conflict::Clearance;
use super::plan::{MutationPlan, PlannedChange};
use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    Assignments,
    Note,
}

impl CommitStep {
    pub fn operation(&self) -> &'static str {
        match self {
            CommitStep::Assignments => "replace_assignments",
            CommitStep::Note => "update_note",
        }
    }
}

impl fmt::Display for CommitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// A booking whose writes did not all land.
#[derive(Debug)]
pub struct FailedBooking {
    pub booking_id: BookingId,
    pub step: CommitStep,
    /// The junction rows were replaced before `step` failed; they stay replaced.
    pub assignments_written: bool,
    pub cause: StoreError,
}

impl fmt::Display for FailedBooking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "booking {}: {} failed: {}", self.booking_id, self.step, self.cause)?;
        if self.assignments_written {
            f.write_str(" (assignments already written)")?;
        }
        Ok(())
    }
}

/// Per-booking outcome of a commit. Bookings in `committed` are durable even when others failed.
#[derive(Debug)]
pub struct CommitReport {
    pub date: NaiveDate,
    pub committed: Vec<BookingId>,
    pub failed: Vec<FailedBooking>,
    /// Store write calls issued, failed ones included.
    pub writes: usize,
}

impl CommitReport {
    pub(super) fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            committed: Vec::new(),
            failed: Vec::new(),
            writes: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = BookingId> + '_ {
        self.failed.iter().map(|f| f.booking_id)
    }
}

impl fmt::Display for CommitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} booking(s) committed, {} failed, {} write(s)",
            self.date,
            self.committed.len(),
            self.failed.len(),
            self.writes
        )?;
        for failure in &self.failed {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

fn record_write(step: CommitStep, result: &Result<(), StoreError>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(BOOKING_WRITES_TOTAL, "operation" => step.operation(), "status" => status)
        .increment(1);
}

/// Junction replace, then note. Only the steps whose state changed are written:
/// a note-only change skips the replace, an assignment-only change skips the note.
/// The note is not attempted once the replace failed.
async fn commit_booking(
    junctions: &dyn JunctionStore,
    change: &PlannedChange,
) -> (Result<(), FailedBooking>, usize) {
    let mut writes = 0;
    if change.assignments_changed {
        writes += 1;
        let result = junctions
            .replace_assignments(change.booking_id, &change.coach_ids, &change.driver_ids)
            .await;
        record_write(CommitStep::Assignments, &result);
        if let Err(cause) = result {
            let failure = FailedBooking {
                booking_id: change.booking_id,
                step: CommitStep::Assignments,
                assignments_written: false,
                cause,
            };
            return (Err(failure), writes);
        }
    }
    if change.note_changed {
        writes += 1;
        let result = junctions.update_note(change.booking_id, &change.note).await;
        record_write(CommitStep::Note, &result);
        if let Err(cause) = result {
            let failure = FailedBooking {
                booking_id: change.booking_id,
                step: CommitStep::Note,
                assignments_written: change.assignments_changed,
                cause,
            };
            return (Err(failure), writes);
        }
    }
    (Ok(()), writes)
}

/// Write every planned booking. Refuses a clearance issued for another session or revision.
///
/// Bookings run up to `concurrency` at a time; results keep plan order. Nothing is
/// rolled back and nothing is retried.
pub(crate) async fn execute(
    junctions: &dyn JunctionStore,
    plan: &MutationPlan,
    clearance: Clearance,
    concurrency: usize,
) -> Result<CommitReport, EngineError> {
    if clearance.session() != plan.session || clearance.revision() != plan.revision {
        return Err(EngineError::StaleDetection {
            detected: clearance.revision(),
            current: plan.revision,
        });
    }

    let outcomes: Vec<_> = stream::iter(plan.changes.iter().map(|c| commit_booking(junctions, c)))
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = CommitReport::empty(plan.date);
    for (change, (outcome, writes)) in plan.changes.iter().zip(outcomes) {
        report.writes += writes;
        match outcome {
            Ok(()) => {
                debug!(booking = %change.booking_id, writes, "booking committed");
                report.committed.push(change.booking_id);
            }
            Err(failure) => {
                warn!(
                    booking = %failure.booking_id,
                    step = %failure.step,
                    error = %failure.cause,
                    "booking commit failed"
                );
                report.failed.push(failure);
            }
        }
    }
    Ok(report)
}

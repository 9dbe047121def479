mod commit;
mod conflict;
mod draft;
mod error;
mod plan;

pub use commit::{CommitReport, CommitStep, FailedBooking};
pub use conflict::{find_conflicts, Clearance, Conflict, ConflictReport};
pub use draft::{BookingDraft, DraftSet};
pub use error::EngineError;
pub use plan::{plan, MutationPlan, PlannedChange};

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::observability::*;
use crate::store::{BookingStore, JunctionStore};

pub const DEFAULT_COMMIT_CONCURRENCY: usize = 4;

/// Daily coach/driver assignment: open a day, edit, detect conflicts, commit the diff.
pub struct AssignmentEngine {
    bookings: Arc<dyn BookingStore>,
    junctions: Arc<dyn JunctionStore>,
    commit_concurrency: usize,
}

impl AssignmentEngine {
    pub fn new(bookings: Arc<dyn BookingStore>, junctions: Arc<dyn JunctionStore>) -> Self {
        Self {
            bookings,
            junctions,
            commit_concurrency: DEFAULT_COMMIT_CONCURRENCY,
        }
    }

    /// Bookings written at once during a commit. Steps within one booking stay ordered.
    pub fn with_commit_concurrency(mut self, concurrency: usize) -> Self {
        self.commit_concurrency = concurrency.max(1);
        self
    }

    /// Load `date` from the booking store into a fresh draft set.
    pub async fn open_draft_set(&self, date: NaiveDate) -> Result<DraftSet, EngineError> {
        let snapshots = self
            .bookings
            .load_day(date)
            .await
            .map_err(|source| EngineError::StoreRead {
                operation: "load_day",
                source,
            })?;
        let drafts = DraftSet::from_snapshots(date, snapshots)?;
        info!(%date, bookings = drafts.len(), session = %drafts.session(), "draft set opened");
        Ok(drafts)
    }

    /// Check the drafts' current assignments against each other and against persisted
    /// bookings of the same day. A failed read is an error, never an empty report.
    pub async fn detect_conflicts(&self, drafts: &DraftSet) -> Result<ConflictReport, EngineError> {
        let started = Instant::now();
        let resources = drafts.assigned_resources();
        let persisted = if resources.is_empty() {
            Vec::new()
        } else {
            let loaded = self
                .bookings
                .load_other_assignments(&resources, drafts.date(), &drafts.booking_ids())
                .await;
            match loaded {
                Ok(rows) => rows,
                Err(source) => {
                    metrics::counter!(DETECTIONS_TOTAL, "status" => "error").increment(1);
                    return Err(EngineError::StoreRead {
                        operation: "load_other_assignments",
                        source,
                    });
                }
            }
        };

        let conflicts = find_conflicts(drafts.drafts(), &persisted);
        metrics::counter!(DETECTIONS_TOTAL, "status" => "ok").increment(1);
        metrics::counter!(CONFLICTS_FOUND_TOTAL).increment(conflicts.len() as u64);
        metrics::histogram!(DETECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(
            date = %drafts.date(),
            revision = drafts.revision(),
            resources = resources.len(),
            persisted = persisted.len(),
            conflicts = conflicts.len(),
            "conflict detection finished"
        );

        Ok(ConflictReport::new(
            drafts.date(),
            drafts.session(),
            drafts.revision(),
            conflicts,
        ))
    }

    /// Re-detect, then write only the changed bookings.
    ///
    /// - conflicts: `ConflictsDetected`, nothing written, drafts stay open for editing;
    /// - nothing changed: `Ok` with zero writes;
    /// - any booking failed: `PartialCommit` listing what landed and what did not.
    ///
    /// Past the conflict gate the draft set is closed; reload the day to continue.
    pub async fn commit(&self, drafts: &mut DraftSet) -> Result<CommitReport, EngineError> {
        let result = self.commit_inner(drafts).await;
        metrics::counter!(COMMITS_TOTAL, "outcome" => commit_outcome_label(&result)).increment(1);
        result
    }

    async fn commit_inner(&self, drafts: &mut DraftSet) -> Result<CommitReport, EngineError> {
        if drafts.is_closed() {
            return Err(EngineError::DraftSetClosed);
        }
        let report = self.detect_conflicts(drafts).await?;
        let Some(clearance) = report.clearance() else {
            warn!(
                date = %drafts.date(),
                conflicts = report.conflicts().len(),
                "commit refused: conflicts"
            );
            return Err(EngineError::ConflictsDetected(report));
        };

        let plan = plan::plan(drafts);
        if plan.is_empty() {
            info!(date = %drafts.date(), "nothing to commit");
            drafts.close();
            return Ok(CommitReport::empty(drafts.date()));
        }

        let report =
            commit::execute(self.junctions.as_ref(), &plan, clearance, self.commit_concurrency)
                .await?;
        drafts.close();
        info!(
            date = %report.date,
            committed = report.committed.len(),
            failed = report.failed.len(),
            writes = report.writes,
            "commit finished"
        );
        if report.is_complete() {
            Ok(report)
        } else {
            Err(EngineError::PartialCommit(report))
        }
    }
}

//! Metric names. The embedding application installs the recorder; without one these are no-ops.

use crate::engine::{CommitReport, EngineError};

// ── Detection ───────────────────────────────────────────────────

/// Counter: conflict detection runs. Labels: status.
pub const DETECTIONS_TOTAL: &str = "crewdesk_detections_total";

/// Counter: conflicts reported across all detection runs.
pub const CONFLICTS_FOUND_TOTAL: &str = "crewdesk_conflicts_found_total";

/// Histogram: detection latency in seconds, including the persisted-assignment read.
pub const DETECTION_DURATION_SECONDS: &str = "crewdesk_detection_duration_seconds";

// ── Commit ──────────────────────────────────────────────────────

/// Counter: commit attempts. Labels: outcome.
pub const COMMITS_TOTAL: &str = "crewdesk_commits_total";

/// Counter: junction store writes. Labels: operation, status.
pub const BOOKING_WRITES_TOTAL: &str = "crewdesk_booking_writes_total";

// ── Store ───────────────────────────────────────────────────────

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "crewdesk_wal_flush_duration_seconds";

/// Map a commit result to a short label for metrics.
pub fn commit_outcome_label(result: &Result<CommitReport, EngineError>) -> &'static str {
    match result {
        Ok(report) if report.writes == 0 => "noop",
        Ok(_) => "committed",
        Err(EngineError::ConflictsDetected(_)) => "conflicts",
        Err(EngineError::PartialCommit(_)) => "partial",
        Err(EngineError::StaleDetection { .. }) => "stale",
        Err(_) => "error",
    }
}

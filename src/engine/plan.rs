use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::model::{BookingId, ResourceId};

use super::draft::DraftSet;

/// Full desired state of one changed booking. Not a delta: the committer replaces
/// the booking's junction rows wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    pub booking_id: BookingId,
    pub coach_ids: BTreeSet<ResourceId>,
    pub driver_ids: BTreeSet<ResourceId>,
    pub note: String,
    pub assignments_changed: bool,
    pub note_changed: bool,
}

impl PlannedChange {
    /// Store calls this change needs.
    pub fn write_count(&self) -> usize {
        usize::from(self.assignments_changed) + usize::from(self.note_changed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationPlan {
    pub date: NaiveDate,
    pub session: Ulid,
    pub revision: u64,
    /// In draft order (start time, then id).
    pub changes: Vec<PlannedChange>,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn write_count(&self) -> usize {
        self.changes.iter().map(PlannedChange::write_count).sum()
    }

    pub fn booking_ids(&self) -> impl Iterator<Item = BookingId> + '_ {
        self.changes.iter().map(|c| c.booking_id)
    }
}

/// Compare every draft against what it was loaded with and keep the ones that differ.
/// Ids compare as sets, so reordering or re-adding the same people is not a change.
pub fn plan(drafts: &DraftSet) -> MutationPlan {
    let changes = drafts
        .drafts()
        .iter()
        .filter(|d| d.is_changed())
        .map(|d| PlannedChange {
            booking_id: d.booking_id,
            coach_ids: d.coach_ids().clone(),
            driver_ids: d.driver_ids().clone(),
            note: d.note().to_string(),
            assignments_changed: d.assignments_changed(),
            note_changed: d.note_changed(),
        })
        .collect();
    MutationPlan {
        date: drafts.date(),
        session: drafts.session(),
        revision: drafts.revision(),
        changes,
    }
}

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Editable assignment state of one booking, kept next to the state it was loaded with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub booking_id: BookingId,
    pub label: Option<String>,
    pub span: Span,
    original_coach_ids: BTreeSet<ResourceId>,
    original_driver_ids: BTreeSet<ResourceId>,
    original_note: String,
    coach_ids: BTreeSet<ResourceId>,
    driver_ids: BTreeSet<ResourceId>,
    note: String,
}

impl BookingDraft {
    /// Validate a loaded booking against the day it was loaded for.
    pub fn from_snapshot(snapshot: BookingSnapshot, day: &Span) -> Result<Self, EngineError> {
        let span = Span::from_minutes(snapshot.start, snapshot.duration_minutes).ok_or(
            EngineError::InvalidSpan {
                booking_id: snapshot.id,
                duration_minutes: snapshot.duration_minutes,
            },
        )?;
        let draft = Self {
            booking_id: snapshot.id,
            label: snapshot.label,
            span,
            original_coach_ids: snapshot.coach_ids.clone(),
            original_driver_ids: snapshot.driver_ids.clone(),
            original_note: snapshot.note.clone(),
            coach_ids: snapshot.coach_ids,
            driver_ids: snapshot.driver_ids,
            note: snapshot.note,
        };
        draft.validate(day)?;
        Ok(draft)
    }

    /// Checks shared by freshly loaded and deserialized drafts.
    fn validate(&self, day: &Span) -> Result<(), EngineError> {
        let minutes = self.span.duration_ms() / MINUTE_MS;
        if self.span.end <= self.span.start {
            return Err(EngineError::InvalidSpan {
                booking_id: self.booking_id,
                duration_minutes: minutes,
            });
        }
        if minutes > MAX_DURATION_MINUTES {
            return Err(EngineError::DurationTooLong {
                booking_id: self.booking_id,
                duration_minutes: minutes,
                max: MAX_DURATION_MINUTES,
            });
        }
        if !day.contains_instant(self.span.start) {
            return Err(EngineError::OutsideDay(self.booking_id));
        }
        let roles = [
            &self.coach_ids,
            &self.driver_ids,
            &self.original_coach_ids,
            &self.original_driver_ids,
        ];
        if roles.iter().any(|ids| ids.len() > MAX_RESOURCES_PER_ROLE) {
            return Err(EngineError::LimitExceeded("too many resources on booking"));
        }
        if self.note.len() > MAX_NOTE_LEN || self.original_note.len() > MAX_NOTE_LEN {
            return Err(EngineError::LimitExceeded("note too long"));
        }
        Ok(())
    }

    pub fn coach_ids(&self) -> &BTreeSet<ResourceId> {
        &self.coach_ids
    }

    pub fn driver_ids(&self) -> &BTreeSet<ResourceId> {
        &self.driver_ids
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn original_coach_ids(&self) -> &BTreeSet<ResourceId> {
        &self.original_coach_ids
    }

    pub fn original_driver_ids(&self) -> &BTreeSet<ResourceId> {
        &self.original_driver_ids
    }

    pub fn original_note(&self) -> &str {
        &self.original_note
    }

    pub fn assignments_changed(&self) -> bool {
        self.coach_ids != self.original_coach_ids || self.driver_ids != self.original_driver_ids
    }

    pub fn note_changed(&self) -> bool {
        self.note != self.original_note
    }

    pub fn is_changed(&self) -> bool {
        self.assignments_changed() || self.note_changed()
    }

    /// Every `(resource, role)` pair currently assigned.
    pub fn assignments(&self) -> impl Iterator<Item = (ResourceId, ResourceRole)> + '_ {
        let coaches = self.coach_ids.iter().map(|id| (*id, ResourceRole::Coach));
        let drivers = self.driver_ids.iter().map(|id| (*id, ResourceRole::Driver));
        coaches.chain(drivers)
    }

    fn role_mut(&mut self, role: ResourceRole) -> &mut BTreeSet<ResourceId> {
        match role {
            ResourceRole::Coach => &mut self.coach_ids,
            ResourceRole::Driver => &mut self.driver_ids,
        }
    }
}

fn collect_role(ids: impl IntoIterator<Item = ResourceId>) -> Result<BTreeSet<ResourceId>, EngineError> {
    let ids: BTreeSet<ResourceId> = ids.into_iter().collect();
    if ids.len() > MAX_RESOURCES_PER_ROLE {
        return Err(EngineError::LimitExceeded("too many resources on booking"));
    }
    Ok(ids)
}

/// One editing session over a day's bookings.
///
/// Every mutation that changes something bumps `revision`; a conflict check is only
/// good for the revision it ran on. Once a commit has executed the set is closed.
///
/// Deserializing re-validates every draft, re-sorts them and rebuilds the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "DraftSetRecord")]
pub struct DraftSet {
    session: Ulid,
    date: NaiveDate,
    revision: u64,
    closed: bool,
    /// Sorted by `(span.start, booking_id)`.
    drafts: Vec<BookingDraft>,
    #[serde(skip)]
    index: HashMap<BookingId, usize>,
}

/// Serialized shape of a [`DraftSet`], before validation.
#[derive(Deserialize)]
struct DraftSetRecord {
    session: Ulid,
    date: NaiveDate,
    revision: u64,
    closed: bool,
    drafts: Vec<BookingDraft>,
}

impl TryFrom<DraftSetRecord> for DraftSet {
    type Error = EngineError;

    fn try_from(record: DraftSetRecord) -> Result<Self, EngineError> {
        let day = day_bounds(record.date);
        for draft in &record.drafts {
            draft.validate(&day)?;
        }
        let mut set = Self::assemble(record.date, record.drafts)?;
        set.session = record.session;
        set.revision = record.revision;
        set.closed = record.closed;
        Ok(set)
    }
}

impl DraftSet {
    pub fn from_snapshots(
        date: NaiveDate,
        snapshots: Vec<BookingSnapshot>,
    ) -> Result<Self, EngineError> {
        if snapshots.len() > MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings in day"));
        }
        let day = day_bounds(date);
        let drafts = snapshots
            .into_iter()
            .map(|s| BookingDraft::from_snapshot(s, &day))
            .collect::<Result<Vec<_>, _>>()?;
        Self::assemble(date, drafts)
    }

    /// Sort, index and reject duplicates. A new session at revision 0.
    fn assemble(date: NaiveDate, mut drafts: Vec<BookingDraft>) -> Result<Self, EngineError> {
        if drafts.len() > MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings in day"));
        }
        drafts.sort_by_key(|d| (d.span.start, d.booking_id));

        let mut index = HashMap::with_capacity(drafts.len());
        for (i, d) in drafts.iter().enumerate() {
            if index.insert(d.booking_id, i).is_some() {
                return Err(EngineError::DuplicateBooking(d.booking_id));
            }
        }

        Ok(Self {
            session: Ulid::new(),
            date,
            revision: 0,
            closed: false,
            drafts,
            index,
        })
    }

    pub fn session(&self) -> Ulid {
        self.session
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(super) fn close(&mut self) {
        self.closed = true;
    }

    pub fn drafts(&self) -> &[BookingDraft] {
        &self.drafts
    }

    pub fn get(&self, booking_id: BookingId) -> Option<&BookingDraft> {
        self.index.get(&booking_id).and_then(|&i| self.drafts.get(i))
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub fn booking_ids(&self) -> HashSet<BookingId> {
        self.index.keys().copied().collect()
    }

    /// Every resource currently assigned to any draft, in either role.
    pub fn assigned_resources(&self) -> BTreeSet<ResourceId> {
        self.drafts
            .iter()
            .flat_map(|d| d.assignments().map(|(id, _)| id))
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        self.drafts.iter().any(BookingDraft::is_changed)
    }

    /// Run `f` on one draft; bump the revision if it reports a change.
    fn mutate(
        &mut self,
        booking_id: BookingId,
        f: impl FnOnce(&mut BookingDraft) -> Result<bool, EngineError>,
    ) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::DraftSetClosed);
        }
        let draft = self
            .index
            .get(&booking_id)
            .and_then(|&i| self.drafts.get_mut(i))
            .ok_or(EngineError::UnknownBooking(booking_id))?;
        if f(draft)? {
            self.revision += 1;
        }
        Ok(())
    }

    fn set_role(
        &mut self,
        booking_id: BookingId,
        role: ResourceRole,
        ids: impl IntoIterator<Item = ResourceId>,
    ) -> Result<(), EngineError> {
        let ids = collect_role(ids)?;
        self.mutate(booking_id, |d| {
            let slot = d.role_mut(role);
            if *slot == ids {
                return Ok(false);
            }
            *slot = ids;
            Ok(true)
        })
    }

    fn add_to_role(
        &mut self,
        booking_id: BookingId,
        role: ResourceRole,
        id: ResourceId,
    ) -> Result<(), EngineError> {
        self.mutate(booking_id, |d| {
            let slot = d.role_mut(role);
            if !slot.contains(&id) && slot.len() >= MAX_RESOURCES_PER_ROLE {
                return Err(EngineError::LimitExceeded("too many resources on booking"));
            }
            Ok(slot.insert(id))
        })
    }

    fn remove_from_role(
        &mut self,
        booking_id: BookingId,
        role: ResourceRole,
        id: ResourceId,
    ) -> Result<(), EngineError> {
        self.mutate(booking_id, |d| Ok(d.role_mut(role).remove(&id)))
    }

    pub fn set_coaches(
        &mut self,
        booking_id: BookingId,
        ids: impl IntoIterator<Item = ResourceId>,
    ) -> Result<(), EngineError> {
        self.set_role(booking_id, ResourceRole::Coach, ids)
    }

    pub fn set_drivers(
        &mut self,
        booking_id: BookingId,
        ids: impl IntoIterator<Item = ResourceId>,
    ) -> Result<(), EngineError> {
        self.set_role(booking_id, ResourceRole::Driver, ids)
    }

    pub fn add_coach(&mut self, booking_id: BookingId, id: ResourceId) -> Result<(), EngineError> {
        self.add_to_role(booking_id, ResourceRole::Coach, id)
    }

    pub fn remove_coach(&mut self, booking_id: BookingId, id: ResourceId) -> Result<(), EngineError> {
        self.remove_from_role(booking_id, ResourceRole::Coach, id)
    }

    pub fn add_driver(&mut self, booking_id: BookingId, id: ResourceId) -> Result<(), EngineError> {
        self.add_to_role(booking_id, ResourceRole::Driver, id)
    }

    pub fn remove_driver(&mut self, booking_id: BookingId, id: ResourceId) -> Result<(), EngineError> {
        self.remove_from_role(booking_id, ResourceRole::Driver, id)
    }

    pub fn set_note(
        &mut self,
        booking_id: BookingId,
        note: impl Into<String>,
    ) -> Result<(), EngineError> {
        let note = note.into();
        if note.len() > MAX_NOTE_LEN {
            return Err(EngineError::LimitExceeded("note too long"));
        }
        self.mutate(booking_id, |d| {
            if d.note == note {
                return Ok(false);
            }
            d.note = note;
            Ok(true)
        })
    }

    /// Discard edits on one booking, back to its loaded state.
    pub fn revert(&mut self, booking_id: BookingId) -> Result<(), EngineError> {
        self.mutate(booking_id, |d| {
            if !d.is_changed() {
                return Ok(false);
            }
            d.coach_ids = d.original_coach_ids.clone();
            d.driver_ids = d.original_driver_ids.clone();
            d.note = d.original_note.clone();
            Ok(true)
        })
    }
}

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

use super::draft::BookingDraft;

/// One resource held on two bookings whose spans overlap.
///
/// `booking_a` is the booking that starts first (ties broken by id). Roles are
/// whatever the resource holds on each side; they never exempt a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub resource_id: ResourceId,
    pub booking_a: BookingId,
    pub span_a: Span,
    pub roles_a: BTreeSet<ResourceRole>,
    pub label_a: Option<String>,
    pub booking_b: BookingId,
    pub span_b: Span,
    pub roles_b: BTreeSet<ResourceRole>,
    pub label_b: Option<String>,
}

impl Conflict {
    fn between(resource_id: ResourceId, a: &Occupancy<'_>, b: &Occupancy<'_>) -> Self {
        Self {
            resource_id,
            booking_a: a.booking_id,
            span_a: a.span,
            roles_a: a.roles.clone(),
            label_a: a.label.map(str::to_owned),
            booking_b: b.booking_id,
            span_b: b.span,
            roles_b: b.roles.clone(),
            label_b: b.label.map(str::to_owned),
        }
    }

    pub fn involves(&self, booking_id: BookingId) -> bool {
        self.booking_a == booking_id || self.booking_b == booking_id
    }
}

fn booking_name(id: BookingId, label: Option<&str>) -> String {
    match label {
        Some(l) => format!("\"{l}\""),
        None => format!("booking {id}"),
    }
}

fn role_names(roles: &BTreeSet<ResourceRole>) -> String {
    roles
        .iter()
        .map(ResourceRole::to_string)
        .collect::<Vec<_>>()
        .join("+")
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is double-booked: {} {} as {} overlaps {} {} as {}",
            self.resource_id,
            booking_name(self.booking_a, self.label_a.as_deref()),
            self.span_a,
            role_names(&self.roles_a),
            booking_name(self.booking_b, self.label_b.as_deref()),
            self.span_b,
            role_names(&self.roles_b),
        )
    }
}

/// Result of one detection run over one revision of a draft set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    date: NaiveDate,
    session: Ulid,
    revision: u64,
    conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub(super) fn new(date: NaiveDate, session: Ulid, revision: u64, conflicts: Vec<Conflict>) -> Self {
        Self {
            date,
            session,
            revision,
            conflicts,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn into_conflicts(self) -> Vec<Conflict> {
        self.conflicts
    }

    pub fn is_clear(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Conflicts touching one booking, for highlighting it in a grid.
    pub fn involving(&self, booking_id: BookingId) -> impl Iterator<Item = &Conflict> + '_ {
        self.conflicts.iter().filter(move |c| c.involves(booking_id))
    }

    /// Permission to commit exactly the revision this report was computed for.
    pub fn clearance(&self) -> Option<Clearance> {
        self.is_clear().then_some(Clearance {
            session: self.session,
            revision: self.revision,
        })
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conflicts.is_empty() {
            return write!(f, "{}: no conflicts", self.date);
        }
        write!(f, "{}: {} conflict(s)", self.date, self.conflicts.len())?;
        for c in &self.conflicts {
            write!(f, "\n  {c}")?;
        }
        Ok(())
    }
}

/// Proof that a detection run found no conflicts for one revision of one draft set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clearance {
    session: Ulid,
    revision: u64,
}

impl Clearance {
    pub fn session(&self) -> Ulid {
        self.session
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// A booking's hold on one resource.
struct Occupancy<'a> {
    booking_id: BookingId,
    span: Span,
    roles: BTreeSet<ResourceRole>,
    label: Option<&'a str>,
    /// Draft entries are being edited; persisted ones are only compared against drafts.
    draft: bool,
}

/// Every pairwise overlap per resource among the drafts' current assignments, and
/// between drafts and persisted rows of bookings outside the draft set.
///
/// Persisted rows for bookings that are in the draft set are ignored: the draft
/// supersedes them. A booking is never compared with itself, so one person coaching
/// and driving the same booking is fine.
///
/// Ordered by resource, then the earlier booking's start, then the later one's.
pub fn find_conflicts(drafts: &[BookingDraft], persisted: &[PersistedAssignment]) -> Vec<Conflict> {
    let mut by_resource: BTreeMap<ResourceId, HashMap<BookingId, Occupancy<'_>>> = BTreeMap::new();

    for draft in drafts {
        for (resource_id, role) in draft.assignments() {
            by_resource
                .entry(resource_id)
                .or_default()
                .entry(draft.booking_id)
                .or_insert_with(|| Occupancy {
                    booking_id: draft.booking_id,
                    span: draft.span,
                    roles: BTreeSet::new(),
                    label: draft.label.as_deref(),
                    draft: true,
                })
                .roles
                .insert(role);
        }
    }

    let draft_ids: HashSet<BookingId> = drafts.iter().map(|d| d.booking_id).collect();
    for row in persisted {
        if draft_ids.contains(&row.booking_id) {
            continue;
        }
        // Nobody in the drafts holds this resource.
        let Some(occupied) = by_resource.get_mut(&row.resource_id) else {
            continue;
        };
        occupied
            .entry(row.booking_id)
            .or_insert_with(|| Occupancy {
                booking_id: row.booking_id,
                span: row.span,
                roles: BTreeSet::new(),
                label: row.label.as_deref(),
                draft: false,
            })
            .roles
            .insert(row.role);
    }

    let mut conflicts = Vec::new();
    for (resource_id, occupied) in &by_resource {
        let mut entries: Vec<&Occupancy<'_>> = occupied.values().collect();
        entries.sort_by_key(|o| (o.span.start, o.booking_id));
        sweep_resource(*resource_id, &entries, &mut conflicts);
    }
    conflicts.sort_by_key(|c| {
        (
            c.resource_id,
            c.span_a.start,
            c.span_b.start,
            c.booking_a,
            c.booking_b,
        )
    });
    conflicts
}

/// `entries` sorted by start. Once a later entry starts at or after `a.end`, so does every
/// entry after it.
fn sweep_resource(resource_id: ResourceId, entries: &[&Occupancy<'_>], out: &mut Vec<Conflict>) {
    for (i, a) in entries.iter().enumerate() {
        for b in &entries[i + 1..] {
            if b.span.start >= a.span.end {
                break;
            }
            if !(a.draft || b.draft) {
                continue;
            }
            if a.span.overlaps(&b.span) {
                out.push(Conflict::between(resource_id, a, b));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DraftSet;

    const M: Ms = 60_000;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
    }

    fn at(minutes: Ms) -> Ms {
        day_bounds(date()).start + minutes * M
    }

    fn snapshot(start_minutes: Ms, duration: i64) -> BookingSnapshot {
        BookingSnapshot {
            id: Ulid::new(),
            start: at(start_minutes),
            duration_minutes: duration,
            label: None,
            coach_ids: BTreeSet::new(),
            driver_ids: BTreeSet::new(),
            note: String::new(),
        }
    }

    fn persisted(resource_id: ResourceId, role: ResourceRole, start_minutes: Ms, duration: i64) -> PersistedAssignment {
        PersistedAssignment {
            resource_id,
            role,
            booking_id: Ulid::new(),
            span: Span::from_minutes(at(start_minutes), duration).unwrap(),
            label: None,
        }
    }

    #[test]
    fn overlapping_coach_reported_once() {
        let a = snapshot(9 * 60, 60);
        let b = snapshot(9 * 60 + 30, 60);
        let (a_id, b_id) = (a.id, b.id);
        let c1 = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a, b]).unwrap();
        set.add_coach(a_id, c1).unwrap();
        set.add_coach(b_id, c1).unwrap();

        let conflicts = find_conflicts(set.drafts(), &[]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resource_id, c1);
        assert_eq!(conflicts[0].booking_a, a_id);
        assert_eq!(conflicts[0].booking_b, b_id);
    }

    #[test]
    fn touching_spans_do_not_conflict() {
        let a = snapshot(10 * 60, 60);
        let b = snapshot(11 * 60, 60);
        let (a_id, b_id) = (a.id, b.id);
        let c1 = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a, b]).unwrap();
        set.add_coach(a_id, c1).unwrap();
        set.add_driver(b_id, c1).unwrap();
        assert!(find_conflicts(set.drafts(), &[]).is_empty());
    }

    #[test]
    fn role_combinations_conflict_identically() {
        let combos = [
            (ResourceRole::Coach, ResourceRole::Coach),
            (ResourceRole::Driver, ResourceRole::Driver),
            (ResourceRole::Coach, ResourceRole::Driver),
            (ResourceRole::Driver, ResourceRole::Coach),
        ];
        for (role_a, role_b) in combos {
            let a = snapshot(9 * 60, 60);
            let b = snapshot(9 * 60 + 15, 30);
            let (a_id, b_id) = (a.id, b.id);
            let p = Ulid::new();
            let mut set = DraftSet::from_snapshots(date(), vec![a, b]).unwrap();
            for (id, role) in [(a_id, role_a), (b_id, role_b)] {
                match role {
                    ResourceRole::Coach => set.add_coach(id, p).unwrap(),
                    ResourceRole::Driver => set.add_driver(id, p).unwrap(),
                }
            }
            let conflicts = find_conflicts(set.drafts(), &[]);
            assert_eq!(conflicts.len(), 1, "{role_a} / {role_b}");
            assert_eq!(conflicts[0].roles_a, BTreeSet::from([role_a]));
            assert_eq!(conflicts[0].roles_b, BTreeSet::from([role_b]));
        }
    }

    #[test]
    fn coach_and_driver_on_same_booking_is_fine() {
        let a = snapshot(9 * 60, 60);
        let id = a.id;
        let p = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a]).unwrap();
        set.add_coach(id, p).unwrap();
        set.add_driver(id, p).unwrap();
        assert!(find_conflicts(set.drafts(), &[]).is_empty());
    }

    #[test]
    fn dual_role_still_one_conflict_per_pair() {
        let a = snapshot(9 * 60, 60);
        let b = snapshot(9 * 60, 60);
        let (a_id, b_id) = (a.id, b.id);
        let p = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a, b]).unwrap();
        set.add_coach(a_id, p).unwrap();
        set.add_driver(a_id, p).unwrap();
        set.add_coach(b_id, p).unwrap();

        let conflicts = find_conflicts(set.drafts(), &[]);
        assert_eq!(conflicts.len(), 1);
        let c = &conflicts[0];
        let dual = BTreeSet::from([ResourceRole::Coach, ResourceRole::Driver]);
        let (dual_side, single_side) = if c.booking_a == a_id {
            (&c.roles_a, &c.roles_b)
        } else {
            (&c.roles_b, &c.roles_a)
        };
        assert_eq!(dual_side, &dual);
        assert_eq!(single_side, &BTreeSet::from([ResourceRole::Coach]));
        assert!(c.involves(b_id));
    }

    #[test]
    fn persisted_booking_outside_draft_set_conflicts() {
        let a = snapshot(14 * 60, 30);
        let a_id = a.id;
        let d1 = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a]).unwrap();
        set.add_driver(a_id, d1).unwrap();

        let z = persisted(d1, ResourceRole::Driver, 14 * 60 + 15, 30);
        let conflicts = find_conflicts(set.drafts(), std::slice::from_ref(&z));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].booking_a, a_id);
        assert_eq!(conflicts[0].booking_b, z.booking_id);
    }

    #[test]
    fn persisted_rows_of_drafted_bookings_are_superseded() {
        let a = snapshot(9 * 60, 60);
        let b = snapshot(9 * 60 + 30, 60);
        let (a_id, b_id) = (a.id, b.id);
        let c1 = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a, b]).unwrap();
        set.add_coach(a_id, c1).unwrap();

        // Stale persisted row says B still has C1; the draft for B says otherwise.
        let stale = PersistedAssignment {
            resource_id: c1,
            role: ResourceRole::Coach,
            booking_id: b_id,
            span: set.get(b_id).unwrap().span,
            label: None,
        };
        assert!(find_conflicts(set.drafts(), &[stale]).is_empty());
    }

    #[test]
    fn persisted_pairs_among_themselves_are_ignored() {
        let a = snapshot(8 * 60, 30);
        let a_id = a.id;
        let c1 = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a]).unwrap();
        set.add_coach(a_id, c1).unwrap();

        let x = persisted(c1, ResourceRole::Coach, 12 * 60, 60);
        let y = persisted(c1, ResourceRole::Coach, 12 * 60 + 30, 60);
        assert!(find_conflicts(set.drafts(), &[x, y]).is_empty());
    }

    #[test]
    fn persisted_rows_for_unassigned_resources_are_ignored() {
        let a = snapshot(9 * 60, 60);
        let set = DraftSet::from_snapshots(date(), vec![a]).unwrap();
        let other = persisted(Ulid::new(), ResourceRole::Coach, 9 * 60, 60);
        assert!(find_conflicts(set.drafts(), &[other]).is_empty());
    }

    #[test]
    fn all_pairs_reported_without_short_circuit() {
        // Three mutually overlapping bookings share C1 → three pairs.
        let snaps: Vec<_> = (0..3).map(|i| snapshot(9 * 60 + i * 10, 60)).collect();
        let ids: Vec<_> = snaps.iter().map(|s| s.id).collect();
        let c1 = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), snaps).unwrap();
        for id in &ids {
            set.add_coach(*id, c1).unwrap();
        }
        let conflicts = find_conflicts(set.drafts(), &[]);
        assert_eq!(conflicts.len(), 3);
        let pairs: Vec<_> = conflicts.iter().map(|c| (c.booking_a, c.booking_b)).collect();
        assert_eq!(
            pairs,
            vec![(ids[0], ids[1]), (ids[0], ids[2]), (ids[1], ids[2])]
        );
    }

    #[test]
    fn ordered_by_resource_then_start() {
        let early = snapshot(8 * 60, 120);
        let late = snapshot(13 * 60, 120);
        let mid = snapshot(9 * 60, 300);
        let (early_id, late_id, mid_id) = (early.id, late.id, mid.id);
        let (r1, r2) = {
            let x = Ulid::new();
            let y = Ulid::new();
            if x < y { (x, y) } else { (y, x) }
        };
        let mut set = DraftSet::from_snapshots(date(), vec![late, mid, early]).unwrap();
        for id in [early_id, late_id, mid_id] {
            set.add_coach(id, r2).unwrap();
        }
        set.add_driver(late_id, r1).unwrap();
        set.add_driver(mid_id, r1).unwrap();

        let conflicts = find_conflicts(set.drafts(), &[]);
        let keys: Vec<_> = conflicts
            .iter()
            .map(|c| (c.resource_id, c.booking_a, c.booking_b))
            .collect();
        assert_eq!(
            keys,
            vec![
                (r1, mid_id, late_id),
                (r2, early_id, mid_id),
                (r2, mid_id, late_id),
            ]
        );
    }

    #[test]
    fn overlap_is_symmetric() {
        let spans = [
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(10, 20),
            Span::new(0, 30),
            Span::new(25, 26),
        ];
        for a in &spans {
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a));
            }
        }
    }

    #[test]
    fn identical_spans_on_different_bookings_conflict() {
        let a = snapshot(9 * 60, 45);
        let b = snapshot(9 * 60, 45);
        let (a_id, b_id) = (a.id, b.id);
        let p = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a, b]).unwrap();
        set.add_driver(a_id, p).unwrap();
        set.add_driver(b_id, p).unwrap();
        let conflicts = find_conflicts(set.drafts(), &[]);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].booking_a < conflicts[0].booking_b);
    }

    #[test]
    fn conflict_message_names_resource_bookings_and_times() {
        let mut a = snapshot(9 * 60, 60);
        a.label = Some("Wakeboard 101".into());
        let b = snapshot(9 * 60 + 30, 60);
        let (a_id, b_id) = (a.id, b.id);
        let c1 = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a, b]).unwrap();
        set.add_coach(a_id, c1).unwrap();
        set.add_driver(b_id, c1).unwrap();

        let text = find_conflicts(set.drafts(), &[])[0].to_string();
        assert_eq!(
            text,
            format!(
                "{c1} is double-booked: \"Wakeboard 101\" 09:00-10:00 as coach overlaps booking {b_id} 09:30-10:30 as driver"
            )
        );
    }

    #[test]
    fn report_clearance_only_when_clear() {
        let session = Ulid::new();
        let clear = ConflictReport::new(date(), session, 4, Vec::new());
        let clearance = clear.clearance().unwrap();
        assert_eq!(clearance.revision(), 4);
        assert_eq!(clearance.session(), session);
        assert_eq!(clear.to_string(), "2026-07-01: no conflicts");

        let a = snapshot(9 * 60, 60);
        let b = snapshot(9 * 60, 60);
        let (a_id, b_id) = (a.id, b.id);
        let p = Ulid::new();
        let mut set = DraftSet::from_snapshots(date(), vec![a, b]).unwrap();
        set.add_coach(a_id, p).unwrap();
        set.add_coach(b_id, p).unwrap();
        let blocked = ConflictReport::new(date(), session, 4, find_conflicts(set.drafts(), &[]));
        assert!(blocked.clearance().is_none());
        assert_eq!(blocked.involving(a_id).count(), 1);
        assert_eq!(blocked.involving(Ulid::new()).count(), 0);
        assert!(blocked.to_string().starts_with("2026-07-01: 1 conflict(s)\n  "));
    }
}

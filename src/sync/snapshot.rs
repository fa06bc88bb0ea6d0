//! REST snapshots and their reconciliation with pushed events.

use crate::subscriptions::ViewFilter;
use crate::types::{AttendanceEvent, AttendanceId, AttendanceRecord, EventKey};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Authoritative result of the last successful fetch.
///
/// `stale` is set when a later fetch failed; the records are kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncSnapshot {
    filter: ViewFilter,
    records: BTreeMap<AttendanceId, AttendanceRecord>,
    fetched_at: DateTime<Utc>,
    stale: bool,
}

impl SyncSnapshot {
    /// Build a snapshot from fetched rows, keeping only those the filter
    /// admits. Duplicate ids keep the last row.
    pub fn new(filter: ViewFilter, rows: Vec<AttendanceRecord>, fetched_at: DateTime<Utc>) -> Self {
        let records = rows
            .into_iter()
            .filter(|r| filter.matches_record(r))
            .map(|r| (r.attendance_id, r))
            .collect();
        Self {
            filter,
            records,
            fetched_at,
            stale: false,
        }
    }

    pub fn filter(&self) -> &ViewFilter {
        &self.filter
    }

    pub fn get(&self, id: AttendanceId) -> Option<&AttendanceRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Returns false if already stale.
    pub(crate) fn mark_stale(&mut self) -> bool {
        !std::mem::replace(&mut self.stale, true)
    }

    /// Project onto `filter` and overlay the newer state carried by `events`.
    ///
    /// An event overlays a record when it names the record's id and is not
    /// older than it, or, lacking an id match, when it occupies the record's
    /// slot, the record is the newest in that slot, and the event is strictly
    /// newer. Overlaid records are flagged optimistic. Output is newest
    /// `in_time` first.
    pub fn reconcile(&self, filter: &ViewFilter, events: &[AttendanceEvent]) -> ReconciledSnapshot {
        let visible: Vec<&AttendanceRecord> = self
            .records
            .values()
            .filter(|r| filter.matches_record(r))
            .collect();

        let mut newest_in_slot: HashMap<EventKey, &AttendanceRecord> = HashMap::new();
        for &record in &visible {
            if let (Some(key), Some(_)) = (record.key(), record.in_time) {
                let slot = newest_in_slot.entry(key).or_insert(record);
                if (record.in_time, record.attendance_id) > (slot.in_time, slot.attendance_id) {
                    *slot = record;
                }
            }
        }

        let mut records: Vec<ViewRecord> = visible
            .into_iter()
            .map(|record| {
                let overlay = self
                    .by_id(record, events)
                    .or_else(|| self.by_slot(record, events, &newest_in_slot));
                match overlay {
                    Some(event) => ViewRecord::overlaid(record, event),
                    None => ViewRecord::confirmed(record.clone()),
                }
            })
            .collect();

        records.sort_by(|a, b| {
            (b.record.in_time, b.record.attendance_id).cmp(&(a.record.in_time, a.record.attendance_id))
        });

        ReconciledSnapshot {
            records,
            fetched_at: self.fetched_at,
            stale: self.stale,
        }
    }

    fn by_id<'e>(
        &self,
        record: &AttendanceRecord,
        events: &'e [AttendanceEvent],
    ) -> Option<&'e AttendanceEvent> {
        events.iter().find(|e| {
            e.attendance_id() == Some(record.attendance_id)
                && record.in_time.map_or(true, |t| e.timestamp_in() >= t)
        })
    }

    fn by_slot<'e>(
        &self,
        record: &AttendanceRecord,
        events: &'e [AttendanceEvent],
        newest_in_slot: &HashMap<EventKey, &AttendanceRecord>,
    ) -> Option<&'e AttendanceEvent> {
        let key = record.key()?;
        let in_time = record.in_time?;
        let newest = newest_in_slot.get(&key)?;
        if newest.attendance_id != record.attendance_id {
            return None;
        }
        events.iter().find(|e| {
            e.key() == key
                && e.timestamp_in() > in_time
                // An id naming another known record belongs to that record.
                && e.attendance_id().map_or(true, |id| !self.records.contains_key(&id))
        })
    }
}

/// A snapshot row as presented to a view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewRecord {
    pub record: AttendanceRecord,

    /// Set when pushed state was overlaid and the backend has not confirmed it yet.
    pub optimistic: bool,
}

impl ViewRecord {
    fn confirmed(record: AttendanceRecord) -> Self {
        Self {
            record,
            optimistic: false,
        }
    }

    fn overlaid(record: &AttendanceRecord, event: &AttendanceEvent) -> Self {
        let mut merged = record.clone();
        merged.status = event.status();
        if event.timestamp_out().is_some() {
            merged.out_time = event.timestamp_out();
        }
        let optimistic = merged != *record;
        Self {
            record: merged,
            optimistic,
        }
    }
}

/// Snapshot rows after overlaying pushed events, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciledSnapshot {
    pub records: Vec<ViewRecord>,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

impl ReconciledSnapshot {
    pub fn get(&self, id: AttendanceId) -> Option<&ViewRecord> {
        self.records.iter().find(|r| r.record.attendance_id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ViewRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttendanceStatus, ClassId, StudentId};
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn record(id: i64, student: i64, class: i64, minutes: i64, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            attendance_id: AttendanceId(id),
            student_id: StudentId(student),
            class_id: Some(ClassId(class)),
            in_time: Some(t(minutes)),
            out_time: None,
            status,
        }
    }

    fn event(student: i64, class: i64, minutes: i64, status: AttendanceStatus) -> AttendanceEvent {
        AttendanceEvent::new(StudentId(student), ClassId(class), t(minutes)).with_status(status)
    }

    fn snapshot(rows: Vec<AttendanceRecord>) -> SyncSnapshot {
        SyncSnapshot::new(ViewFilter::all(), rows, t(100))
    }

    #[test]
    fn test_newer_event_overlays_record() {
        let snap = snapshot(vec![record(1, 3, 5, 0, AttendanceStatus::Absent)]);
        let events = [event(3, 5, 10, AttendanceStatus::Present)];

        let view = snap.reconcile(&ViewFilter::all(), &events);
        let row = view.get(AttendanceId(1)).unwrap();
        assert_eq!(row.record.status, AttendanceStatus::Present);
        assert!(row.optimistic);
        assert_eq!(row.record.in_time, Some(t(0)));
    }

    #[test]
    fn test_older_event_leaves_record_alone() {
        let snap = snapshot(vec![record(1, 3, 5, 10, AttendanceStatus::Present)]);
        let events = [event(3, 5, 0, AttendanceStatus::Absent)];

        let view = snap.reconcile(&ViewFilter::all(), &events);
        let row = view.get(AttendanceId(1)).unwrap();
        assert_eq!(row.record.status, AttendanceStatus::Present);
        assert!(!row.optimistic);
    }

    #[test]
    fn test_only_newest_record_in_slot_is_overlaid() {
        let snap = snapshot(vec![
            record(1, 3, 5, 0, AttendanceStatus::Absent),
            record(2, 3, 5, 20, AttendanceStatus::Absent),
        ]);
        let events = [event(3, 5, 30, AttendanceStatus::Present)];

        let view = snap.reconcile(&ViewFilter::all(), &events);
        assert_eq!(view.get(AttendanceId(1)).unwrap().record.status, AttendanceStatus::Absent);
        assert_eq!(view.get(AttendanceId(2)).unwrap().record.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_id_match_wins_and_carries_out_time() {
        let snap = snapshot(vec![record(7, 3, 5, 0, AttendanceStatus::Present)]);
        let events = [event(3, 5, 0, AttendanceStatus::Present)
            .with_attendance_id(Some(AttendanceId(7)))
            .with_timestamp_out(Some(t(45)))];

        let view = snap.reconcile(&ViewFilter::all(), &events);
        let row = view.get(AttendanceId(7)).unwrap();
        assert_eq!(row.record.out_time, Some(t(45)));
        assert!(row.optimistic);
    }

    #[test]
    fn test_event_naming_other_known_record_does_not_overlay_by_slot() {
        let snap = snapshot(vec![
            record(1, 3, 5, 0, AttendanceStatus::Absent),
            record(2, 3, 6, 0, AttendanceStatus::Absent),
        ]);
        let events = [event(3, 5, 10, AttendanceStatus::Present).with_attendance_id(Some(AttendanceId(2)))];

        let view = snap.reconcile(&ViewFilter::all(), &events);
        assert_eq!(view.get(AttendanceId(1)).unwrap().record.status, AttendanceStatus::Absent);
        // Id match requires the event not to be older, which holds.
        assert_eq!(view.get(AttendanceId(2)).unwrap().record.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_projection_and_ordering() {
        let snap = snapshot(vec![
            record(1, 1, 5, 0, AttendanceStatus::Present),
            record(2, 2, 7, 5, AttendanceStatus::Present),
            record(3, 3, 5, 10, AttendanceStatus::Present),
        ]);

        let view = snap.reconcile(&ViewFilter::class(ClassId(5)), &[]);
        let ids: Vec<_> = view.iter().map(|r| r.record.attendance_id.0).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(view.fetched_at, t(100));
        assert!(!view.stale);
    }

    #[test]
    fn test_new_filters_rows_and_marks_stale_once() {
        let mut snap = SyncSnapshot::new(
            ViewFilter::class(ClassId(5)),
            vec![
                record(1, 1, 5, 0, AttendanceStatus::Present),
                record(2, 2, 7, 0, AttendanceStatus::Present),
            ],
            t(0),
        );
        assert_eq!(snap.len(), 1);
        assert!(snap.mark_stale());
        assert!(!snap.mark_stale());
        assert!(snap.reconcile(&ViewFilter::all(), &[]).stale);
    }
}

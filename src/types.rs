//! Core types for attendance synchronization.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An identifier as it appears on the wire: the backend emits integers, but
/// string-encoded ids are tolerated.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum WireId {
    Int(i64),
    Text(String),
}

impl WireId {
    pub(crate) fn to_i64(&self) -> Option<i64> {
        match self {
            WireId::Int(v) => Some(*v),
            WireId::Text(s) => s.trim().parse().ok(),
        }
    }
}

macro_rules! wire_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub struct $name(pub i64);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = WireId::deserialize(deserializer)?;
                raw.to_i64().map($name).ok_or_else(|| {
                    serde::de::Error::custom(concat!("invalid ", $label))
                })
            }
        }
    };
}

wire_id!(
    /// Student primary key.
    StudentId,
    "StudentId"
);
wire_id!(
    /// Class primary key.
    ClassId,
    "ClassId"
);
wire_id!(
    /// Attendance record primary key (assigned by the backend).
    AttendanceId,
    "AttendanceId"
);

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 as well as the naive ISO-8601 form produced by the
/// backend (`2024-01-01T08:00:00.123456`), which is taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Serde adapter for optional backend timestamps.
pub(crate) mod opt_timestamp {
    use super::parse_timestamp;
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}

/// Attendance status as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AttendanceStatus {
    Present,
    Absent,
    #[default]
    Unknown,
}

impl AttendanceStatus {
    /// Case-insensitive parse; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => AttendanceStatus::Present,
            "absent" => AttendanceStatus::Absent,
            _ => AttendanceStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AttendanceStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AttendanceStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Option::<String>::deserialize(d)?
            .map(|raw| AttendanceStatus::parse(&raw))
            .unwrap_or_default())
    }
}

/// The slot an attendance event occupies: one student in one class.
///
/// Events for the same slot supersede each other in an event log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub student_id: StudentId,
    pub class_id: ClassId,
}

/// A normalized push notification: a student was marked present or absent.
///
/// Immutable once built. Corrections arrive as new events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttendanceEvent {
    student_id: StudentId,
    class_id: ClassId,
    timestamp_in: DateTime<Utc>,
    timestamp_out: Option<DateTime<Utc>>,
    status: AttendanceStatus,
    attendance_id: Option<AttendanceId>,
}

impl AttendanceEvent {
    /// A new event with `Unknown` status and no check-out time.
    pub fn new(student_id: StudentId, class_id: ClassId, timestamp_in: DateTime<Utc>) -> Self {
        Self {
            student_id,
            class_id,
            timestamp_in,
            timestamp_out: None,
            status: AttendanceStatus::Unknown,
            attendance_id: None,
        }
    }

    pub fn with_status(mut self, status: AttendanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_timestamp_out(mut self, timestamp_out: Option<DateTime<Utc>>) -> Self {
        self.timestamp_out = timestamp_out;
        self
    }

    pub fn with_attendance_id(mut self, attendance_id: Option<AttendanceId>) -> Self {
        self.attendance_id = attendance_id;
        self
    }

    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn timestamp_in(&self) -> DateTime<Utc> {
        self.timestamp_in
    }

    pub fn timestamp_out(&self) -> Option<DateTime<Utc>> {
        self.timestamp_out
    }

    pub fn status(&self) -> AttendanceStatus {
        self.status
    }

    pub fn attendance_id(&self) -> Option<AttendanceId> {
        self.attendance_id
    }

    /// The slot this event occupies.
    pub fn key(&self) -> EventKey {
        EventKey {
            student_id: self.student_id,
            class_id: self.class_id,
        }
    }
}

/// One row of the REST attendance collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub attendance_id: AttendanceId,

    #[serde(alias = "student")]
    pub student_id: StudentId,

    /// Nullable in the backend schema.
    #[serde(default, alias = "class")]
    pub class_id: Option<ClassId>,

    #[serde(default, with = "opt_timestamp")]
    pub in_time: Option<DateTime<Utc>>,

    #[serde(default, with = "opt_timestamp")]
    pub out_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    /// The event slot of this record, if it belongs to a class.
    pub fn key(&self) -> Option<EventKey> {
        self.class_id.map(|class_id| EventKey {
            student_id: self.student_id,
            class_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T08:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T08:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 08:00:00"), Some(expected));
        assert!(parse_timestamp("2024-01-01T08:00:00.250000").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(AttendanceStatus::parse("present"), AttendanceStatus::Present);
        assert_eq!(AttendanceStatus::parse(" ABSENT "), AttendanceStatus::Absent);
        assert_eq!(AttendanceStatus::parse("late"), AttendanceStatus::Unknown);
    }

    #[test]
    fn test_record_from_backend_json() {
        let raw = r#"{
            "attendance_id": 12,
            "student_id": 9,
            "class_id": 5,
            "date": "2024-01-01",
            "in_time": "2024-01-01T08:00:00.123456",
            "out_time": null,
            "status": "Present"
        }"#;
        let record: AttendanceRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.attendance_id, AttendanceId(12));
        assert_eq!(record.student_id, StudentId(9));
        assert_eq!(record.class_id, Some(ClassId(5)));
        assert!(record.in_time.is_some());
        assert_eq!(record.out_time, None);
        assert_eq!(record.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_record_field_aliases() {
        let raw = r#"{"attendance_id": "3", "student": 4, "class": 7, "status": null}"#;
        let record: AttendanceRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.key(), Some(EventKey { student_id: StudentId(4), class_id: ClassId(7) }));
        assert_eq!(record.status, AttendanceStatus::Unknown);
        assert_eq!(record.in_time, None);
    }

    #[test]
    fn test_event_builder() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let event = AttendanceEvent::new(StudentId(1), ClassId(5), at)
            .with_status(AttendanceStatus::Present)
            .with_attendance_id(Some(AttendanceId(40)));

        assert_eq!(event.key(), EventKey { student_id: StudentId(1), class_id: ClassId(5) });
        assert_eq!(event.status(), AttendanceStatus::Present);
        assert_eq!(event.attendance_id(), Some(AttendanceId(40)));
        assert_eq!(event.timestamp_out(), None);
    }
}

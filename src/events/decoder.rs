//! Push payload decoding.

use crate::error::DecodeError;
use crate::types::{
    parse_timestamp, AttendanceEvent, AttendanceId, AttendanceStatus, ClassId, StudentId, WireId,
};
use serde::Deserialize;

/// Wire shape of one push notification. Every field is optional here so that
/// a missing required field is reported by name instead of as a serde error.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default, alias = "student", alias = "studentId")]
    student_id: Option<WireId>,
    #[serde(default, alias = "class", alias = "classId")]
    class_id: Option<WireId>,
    #[serde(default, alias = "timestamp_in", alias = "timestampIn")]
    in_time: Option<String>,
    #[serde(default, alias = "timestamp_out", alias = "timestampOut")]
    out_time: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    attendance_id: Option<WireId>,
}

/// Decode a raw push payload into an attendance event.
///
/// Unknown fields are ignored. A malformed payload is rejected as a whole.
pub fn decode_envelope(raw: &str) -> Result<AttendanceEvent, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let envelope: Envelope = serde_json::from_value(value)?;

    let student_id = required_id(envelope.student_id, "student_id")?;
    let class_id = required_id(envelope.class_id, "class_id")?;

    let in_time = envelope
        .in_time
        .filter(|s| !s.trim().is_empty())
        .ok_or(DecodeError::MissingField("in_time"))?;
    let timestamp_in = parse_timestamp(&in_time).ok_or_else(|| DecodeError::InvalidField {
        field: "in_time",
        reason: format!("unparseable timestamp {in_time:?}"),
    })?;

    let timestamp_out = match envelope.out_time.filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| DecodeError::InvalidField {
            field: "out_time",
            reason: format!("unparseable timestamp {raw:?}"),
        })?),
        None => None,
    };

    let attendance_id = match envelope.attendance_id {
        Some(raw) => Some(AttendanceId(raw.to_i64().ok_or_else(|| {
            DecodeError::InvalidField {
                field: "attendance_id",
                reason: "not an integer".to_string(),
            }
        })?)),
        None => None,
    };

    let status = envelope
        .status
        .map(|s| AttendanceStatus::parse(&s))
        .unwrap_or_default();

    Ok(AttendanceEvent::new(StudentId(student_id), ClassId(class_id), timestamp_in)
        .with_status(status)
        .with_timestamp_out(timestamp_out)
        .with_attendance_id(attendance_id))
}

fn required_id(raw: Option<WireId>, field: &'static str) -> Result<i64, DecodeError> {
    raw.ok_or(DecodeError::MissingField(field))?
        .to_i64()
        .ok_or_else(|| DecodeError::InvalidField {
            field,
            reason: "not an integer".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_decode_backend_payload() {
        let raw = r#"{"attendance_id": 17, "student_id": 9, "class_id": 5,
                      "in_time": "2024-01-01T08:00:00", "status": "Present"}"#;
        let event = decode_envelope(raw).unwrap();

        assert_eq!(event.student_id(), StudentId(9));
        assert_eq!(event.class_id(), ClassId(5));
        assert_eq!(
            event.timestamp_in(),
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(event.status(), AttendanceStatus::Present);
        assert_eq!(event.attendance_id(), Some(AttendanceId(17)));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let raw = r#"{"student_id": "9", "class_id": 5, "in_time": "2024-01-01T08:00:00Z",
                      "camera": {"id": 3}, "confidence": 0.93}"#;
        let event = decode_envelope(raw).unwrap();
        assert_eq!(event.student_id(), StudentId(9));
        assert_eq!(event.status(), AttendanceStatus::Unknown);
    }

    #[test]
    fn test_missing_required_fields() {
        assert_eq!(
            decode_envelope(r#"{"class_id": 5, "in_time": "2024-01-01T08:00:00Z"}"#),
            Err(DecodeError::MissingField("student_id"))
        );
        assert_eq!(
            decode_envelope(r#"{"student_id": 1, "in_time": "2024-01-01T08:00:00Z"}"#),
            Err(DecodeError::MissingField("class_id"))
        );
        assert_eq!(
            decode_envelope(r#"{"student_id": 1, "class_id": 5}"#),
            Err(DecodeError::MissingField("in_time"))
        );
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(decode_envelope("{not json"), Err(DecodeError::InvalidJson(_))));
        assert_eq!(decode_envelope("[1, 2, 3]"), Err(DecodeError::NotAnObject));
        assert!(matches!(
            decode_envelope(r#"{"student_id": 1, "class_id": 5, "in_time": "soon"}"#),
            Err(DecodeError::InvalidField { field: "in_time", .. })
        ));
        assert!(matches!(
            decode_envelope(r#"{"student_id": "abc", "class_id": 5, "in_time": "2024-01-01T08:00:00Z"}"#),
            Err(DecodeError::InvalidField { field: "student_id", .. })
        ));
    }

    #[test]
    fn test_camel_case_fields() {
        let raw = r#"{"studentId": 4, "classId": 7, "timestampIn": "2024-01-01T08:00:00Z"}"#;
        let event = decode_envelope(raw).unwrap();
        assert_eq!(event.key().student_id, StudentId(4));
        assert_eq!(event.key().class_id, ClassId(7));
    }

    #[test]
    fn test_out_time_decoded() {
        let raw = r#"{"student_id": 1, "class_id": 5, "in_time": "2024-01-01T08:00:00Z",
                      "out_time": "2024-01-01T09:30:00Z", "status": "absent"}"#;
        let event = decode_envelope(raw).unwrap();
        assert_eq!(
            event.timestamp_out(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap())
        );
        assert_eq!(event.status(), AttendanceStatus::Absent);
    }
}

//! Attendance event intake.
//!
//! Raw push payloads are decoded into [`AttendanceEvent`](crate::types::AttendanceEvent)s
//! and kept in bounded, deduplicating logs.

mod decoder;
mod log;

pub use decoder::decode_envelope;
pub use log::{BoundedEventLog, LogSnapshot};

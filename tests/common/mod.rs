//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use classlens_sync::{
    AttendanceId, AttendanceRecord, AttendanceStatus, ClassId, FetchError, PushTransport,
    ReportTrigger, SnapshotSource, StudentId, TransportError, ViewFilter,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// What the next `connect` does.
pub enum Session {
    /// Handshake fails.
    Refuse,
    /// Deliver payloads, then the remote closes the stream.
    Deliver(Vec<String>),
    /// Deliver payloads, then stay open silently.
    Hold(Vec<String>),
}

/// Push transport following a script. Once the script runs out every
/// connect holds an empty, open stream.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Session>>>,
    connects: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedTransport {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            script: Arc::new(Mutex::new(sessions.into())),
            connects: Arc::default(),
        }
    }

    /// When each connect attempt happened.
    pub fn connects(&self) -> Vec<Instant> {
        self.connects.lock().clone()
    }
}

impl PushTransport for ScriptedTransport {
    type Stream = BoxStream<'static, Result<String, TransportError>>;

    async fn connect(&self) -> Result<Self::Stream, TransportError> {
        self.connects.lock().push(Instant::now());
        let next = self.script.lock().pop_front();
        match next {
            Some(Session::Refuse) => Err(TransportError::Connect("connection refused".to_string())),
            Some(Session::Deliver(payloads)) => Ok(stream::iter(payloads.into_iter().map(Ok)).boxed()),
            Some(Session::Hold(payloads)) => Ok(stream::iter(payloads.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Snapshot source serving whatever rows the test put in.
#[derive(Clone)]
pub struct FakeSource {
    rows: Arc<Mutex<Result<Vec<AttendanceRecord>, FetchError>>>,
    fetches: Arc<AtomicUsize>,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self {
            rows: Arc::new(Mutex::new(Ok(Vec::new()))),
            fetches: Arc::default(),
        }
    }
}

impl FakeSource {
    pub fn with_rows(rows: Vec<AttendanceRecord>) -> Self {
        let source = Self::default();
        source.set_rows(rows);
        source
    }

    pub fn set_rows(&self, rows: Vec<AttendanceRecord>) {
        *self.rows.lock() = Ok(rows);
    }

    pub fn fail_with(&self, err: FetchError) {
        *self.rows.lock() = Err(err);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl SnapshotSource for FakeSource {
    async fn fetch(&self, _filter: &ViewFilter) -> Result<Vec<AttendanceRecord>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().clone();
        rows
    }
}

/// Counts report regeneration requests.
#[derive(Default)]
pub struct CountingTrigger {
    pub calls: AtomicUsize,
}

impl ReportTrigger for CountingTrigger {
    async fn regenerate_reports(&self) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 2024-01-01T08:00:00Z plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + ChronoDuration::minutes(minutes)
}

pub fn record(id: i64, student: i64, class: i64, minutes: i64, status: AttendanceStatus) -> AttendanceRecord {
    AttendanceRecord {
        attendance_id: AttendanceId(id),
        student_id: StudentId(student),
        class_id: Some(ClassId(class)),
        in_time: Some(at(minutes)),
        out_time: None,
        status,
    }
}

/// Push payload as the backend sends it.
pub fn payload(student: i64, class: i64, minutes: i64, status: &str) -> String {
    serde_json::json!({
        "student_id": student,
        "class_id": class,
        "in_time": at(minutes).naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "status": status,
    })
    .to_string()
}

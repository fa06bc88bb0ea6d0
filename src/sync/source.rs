//! Seams to the REST backend.

use crate::error::FetchError;
use crate::subscriptions::ViewFilter;
use crate::types::AttendanceRecord;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Supplies authoritative attendance snapshots.
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch the records `filter` covers. Implementations may return a
    /// superset; rows outside the filter are discarded.
    fn fetch(
        &self,
        filter: &ViewFilter,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>, FetchError>> + Send;
}

/// Asks the backend to regenerate its attendance reports.
pub trait ReportTrigger: Send + Sync + 'static {
    fn regenerate_reports(&self) -> impl Future<Output = Result<(), FetchError>> + Send;
}

impl<S: SnapshotSource> SnapshotSource for Arc<S> {
    fn fetch(
        &self,
        filter: &ViewFilter,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>, FetchError>> + Send {
        (**self).fetch(filter)
    }
}

impl<R: ReportTrigger> ReportTrigger for Arc<R> {
    fn regenerate_reports(&self) -> impl Future<Output = Result<(), FetchError>> + Send {
        (**self).regenerate_reports()
    }
}

/// Fire-and-forget report regeneration. Failures are logged.
pub fn spawn_report_regeneration<R: ReportTrigger>(trigger: R) -> JoinHandle<()> {
    tokio::spawn(async move {
        match trigger.regenerate_reports().await {
            Ok(()) => tracing::info!("report regeneration requested"),
            Err(err) => tracing::warn!(error = %err, "report regeneration failed"),
        }
    })
}

//! HTTP client for the attendance backend.

use crate::channel::SseTransport;
use crate::config::EndpointConfig;
use crate::error::{FetchError, Result, SyncError};
use crate::subscriptions::ViewFilter;
use crate::sync::{ReportTrigger, SnapshotSource};
use crate::types::AttendanceRecord;
use std::time::Duration;

/// REST access to `/attendance` and `/reports/generate`.
#[derive(Clone, Debug)]
pub struct HttpAttendanceApi {
    client: reqwest::Client,
    endpoints: EndpointConfig,
}

impl HttpAttendanceApi {
    /// Build a client honouring `endpoints.request_timeout`.
    pub fn new(endpoints: EndpointConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(endpoints.request_timeout)
            .build()
            .map_err(client_error)?;
        Ok(Self::with_client(client, endpoints))
    }

    pub fn with_client(client: reqwest::Client, endpoints: EndpointConfig) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    /// Push transport for the backend's event stream.
    ///
    /// Uses its own client: the request timeout would cut the stream.
    pub fn push_transport(&self) -> Result<SseTransport> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(client_error)?;
        Ok(SseTransport::with_client(client, self.endpoints.events_url()))
    }
}

fn client_error(err: reqwest::Error) -> SyncError {
    tracing::error!(error = %err, "failed to build HTTP client");
    SyncError::Configuration(format!("cannot build HTTP client: {err}"))
}

impl SnapshotSource for HttpAttendanceApi {
    async fn fetch(&self, filter: &ViewFilter) -> std::result::Result<Vec<AttendanceRecord>, FetchError> {
        let mut request = self.client.get(self.endpoints.attendance_url());
        if let Some(class_id) = filter.single_class() {
            request = request.query(&[("class_id", class_id.0)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let rows: Vec<AttendanceRecord> = response.json().await?;
        tracing::debug!(rows = rows.len(), "fetched attendance rows");
        Ok(rows.into_iter().filter(|r| filter.matches_record(r)).collect())
    }
}

impl ReportTrigger for HttpAttendanceApi {
    async fn regenerate_reports(&self) -> std::result::Result<(), FetchError> {
        let response = self
            .client
            .post(self.endpoints.reports_url())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(())
    }
}

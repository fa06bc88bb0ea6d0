//! Coordinator and endpoint configuration.

use crate::channel::{BackoffPolicy, ChannelConfig};
use crate::error::{Result, SyncError};
use crate::events::BoundedEventLog;
use crate::subscriptions::ViewFilter;
use crate::types::ClassId;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Coordinator configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Entries kept by the shared event log and by each view's log.
    pub event_log_capacity: usize,

    /// Views buffered per channel subscription before it is dropped.
    pub view_buffer_size: usize,

    /// Quiet period after the last event before refetching.
    pub debounce: Duration,

    /// Longest a burst of events can postpone a refetch.
    pub max_debounce: Duration,

    /// What the REST snapshot covers. Views project from it.
    pub snapshot_filter: ViewFilter,

    /// Retry policy for failed fetches.
    pub fetch_backoff: BackoffPolicy,

    /// Push channel tuning.
    pub channel: ChannelConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_log_capacity: BoundedEventLog::DEFAULT_CAPACITY,
            view_buffer_size: 64,
            debounce: Duration::from_millis(300),
            max_debounce: Duration::from_secs(2),
            snapshot_filter: ViewFilter::all(),
            fetch_backoff: BackoffPolicy::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_log_capacity == 0 {
            return Err(SyncError::Configuration(
                "event log capacity must be at least 1".to_string(),
            ));
        }
        if self.view_buffer_size == 0 {
            return Err(SyncError::Configuration(
                "view buffer size must be at least 1".to_string(),
            ));
        }
        if self.max_debounce < self.debounce {
            return Err(SyncError::Configuration(format!(
                "max debounce {:?} is shorter than debounce {:?}",
                self.max_debounce, self.debounce
            )));
        }
        if self.channel.buffer_size == 0 {
            return Err(SyncError::Configuration(
                "channel buffer size must be at least 1".to_string(),
            ));
        }
        self.snapshot_filter.validate()?;
        self.fetch_backoff.validate()?;
        self.channel.backoff.validate()
    }

    /// Defaults overridden by `CLASSLENS_*` environment variables.
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `CLASSLENS_EVENT_LOG_CAPACITY` | event log capacity |
    /// | `CLASSLENS_DEBOUNCE_MS` | refetch debounce |
    /// | `CLASSLENS_MAX_DEBOUNCE_MS` | refetch debounce cap |
    /// | `CLASSLENS_RECONNECT_MAX_MS` | reconnect backoff ceiling |
    /// | `CLASSLENS_IDLE_TIMEOUT_SECS` | silent connection timeout, 0 = off |
    /// | `CLASSLENS_CLASS_ID` | restrict the snapshot to one class |
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mut channel = defaults.channel.clone();
        channel.backoff.max = Duration::from_millis(try_load(
            "CLASSLENS_RECONNECT_MAX_MS",
            channel.backoff.max.as_millis() as u64,
        )?);
        let idle_secs: u64 = try_load("CLASSLENS_IDLE_TIMEOUT_SECS", 0)?;
        channel.idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

        let snapshot_filter = match env::var("CLASSLENS_CLASS_ID") {
            Ok(raw) => ViewFilter::class(ClassId(parse("CLASSLENS_CLASS_ID", &raw)?)),
            Err(_) => ViewFilter::all(),
        };

        let config = Self {
            event_log_capacity: try_load("CLASSLENS_EVENT_LOG_CAPACITY", defaults.event_log_capacity)?,
            debounce: Duration::from_millis(try_load(
                "CLASSLENS_DEBOUNCE_MS",
                defaults.debounce.as_millis() as u64,
            )?),
            max_debounce: Duration::from_millis(try_load(
                "CLASSLENS_MAX_DEBOUNCE_MS",
                defaults.max_debounce.as_millis() as u64,
            )?),
            snapshot_filter,
            channel,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}

/// Where the backend lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub api_base: String,
    pub events_path: String,
    pub attendance_path: String,
    pub reports_path: String,

    /// Per-request timeout for REST calls. Not applied to the push stream.
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:3000".to_string(),
            events_path: "/events/attendance".to_string(),
            attendance_path: "/attendance".to_string(),
            reports_path: "/reports/generate".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl EndpointConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ..Default::default()
        }
    }

    /// `CLASSLENS_API_BASE`, falling back to the local backend.
    pub fn from_env() -> Self {
        match env::var("CLASSLENS_API_BASE") {
            Ok(base) if !base.trim().is_empty() => Self::new(base.trim()),
            _ => {
                info!("CLASSLENS_API_BASE not set, using default: http://localhost:3000");
                Self::default()
            }
        }
    }

    pub fn events_url(&self) -> String {
        self.join(&self.events_path)
    }

    pub fn attendance_url(&self) -> String {
        self.join(&self.attendance_path)
    }

    pub fn reports_url(&self) -> String {
        self.join(&self.reports_path)
    }

    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn try_load<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => parse(key, &raw),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        SyncError::Configuration(format!("invalid {key}: {e}"))
    })
}

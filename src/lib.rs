//! # ClassLens Sync
//!
//! Live attendance synchronization for the ClassLens campus dashboard.
//!
//! ## Core Concepts
//!
//! - **Channel**: A reconnecting push connection delivering attendance events
//! - **Events**: Bounded, deduplicating logs of recent scans
//! - **Snapshots**: Authoritative REST state, refetched with debounce and backoff
//! - **Views**: Per-subscriber filtered projections with optimistic overlay
//!
//! ## Example
//!
//! ```ignore
//! use classlens_sync::{sync, ClassId, EndpointConfig, HttpAttendanceApi, SyncConfig, ViewFilter};
//!
//! let api = HttpAttendanceApi::new(EndpointConfig::from_env())?;
//! let handle = sync::spawn(SyncConfig::from_env()?, api.push_transport()?, api.clone())?;
//!
//! // Watch one class
//! let view = handle.subscribe(ViewFilter::class(ClassId(5)))?;
//! println!("connection: {}", view.initial.connection);
//!
//! // Ask the backend to rebuild its reports
//! sync::spawn_report_regeneration(api);
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod rest;
pub mod subscriptions;
pub mod sync;
pub mod types;

// Re-exports
pub use channel::{
    BackoffPolicy, ChannelConfig, ChannelEvent, ChannelHandle, ConnectionMachine, ConnectionState,
    PushTransport, ReconnectingChannel, SseParser, SseTransport,
};
pub use config::{EndpointConfig, SyncConfig};
pub use error::{DecodeError, FetchError, Result, SyncError, TransportError};
pub use events::{decode_envelope, BoundedEventLog, LogSnapshot};
pub use rest::HttpAttendanceApi;
pub use subscriptions::{
    DropReason, SubscriptionId, SubscriptionManager, ViewCallback, ViewEvent, ViewFilter, ViewState,
    ViewSubscription,
};
pub use sync::{
    CoordinatorHandle, FetchTicket, ReconciledSnapshot, ReportTrigger, SnapshotSource,
    SyncCoordinator, SyncSnapshot, ViewRecord,
};
pub use types::*;

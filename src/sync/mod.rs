//! Attendance synchronization.
//!
//! [`SyncCoordinator`] merges pushed events with REST snapshots and publishes
//! per-subscriber views. It is synchronous and clock-free; [`spawn`] runs it
//! on tokio together with a [`ReconnectingChannel`](crate::channel::ReconnectingChannel)
//! and a [`SnapshotSource`].
//!
//! # Example
//!
//! ```ignore
//! let endpoints = EndpointConfig::from_env();
//! let api = HttpAttendanceApi::new(endpoints.clone())?;
//! let handle = sync::spawn(SyncConfig::default(), api.push_transport()?, api)?;
//!
//! let view = handle.subscribe(ViewFilter::class(ClassId(5)))?;
//! while let Ok(ViewEvent::Update(state)) = view.recv() {
//!     println!("v{} {} recent events", state.version, state.recent_events.len());
//! }
//! ```

mod coordinator;
mod driver;
mod snapshot;
mod source;

pub use coordinator::{FetchTicket, SyncCoordinator};
pub use driver::{spawn, CoordinatorHandle};
pub use snapshot::{ReconciledSnapshot, SyncSnapshot, ViewRecord};
pub use source::{spawn_report_regeneration, ReportTrigger, SnapshotSource};

//! Coordinator core: event log, snapshot, fetch scheduling and views.
//!
//! The core does no I/O and never reads the monotonic clock. Callers pass
//! `now` in and perform the fetches it hands out, so every scheduling
//! decision can be driven deterministically. Wall-clock time is read only to
//! stamp a snapshot's `fetched_at`. [`spawn`](super::spawn) wires it to tokio.

use crate::channel::{ChannelEvent, ConnectionState};
use crate::config::SyncConfig;
use crate::error::{FetchError, Result, SyncError};
use crate::events::BoundedEventLog;
use crate::subscriptions::{
    DropReason, SubscriptionId, SubscriptionManager, ViewCallback, ViewEvent, ViewFilter,
    ViewState, ViewSubscription,
};
use crate::types::{AttendanceEvent, AttendanceRecord};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::snapshot::SyncSnapshot;

/// Permission to run one snapshot fetch.
///
/// Hand the result back through [`SyncCoordinator::complete_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    id: u64,
    filter: ViewFilter,
}

impl FetchTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// What to fetch.
    pub fn filter(&self) -> &ViewFilter {
        &self.filter
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchSchedule {
    Idle,
    /// Trailing debounce. `burst_started` bounds how far it can slide.
    Debouncing { due: Instant, burst_started: Instant },
    /// Fixed deadline: the initial fetch, or a retry after failure.
    DueAt(Instant),
    /// A ticket is out; `rerun` records that something changed meanwhile.
    InFlight { ticket: u64, rerun: bool },
}

/// Synchronous coordinator state.
pub struct SyncCoordinator {
    config: SyncConfig,
    log: BoundedEventLog,
    snapshot: Option<SyncSnapshot>,
    connection: ConnectionState,
    /// Set on a drop; the next `Open` then triggers a refetch.
    missed_while_down: bool,
    views: SubscriptionManager,
    schedule: FetchSchedule,
    /// Consecutive failed fetches.
    fetch_failures: u32,
    next_ticket: u64,
    version: u64,
    rng: StdRng,
    closed: bool,
}

impl SyncCoordinator {
    /// Create a coordinator. The initial fetch is due immediately.
    pub fn new(config: SyncConfig, now: Instant) -> Result<Self> {
        Self::with_rng(config, now, StdRng::from_os_rng())
    }

    /// Like [`new`](Self::new) with a caller-provided jitter source.
    pub fn with_rng(config: SyncConfig, now: Instant, rng: StdRng) -> Result<Self> {
        config.validate()?;
        let log = BoundedEventLog::new(config.event_log_capacity)?;
        let views = SubscriptionManager::new(config.event_log_capacity, config.view_buffer_size)?;

        Ok(Self {
            config,
            log,
            snapshot: None,
            connection: ConnectionState::Connecting,
            missed_while_down: false,
            views,
            schedule: FetchSchedule::DueAt(now),
            fetch_failures: 0,
            next_ticket: 1,
            version: 0,
            rng,
            closed: false,
        })
    }

    // --- Subscriptions ---

    /// Open a channel-backed view.
    pub fn subscribe(&mut self, filter: ViewFilter) -> Result<ViewSubscription> {
        self.ensure_open()?;
        self.views.subscribe(
            filter,
            self.log.iter(),
            self.version,
            self.snapshot.as_ref(),
            self.connection,
        )
    }

    /// Open a callback-backed view. Returns its id and initial state.
    pub fn subscribe_with<F>(&mut self, filter: ViewFilter, callback: F) -> Result<(SubscriptionId, Arc<ViewState>)>
    where
        F: FnMut(ViewEvent) + Send + 'static,
    {
        self.ensure_open()?;
        let callback: ViewCallback = Box::new(callback);
        self.views.subscribe_with(
            filter,
            self.log.iter(),
            callback,
            self.version,
            self.snapshot.as_ref(),
            self.connection,
        )
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.views.unsubscribe(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.views.subscription_count()
    }

    // --- Inputs ---

    /// Apply a delivery from the push channel.
    pub fn handle_channel_event(&mut self, event: ChannelEvent, now: Instant) -> Result<()> {
        match event {
            ChannelEvent::State(state) => self.set_connection_state(state, now),
            ChannelEvent::Event(event) => self.ingest(event, now).map(|_| ()),
        }
    }

    /// Ingest a pushed event.
    ///
    /// Returns false for duplicates and for events older than what the shared
    /// log or any view still holds for the slot; those change nothing and
    /// schedule nothing.
    pub fn ingest(&mut self, event: AttendanceEvent, now: Instant) -> Result<bool> {
        self.ensure_open()?;
        let superseded = self
            .views
            .newest_retained(&event.key())
            .is_some_and(|held| held.timestamp_in() > event.timestamp_in());
        if superseded || !self.log.ingest(event.clone()) {
            debug!(key = ?event.key(), "ignoring duplicate or stale event");
            return Ok(false);
        }

        let changed = self.views.route_event(&event);
        if !changed.is_empty() {
            self.version += 1;
            self.views
                .publish_to(&changed, self.version, self.snapshot.as_ref(), self.connection);
        }
        self.request_refetch(now);
        Ok(true)
    }

    /// Record a connection state change and republish.
    ///
    /// Returning to `Open` after a drop schedules a refetch, since events may
    /// have been missed while disconnected.
    pub fn set_connection_state(&mut self, state: ConnectionState, now: Instant) -> Result<()> {
        self.ensure_open()?;
        if state == self.connection {
            return Ok(());
        }

        match state {
            ConnectionState::Reconnecting { .. } => self.missed_while_down = true,
            ConnectionState::Open if self.missed_while_down => {
                self.missed_while_down = false;
                info!("push channel reopened, refreshing snapshot");
                self.request_refetch(now);
            }
            _ => {}
        }

        self.connection = state;
        self.publish_all();
        Ok(())
    }

    /// Ask for a refetch as if an event had arrived.
    pub fn request_refresh(&mut self, now: Instant) -> Result<()> {
        self.ensure_open()?;
        self.request_refetch(now);
        Ok(())
    }

    // --- Fetching ---

    /// Hand out a fetch ticket if one is due.
    pub fn poll_fetch(&mut self, now: Instant) -> Option<FetchTicket> {
        if self.closed {
            return None;
        }
        let due = match self.schedule {
            FetchSchedule::Debouncing { due, .. } | FetchSchedule::DueAt(due) => due,
            FetchSchedule::Idle | FetchSchedule::InFlight { .. } => return None,
        };
        if due > now {
            return None;
        }

        let id = self.next_ticket;
        self.next_ticket += 1;
        self.schedule = FetchSchedule::InFlight {
            ticket: id,
            rerun: false,
        };
        debug!(ticket = id, "snapshot fetch started");
        Some(FetchTicket {
            id,
            filter: self.config.snapshot_filter.clone(),
        })
    }

    /// Apply the outcome of a fetch.
    ///
    /// Results for a ticket that is no longer current, or arriving after
    /// teardown, are discarded.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: std::result::Result<Vec<AttendanceRecord>, FetchError>,
        now: Instant,
    ) {
        if self.closed {
            debug!(ticket = ticket.id, "discarding fetch result after teardown");
            return;
        }
        let rerun = match self.schedule {
            FetchSchedule::InFlight { ticket: current, rerun } if current == ticket.id => rerun,
            _ => {
                debug!(ticket = ticket.id, "discarding superseded fetch result");
                return;
            }
        };

        match result {
            Ok(rows) => {
                let snapshot = SyncSnapshot::new(ticket.filter, rows, Utc::now());
                info!(records = snapshot.len(), "snapshot refreshed");
                self.snapshot = Some(snapshot);
                self.fetch_failures = 0;
                self.schedule = if rerun {
                    FetchSchedule::Debouncing {
                        due: now + self.config.debounce,
                        burst_started: now,
                    }
                } else {
                    FetchSchedule::Idle
                };
                self.publish_all();
            }
            Err(err) => {
                self.fetch_failures = self.fetch_failures.saturating_add(1);
                let delay = self.config.fetch_backoff.delay(self.fetch_failures, &mut self.rng);
                warn!(error = %err, attempt = self.fetch_failures, ?delay, "snapshot fetch failed");
                self.schedule = FetchSchedule::DueAt(now + delay);
                if self.snapshot.as_mut().is_some_and(|s| s.mark_stale()) {
                    self.publish_all();
                }
            }
        }
    }

    /// When the next fetch becomes due, if one is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.schedule {
            FetchSchedule::Debouncing { due, .. } | FetchSchedule::DueAt(due) => Some(due),
            FetchSchedule::Idle | FetchSchedule::InFlight { .. } => None,
        }
    }

    pub fn fetch_in_flight(&self) -> bool {
        matches!(self.schedule, FetchSchedule::InFlight { .. })
    }

    // --- Queries ---

    pub fn snapshot(&self) -> Option<&SyncSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Shared event log, newest first.
    pub fn recent_events(&mut self) -> crate::events::LogSnapshot {
        self.log.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // --- Teardown ---

    /// Detach every view and discard the snapshot. Later inputs fail with
    /// [`SyncError::Closed`]; later fetch results are ignored. Idempotent.
    pub fn teardown(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        self.schedule = FetchSchedule::Idle;
        self.snapshot = None;
        self.connection = ConnectionState::Closed;
        self.views.close_all(DropReason::CoordinatorClosed);
        info!("sync coordinator torn down");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    fn request_refetch(&mut self, now: Instant) {
        self.schedule = match self.schedule {
            FetchSchedule::Idle => FetchSchedule::Debouncing {
                due: now + self.config.debounce,
                burst_started: now,
            },
            FetchSchedule::Debouncing { burst_started, .. } => FetchSchedule::Debouncing {
                due: (now + self.config.debounce).min(burst_started + self.config.max_debounce),
                burst_started,
            },
            FetchSchedule::InFlight { ticket, .. } => FetchSchedule::InFlight { ticket, rerun: true },
            fixed @ FetchSchedule::DueAt(_) => fixed,
        };
    }

    fn publish_all(&mut self) {
        self.version += 1;
        self.views
            .publish_all(self.version, self.snapshot.as_ref(), self.connection);
    }
}

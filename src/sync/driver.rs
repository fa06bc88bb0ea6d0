//! Tokio driver for [`SyncCoordinator`].

use crate::channel::{ChannelEvent, ChannelHandle, ConnectionState, PushTransport, ReconnectingChannel};
use crate::config::SyncConfig;
use crate::error::{FetchError, Result};
use crate::subscriptions::{SubscriptionId, ViewEvent, ViewFilter, ViewState, ViewSubscription};
use crate::types::AttendanceRecord;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::coordinator::{FetchTicket, SyncCoordinator};
use super::snapshot::SyncSnapshot;
use super::source::SnapshotSource;

type Fetched = (FetchTicket, std::result::Result<Vec<AttendanceRecord>, FetchError>);

/// Start a coordinator with its push channel on the current tokio runtime.
///
/// The initial snapshot fetch starts right away. Must be called from within
/// a runtime.
pub fn spawn<T, S>(config: SyncConfig, transport: T, source: S) -> Result<CoordinatorHandle>
where
    T: PushTransport,
    S: SnapshotSource,
{
    let core = SyncCoordinator::new(config.clone(), Instant::now())?;
    let (channel, events) = ReconnectingChannel::spawn(transport, config.channel)?;

    let core = Arc::new(Mutex::new(core));
    let cancel = CancellationToken::new();
    let wake = Arc::new(Notify::new());

    let task = tokio::spawn(drive(
        Arc::clone(&core),
        channel,
        events,
        Arc::new(source),
        cancel.clone(),
        Arc::clone(&wake),
    ));

    Ok(CoordinatorHandle {
        core,
        cancel,
        wake,
        task: Some(task),
    })
}

async fn drive<S: SnapshotSource>(
    core: Arc<Mutex<SyncCoordinator>>,
    channel: ChannelHandle,
    mut events: mpsc::Receiver<ChannelEvent>,
    source: Arc<S>,
    cancel: CancellationToken,
    wake: Arc<Notify>,
) {
    let mut fetches: FuturesUnordered<BoxFuture<'static, Fetched>> = FuturesUnordered::new();

    loop {
        let deadline = {
            let mut core = core.lock();
            if let Some(ticket) = core.poll_fetch(Instant::now()) {
                fetches.push(fetch(Arc::clone(&source), ticket));
            }
            core.next_deadline()
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            delivery = events.recv() => match delivery {
                Some(event) => {
                    let handled = core.lock().handle_channel_event(event, Instant::now());
                    if let Err(err) = handled {
                        debug!(error = %err, "coordinator closed, stopping driver");
                        break;
                    }
                }
                None => {
                    debug!("push channel ended");
                    break;
                }
            },
            Some((ticket, result)) = fetches.next(), if !fetches.is_empty() => {
                core.lock().complete_fetch(ticket, result, Instant::now());
            }
            _ = sleep_until(deadline) => {}
            _ = wake.notified() => {}
        }
    }

    core.lock().teardown();
    channel.close().await;
    debug!("sync driver stopped");
}

fn fetch<S: SnapshotSource>(source: Arc<S>, ticket: FetchTicket) -> BoxFuture<'static, Fetched> {
    Box::pin(async move {
        let result = source.fetch(ticket.filter()).await;
        (ticket, result)
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle to a running coordinator. Dropping it tears the coordinator down.
///
/// Callback subscriptions run on the driver task while the coordinator is
/// locked; they must not call back into the handle.
pub struct CoordinatorHandle {
    core: Arc<Mutex<SyncCoordinator>>,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl CoordinatorHandle {
    pub fn subscribe(&self, filter: ViewFilter) -> Result<ViewSubscription> {
        self.core.lock().subscribe(filter)
    }

    pub fn subscribe_with<F>(&self, filter: ViewFilter, callback: F) -> Result<(SubscriptionId, Arc<ViewState>)>
    where
        F: FnMut(ViewEvent) + Send + 'static,
    {
        self.core.lock().subscribe_with(filter, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.lock().unsubscribe(id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.lock().connection_state()
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> Option<SyncSnapshot> {
        self.core.lock().snapshot().cloned()
    }

    /// Schedule a refetch, subject to the usual debounce.
    pub fn refresh(&self) -> Result<()> {
        self.core.lock().request_refresh(Instant::now())?;
        self.wake.notify_one();
        Ok(())
    }

    /// Stop the driver and push channel. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Shut down and wait until teardown has completed.
    pub async fn close(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "sync driver task failed");
            }
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

//! Reconnecting push channel.

use super::backoff::BackoffPolicy;
use super::state::{ConnectionMachine, ConnectionState};
use crate::error::{Result, TransportError};
use crate::events::decode_envelope;
use crate::types::AttendanceEvent;
use futures_util::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A source of raw push payloads.
///
/// `connect` performs the handshake and yields a stream of text payloads, one
/// notification each. The stream ending or yielding an error counts as a drop.
pub trait PushTransport: Send + Sync + 'static {
    type Stream: Stream<Item = std::result::Result<String, TransportError>> + Send + Unpin + 'static;

    fn connect(
        &self,
    ) -> impl Future<Output = std::result::Result<Self::Stream, TransportError>> + Send;
}

/// What the channel delivers to its consumer.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// The connection changed state.
    State(ConnectionState),
    /// A decoded attendance notification.
    Event(AttendanceEvent),
}

/// Channel tuning.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Reconnect backoff.
    pub backoff: BackoffPolicy,

    /// Treat a connection silent for this long as dropped (None = never).
    pub idle_timeout: Option<Duration>,

    /// Buffered deliveries before the channel waits for its consumer.
    pub buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            idle_timeout: None,
            buffer_size: 256,
        }
    }
}

/// Owns the push connection: connects, detects drops, reconnects with
/// backoff, and forwards decoded events in the order they arrive.
pub struct ReconnectingChannel<T: PushTransport> {
    transport: T,
    machine: ConnectionMachine,
    idle_timeout: Option<Duration>,
    rng: StdRng,
    events: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
}

/// Why a connected session ended.
enum SessionEnd {
    /// Transport dropped; reconnect.
    Dropped(TransportError),
    /// Shut down or consumer gone; stop.
    Stopped,
}

impl<T: PushTransport> ReconnectingChannel<T> {
    /// Spawn the channel on the current tokio runtime.
    ///
    /// Returns a handle for shutdown and the receiver of channel events. The
    /// first delivery is always `State(Connecting)`.
    pub fn spawn(
        transport: T,
        config: ChannelConfig,
    ) -> Result<(ChannelHandle, mpsc::Receiver<ChannelEvent>)> {
        Self::spawn_with_rng(transport, config, StdRng::from_os_rng())
    }

    /// Like [`spawn`](Self::spawn) with a caller-provided jitter source.
    pub fn spawn_with_rng(
        transport: T,
        config: ChannelConfig,
        rng: StdRng,
    ) -> Result<(ChannelHandle, mpsc::Receiver<ChannelEvent>)> {
        config.backoff.validate()?;
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
        let cancel = CancellationToken::new();

        let channel = Self {
            transport,
            machine: ConnectionMachine::new(config.backoff),
            idle_timeout: config.idle_timeout,
            rng,
            events: tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(channel.run());

        Ok((ChannelHandle { cancel, task: Some(task) }, rx))
    }

    async fn run(mut self) {
        if !self.emit(ChannelEvent::State(self.machine.state())).await {
            return self.finish();
        }

        loop {
            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                res = self.transport.connect() => res,
            };

            match connected {
                Ok(stream) => {
                    if let Some(state) = self.machine.opened() {
                        info!("push channel open");
                        if !self.emit(ChannelEvent::State(state)).await {
                            break;
                        }
                    }
                    match self.session(stream).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Dropped(err) => warn!(error = %err, "push channel dropped"),
                    }
                }
                Err(err) => warn!(error = %err, "push channel connect failed"),
            }

            let Some((state, delay)) = self.machine.dropped(Instant::now(), &mut self.rng) else {
                break;
            };
            info!(?delay, attempt = self.machine.attempt(), "push channel reconnecting");
            if !self.emit(ChannelEvent::State(state)).await {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(state) = self.machine.retry() {
                if !self.emit(ChannelEvent::State(state)).await {
                    break;
                }
            }
        }

        self.finish();
    }

    /// Pump one connected stream until it drops or the channel stops.
    async fn session(&mut self, mut stream: T::Stream) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                item = Self::next_item(&mut stream, self.idle_timeout) => item,
            };

            match next {
                Some(Ok(payload)) => match decode_envelope(&payload) {
                    Ok(event) => {
                        if !self.emit(ChannelEvent::Event(event)).await {
                            return SessionEnd::Stopped;
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping malformed attendance payload"),
                },
                Some(Err(err)) => return SessionEnd::Dropped(err),
                None => {
                    return SessionEnd::Dropped(TransportError::Stream(
                        "stream closed by remote".to_string(),
                    ))
                }
            }
        }
    }

    async fn next_item(
        stream: &mut T::Stream,
        idle_timeout: Option<Duration>,
    ) -> Option<std::result::Result<String, TransportError>> {
        match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(item) => item,
                Err(_) => Some(Err(TransportError::IdleTimeout(limit))),
            },
            None => stream.next().await,
        }
    }

    /// Deliver to the consumer. False once shut down or the consumer is gone.
    async fn emit(&self, event: ChannelEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    fn finish(&mut self) {
        if let Some(state) = self.machine.close() {
            // Best effort: the consumer may already be gone or full.
            let _ = self.events.try_send(ChannelEvent::State(state));
        }
        debug!("push channel stopped");
    }
}

/// Handle to a running [`ReconnectingChannel`]. Dropping it shuts the channel down.
pub struct ChannelHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Stop the channel from any state. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Shut down and wait for the channel task to exit.
    pub async fn close(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "push channel task failed");
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

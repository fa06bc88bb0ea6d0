//! Connection state machine.

use super::backoff::BackoffPolicy;
use rand::Rng;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle of the push connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,

    /// Connected and delivering.
    Open,

    /// Waiting out a backoff delay before the next connect.
    Reconnecting { attempt: u32, next_retry_at: Instant },

    /// Shut down. Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Open => f.write_str("open"),
            ConnectionState::Reconnecting { attempt, .. } => {
                write!(f, "reconnecting (attempt {attempt})")
            }
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

/// Explicit state machine for the push connection.
///
/// Transitions are the only way the state changes. Each transition method
/// returns the new state, or `None` when the transition does not apply in the
/// current state (which leaves it untouched).
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    /// Consecutive failures since the last successful open.
    attempt: u32,
    policy: BackoffPolicy,
}

impl ConnectionMachine {
    /// Starts in `Connecting`.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Connecting,
            attempt: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// `Connecting -> Open`. Resets the attempt counter.
    pub fn opened(&mut self) -> Option<ConnectionState> {
        match self.state {
            ConnectionState::Connecting => {
                self.attempt = 0;
                Some(self.set(ConnectionState::Open))
            }
            _ => None,
        }
    }

    /// `Open | Connecting -> Reconnecting` after a drop or failed connect.
    ///
    /// Returns the new state together with the delay to wait before
    /// reconnecting.
    pub fn dropped<R: Rng + ?Sized>(
        &mut self,
        now: Instant,
        rng: &mut R,
    ) -> Option<(ConnectionState, Duration)> {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.attempt = self.attempt.saturating_add(1);
                let delay = self.policy.delay(self.attempt, rng);
                let state = self.set(ConnectionState::Reconnecting {
                    attempt: self.attempt,
                    next_retry_at: now + delay,
                });
                Some((state, delay))
            }
            _ => None,
        }
    }

    /// `Reconnecting -> Connecting` once the backoff delay has elapsed.
    pub fn retry(&mut self) -> Option<ConnectionState> {
        match self.state {
            ConnectionState::Reconnecting { .. } => Some(self.set(ConnectionState::Connecting)),
            _ => None,
        }
    }

    /// Any state `-> Closed`. `None` if already closed.
    pub fn close(&mut self) -> Option<ConnectionState> {
        match self.state {
            ConnectionState::Closed => None,
            _ => Some(self.set(ConnectionState::Closed)),
        }
    }

    fn set(&mut self, next: ConnectionState) -> ConnectionState {
        tracing::debug!(from = %self.state, to = %next, "connection state transition");
        self.state = next;
        next
    }
}

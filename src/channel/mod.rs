//! Push channel lifecycle.
//!
//! The push connection is modelled as an explicit state machine
//! ([`ConnectionMachine`]) driven by [`ReconnectingChannel`], so reconnection
//! policy can be exercised without a network. [`SseTransport`] is the
//! production transport for the backend's `/events/attendance` stream.

mod backoff;
mod reconnecting;
mod sse;
mod state;

pub use backoff::BackoffPolicy;
pub use reconnecting::{ChannelConfig, ChannelEvent, ChannelHandle, PushTransport, ReconnectingChannel};
pub use sse::{SseParser, SseTransport};
pub use state::{ConnectionMachine, ConnectionState};

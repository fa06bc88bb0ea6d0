//! Live attendance views.
//!
//! Each subscription has its own filter and its own rolling event log, and
//! receives a fresh [`ViewState`] whenever something it can see changes:
//! - a pushed event matching its filter
//! - a new REST snapshot
//! - a push connection state change
//!
//! Channel subscriptions use bounded buffers; a subscriber that falls behind
//! is dropped with [`DropReason::BufferOverflow`].
//!
//! # Example
//!
//! ```ignore
//! let view = handle.subscribe(ViewFilter::class(ClassId(5)))?;
//! render(&view.initial);
//!
//! loop {
//!     match view.recv() {
//!         Ok(ViewEvent::Update(state)) => render(&state),
//!         Ok(ViewEvent::Dropped { reason }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::{SubscriptionManager, ViewCallback};
pub use types::{DropReason, SubscriptionId, ViewEvent, ViewFilter, ViewState, ViewSubscription};

//! Subscription types for live attendance views.

use crate::channel::ConnectionState;
use crate::error::{Result, SyncError};
use crate::events::LogSnapshot;
use crate::sync::ReconciledSnapshot;
use crate::types::{AttendanceEvent, AttendanceRecord, ClassId, StudentId};
use std::sync::Arc;

/// Filter criteria for a view.
///
/// `None` on a dimension means "no restriction". An empty list is rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewFilter {
    /// Only these classes.
    pub class_ids: Option<Vec<ClassId>>,

    /// Only these students.
    pub student_ids: Option<Vec<StudentId>>,
}

impl ViewFilter {
    /// Everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// A single class.
    pub fn class(class_id: ClassId) -> Self {
        Self {
            class_ids: Some(vec![class_id]),
            ..Default::default()
        }
    }

    /// Any of several classes.
    pub fn classes(class_ids: Vec<ClassId>) -> Self {
        Self {
            class_ids: Some(class_ids),
            ..Default::default()
        }
    }

    /// A single student, across classes.
    pub fn student(student_id: StudentId) -> Self {
        Self {
            student_ids: Some(vec![student_id]),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(&self.class_ids, Some(ids) if ids.is_empty()) {
            return Err(SyncError::Configuration(
                "class filter must name at least one class".to_string(),
            ));
        }
        if matches!(&self.student_ids, Some(ids) if ids.is_empty()) {
            return Err(SyncError::Configuration(
                "student filter must name at least one student".to_string(),
            ));
        }
        Ok(())
    }

    /// The single class this filter is restricted to, if any.
    pub fn single_class(&self) -> Option<ClassId> {
        match self.class_ids.as_deref() {
            Some([only]) => Some(*only),
            _ => None,
        }
    }

    pub fn matches_event(&self, event: &AttendanceEvent) -> bool {
        self.matches(Some(event.class_id()), event.student_id())
    }

    /// Records without a class only pass a filter with no class restriction.
    pub fn matches_record(&self, record: &AttendanceRecord) -> bool {
        self.matches(record.class_id, record.student_id)
    }

    fn matches(&self, class_id: Option<ClassId>, student_id: StudentId) -> bool {
        if let Some(ref classes) = self.class_ids {
            match class_id {
                Some(class_id) if classes.contains(&class_id) => {}
                _ => return false,
            }
        }
        if let Some(ref students) = self.student_ids {
            if !students.contains(&student_id) {
                return false;
            }
        }
        true
    }
}

/// What a subscriber sees.
#[derive(Clone, Debug)]
pub struct ViewState {
    /// Publication counter. Strictly increasing across deliveries.
    pub version: u64,

    /// Reconciled REST snapshot, `None` until the first successful fetch.
    pub snapshot: Option<ReconciledSnapshot>,

    /// Recent events matching the view's filter, newest first.
    pub recent_events: LogSnapshot,

    /// State of the shared push connection.
    pub connection: ConnectionState,
}

/// Events delivered to a subscription.
#[derive(Clone, Debug)]
pub enum ViewEvent {
    /// A new view was published.
    Update(Arc<ViewState>),

    /// The subscription was dropped. No further events follow.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// The coordinator was torn down.
    CoordinatorClosed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handle to a channel-backed subscription.
pub struct ViewSubscription {
    pub id: SubscriptionId,

    /// The view as of subscribing.
    pub initial: Arc<ViewState>,

    /// Channel to receive later views.
    pub receiver: crossbeam_channel::Receiver<ViewEvent>,
}

impl ViewSubscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<ViewEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<ViewEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<ViewEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything pending and return the newest published view, if any.
    pub fn latest(&self) -> Option<Arc<ViewState>> {
        self.receiver
            .try_iter()
            .filter_map(|event| match event {
                ViewEvent::Update(view) => Some(view),
                ViewEvent::Dropped { .. } => None,
            })
            .last()
    }
}

//! Subscription manager for publishing attendance views.

use crate::channel::ConnectionState;
use crate::error::{Result, SyncError};
use crate::events::BoundedEventLog;
use crate::sync::SyncSnapshot;
use crate::types::{AttendanceEvent, EventKey};
use crossbeam_channel::{bounded, Sender};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::types::{DropReason, SubscriptionId, ViewEvent, ViewFilter, ViewState, ViewSubscription};

/// Callback invoked with each event of a callback subscription.
pub type ViewCallback = Box<dyn FnMut(ViewEvent) + Send + 'static>;

/// Where a subscription's views go.
enum Sink {
    Channel(Sender<ViewEvent>),
    Callback(ViewCallback),
}

/// Internal subscription state.
struct Subscription {
    filter: ViewFilter,
    /// Recent events matching `filter`.
    log: BoundedEventLog,
    sink: Sink,
}

impl Subscription {
    /// Deliver an event. Returns false if the subscriber should be dropped.
    fn deliver(&mut self, event: ViewEvent) -> bool {
        match &mut self.sink {
            Sink::Channel(sender) => sender.try_send(event).is_ok(),
            Sink::Callback(callback) => {
                (*callback)(event);
                true
            }
        }
    }

    fn view(&mut self, version: u64, snapshot: Option<&SyncSnapshot>, connection: ConnectionState) -> ViewState {
        let recent_events = self.log.snapshot();
        ViewState {
            version,
            snapshot: snapshot.map(|s| s.reconcile(&self.filter, recent_events.as_slice())),
            recent_events,
            connection,
        }
    }
}

/// Owns every subscription and its private event log.
///
/// Not internally synchronized; the coordinator serializes access.
pub struct SubscriptionManager {
    /// Active subscriptions by ID, in subscription order.
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    /// Counter for generating subscription IDs.
    next_id: u64,
    log_capacity: usize,
    buffer_size: usize,
}

impl SubscriptionManager {
    pub fn new(log_capacity: usize, buffer_size: usize) -> Result<Self> {
        // Fail here rather than on the first subscribe.
        BoundedEventLog::new(log_capacity)?;
        if buffer_size == 0 {
            return Err(SyncError::Configuration(
                "view buffer size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            subscriptions: BTreeMap::new(),
            next_id: 1,
            log_capacity,
            buffer_size,
        })
    }

    /// Register a channel subscription.
    ///
    /// `shared` holds the coordinator's recent events, newest first. Those
    /// matching the filter, plus older slots still held by other views,
    /// pre-populate the view's log. The initial view is returned in the
    /// handle rather than sent.
    pub fn subscribe<'a>(
        &mut self,
        filter: ViewFilter,
        shared: impl IntoIterator<Item = &'a AttendanceEvent>,
        version: u64,
        snapshot: Option<&SyncSnapshot>,
        connection: ConnectionState,
    ) -> Result<ViewSubscription> {
        let (sender, receiver) = bounded(self.buffer_size);
        let (id, initial) = self.insert(filter, shared, Sink::Channel(sender), version, snapshot, connection)?;
        Ok(ViewSubscription {
            id,
            initial,
            receiver,
        })
    }

    /// Register a callback subscription. The callback is not invoked for the
    /// initial view, which is returned instead.
    pub fn subscribe_with<'a>(
        &mut self,
        filter: ViewFilter,
        shared: impl IntoIterator<Item = &'a AttendanceEvent>,
        callback: ViewCallback,
        version: u64,
        snapshot: Option<&SyncSnapshot>,
        connection: ConnectionState,
    ) -> Result<(SubscriptionId, Arc<ViewState>)> {
        self.insert(filter, shared, Sink::Callback(callback), version, snapshot, connection)
    }

    fn insert<'a>(
        &mut self,
        filter: ViewFilter,
        shared: impl IntoIterator<Item = &'a AttendanceEvent>,
        sink: Sink,
        version: u64,
        snapshot: Option<&SyncSnapshot>,
        connection: ConnectionState,
    ) -> Result<(SubscriptionId, Arc<ViewState>)> {
        filter.validate()?;
        let mut log = BoundedEventLog::new(self.log_capacity)?;
        // Oldest first so the log ends up in the same order.
        for event in self.seed(&filter, shared).into_iter().rev() {
            log.ingest(event);
        }

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let mut subscription = Subscription { filter, log, sink };
        let initial = Arc::new(subscription.view(version, snapshot, connection));
        self.subscriptions.insert(id, subscription);
        tracing::debug!(subscription = id.0, "view subscribed");

        Ok((id, initial))
    }

    /// Known events matching `filter`, newest first.
    ///
    /// The shared log holds the newest entry of every slot it still has.
    /// Slots it has evicted may survive in other views' logs; those are older
    /// than anything shared and go last, newest `timestamp_in` per slot.
    fn seed<'a>(
        &self,
        filter: &ViewFilter,
        shared: impl IntoIterator<Item = &'a AttendanceEvent>,
    ) -> Vec<AttendanceEvent> {
        let mut seed: Vec<AttendanceEvent> = shared
            .into_iter()
            .filter(|e| filter.matches_event(e))
            .cloned()
            .collect();
        let covered: HashSet<EventKey> = seed.iter().map(|e| e.key()).collect();

        let mut retained: HashMap<EventKey, &AttendanceEvent> = HashMap::new();
        for event in self
            .subscriptions
            .values()
            .flat_map(|sub| sub.log.iter())
            .filter(|e| filter.matches_event(e) && !covered.contains(&e.key()))
        {
            retained
                .entry(event.key())
                .and_modify(|held| {
                    if event.timestamp_in() > held.timestamp_in() {
                        *held = event;
                    }
                })
                .or_insert(event);
        }
        let mut retained: Vec<&AttendanceEvent> = retained.into_values().collect();
        retained.sort_by(|a, b| b.timestamp_in().cmp(&a.timestamp_in()).then(b.key().cmp(&a.key())));

        seed.extend(retained.into_iter().cloned());
        seed.truncate(self.log_capacity);
        seed
    }

    /// Newest entry any view still holds for a slot.
    pub fn newest_retained(&self, key: &EventKey) -> Option<&AttendanceEvent> {
        self.subscriptions
            .values()
            .filter_map(|sub| sub.log.get(key))
            .max_by_key(|e| e.timestamp_in())
    }

    /// Detach a subscription. No further events are delivered to it.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.remove(&id).is_some();
        if removed {
            tracing::debug!(subscription = id.0, "view unsubscribed");
        }
        removed
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Feed an event into the logs of matching subscriptions.
    ///
    /// Returns the subscriptions whose log changed.
    pub fn route_event(&mut self, event: &AttendanceEvent) -> Vec<SubscriptionId> {
        self.subscriptions
            .iter_mut()
            .filter(|(_, sub)| sub.filter.matches_event(event))
            .filter_map(|(id, sub)| sub.log.ingest(event.clone()).then_some(*id))
            .collect()
    }

    // --- Publishing ---

    /// Publish a fresh view to every subscription.
    pub fn publish_all(&mut self, version: u64, snapshot: Option<&SyncSnapshot>, connection: ConnectionState) {
        self.publish(|_| true, version, snapshot, connection);
    }

    /// Publish a fresh view to the given subscriptions only.
    pub fn publish_to(
        &mut self,
        ids: &[SubscriptionId],
        version: u64,
        snapshot: Option<&SyncSnapshot>,
        connection: ConnectionState,
    ) {
        self.publish(|id| ids.contains(&id), version, snapshot, connection);
    }

    /// Internal publish helper. Drops subscribers that fail to receive.
    fn publish<F>(&mut self, select: F, version: u64, snapshot: Option<&SyncSnapshot>, connection: ConnectionState)
    where
        F: Fn(SubscriptionId) -> bool,
    {
        let mut to_remove = Vec::new();

        for (id, sub) in self.subscriptions.iter_mut() {
            if !select(*id) {
                continue;
            }
            let view = Arc::new(sub.view(version, snapshot, connection));
            if !sub.deliver(ViewEvent::Update(view)) {
                to_remove.push(*id);
            }
        }

        for id in to_remove {
            if let Some(mut sub) = self.subscriptions.remove(&id) {
                tracing::warn!(subscription = id.0, "dropping slow view subscriber");
                // Best effort: the buffer is likely still full.
                sub.deliver(ViewEvent::Dropped {
                    reason: DropReason::BufferOverflow,
                });
            }
        }
    }

    /// Drop every subscription, telling each one why.
    pub fn close_all(&mut self, reason: DropReason) {
        for (_, mut sub) in std::mem::take(&mut self.subscriptions) {
            sub.deliver(ViewEvent::Dropped {
                reason: reason.clone(),
            });
        }
    }
}

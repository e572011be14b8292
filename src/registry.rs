//! Registry of active subscriptions, keyed by owning connection.

use crate::cancel::{CancelToken, DoneSignal};
use crate::error::{Result, ValidationError, WatchError};
use crate::sink::DeliverySink;
use crate::types::{
    ConnectionId, Delivery, SubscriptionInfo, SubscriptionRequest, SubscriptionState, Variables,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One registered subscription.
///
/// Shared between the registry (which owns its lifecycle) and the
/// forwarding loop (which drains results into its sink).
pub struct Subscription {
    id: String,
    query: String,
    operation_name: Option<String>,
    variables: Variables,
    owner: ConnectionId,
    sink: Arc<dyn DeliverySink>,
    done: DoneSignal,
    state: Mutex<SubscriptionState>,
    /// Set by whichever start path gets there first; guarantees at most one
    /// forwarding loop per subscription.
    claimed: AtomicBool,
    /// Serializes deliveries against unregistration: once `retire` has
    /// fired the done-signal and taken this lock, no later delivery can
    /// pass the cancellation check.
    delivery_gate: Mutex<()>,
}

impl Subscription {
    fn new(owner: ConnectionId, request: SubscriptionRequest, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            id: request.id,
            query: request.query,
            operation_name: request.operation_name,
            variables: request.variables,
            owner,
            sink,
            done: DoneSignal::new(),
            state: Mutex::new(SubscriptionState::Pending),
            claimed: AtomicBool::new(false),
            delivery_gate: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// The subscription's termination signal.
    pub fn done(&self) -> &DoneSignal {
        &self.done
    }

    pub(crate) fn claim_start(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self) {
        *self.state.lock() = SubscriptionState::Running;
    }

    pub(crate) fn terminate(&self) {
        *self.state.lock() = SubscriptionState::Terminated;
    }

    /// Deliver one payload unless the execution has been cancelled.
    ///
    /// The cancellation check happens under the delivery gate, so a
    /// delivery can never start after `retire` returned. Returns false if
    /// the delivery was suppressed or the sink is gone.
    pub(crate) fn deliver(&self, token: &CancelToken, delivery: Delivery) -> bool {
        let _gate = self.delivery_gate.lock();
        if token.is_cancelled() {
            return false;
        }
        self.sink.deliver(delivery).is_ok()
    }

    /// Fire the done-signal (exactly once) and wait out any in-flight
    /// delivery. After this returns, nothing further reaches the sink.
    fn retire(&self) {
        self.done.fire();
        drop(self.delivery_gate.lock());
    }

    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id.clone(),
            query: self.query.clone(),
            operation_name: self.operation_name.clone(),
            state: self.state(),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .finish()
    }
}

/// Thread-safe mapping from connection identity to its active
/// subscriptions.
///
/// All mutation happens under one exclusive lock; listener notification and
/// done-signal firing happen after the lock is released so a slow listener
/// or an in-flight delivery cannot stall registration.
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, HashMap<String, Arc<Subscription>>>>,
    listeners: Mutex<Vec<Sender<Arc<Subscription>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Validate and insert a subscription.
    ///
    /// A request with an id already present in the owner's set is rejected
    /// without side effects. On success every listener is notified
    /// out-of-band with the new entry.
    pub fn register(
        &self,
        owner: ConnectionId,
        request: SubscriptionRequest,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<Arc<Subscription>> {
        self.register_inner(owner, request, sink, false)
    }

    /// Register with the start claim already taken, so listeners observe
    /// the entry but leave starting it to the caller.
    pub(crate) fn register_claimed(
        &self,
        owner: ConnectionId,
        request: SubscriptionRequest,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<Arc<Subscription>> {
        self.register_inner(owner, request, sink, true)
    }

    fn register_inner(
        &self,
        owner: ConnectionId,
        request: SubscriptionRequest,
        sink: Arc<dyn DeliverySink>,
        claimed: bool,
    ) -> Result<Arc<Subscription>> {
        let mut violations = Vec::new();
        if request.id.is_empty() {
            violations.push(ValidationError::EmptyId);
        }
        if request.query.is_empty() {
            violations.push(ValidationError::EmptyQuery);
        }
        if !violations.is_empty() {
            return Err(WatchError::Invalid(violations));
        }

        let subscription = {
            let mut connections = self.connections.write();
            if connections
                .get(&owner)
                .map_or(false, |subs| subs.contains_key(&request.id))
            {
                return Err(WatchError::DuplicateSubscription {
                    owner,
                    id: request.id,
                });
            }
            let subscription = Arc::new(Subscription::new(owner, request, sink));
            if claimed {
                subscription.claim_start();
            }
            connections
                .entry(owner)
                .or_default()
                .insert(subscription.id.clone(), subscription.clone());
            subscription
        };

        tracing::debug!(owner = %owner, id = %subscription.id, "registered subscription");
        self.notify(&subscription);
        Ok(subscription)
    }

    /// Channel of newly registered subscriptions, used to trigger dispatch.
    ///
    /// The channel is unbounded, so notifying never blocks the registry.
    pub fn listen(&self) -> Receiver<Arc<Subscription>> {
        let (tx, rx) = unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    fn notify(&self, subscription: &Arc<Subscription>) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(subscription.clone()).is_ok());
    }

    /// Remove one subscription, firing its done-signal exactly once.
    ///
    /// Idempotent: removing an absent subscription is a no-op returning
    /// false, including when two callers race.
    pub fn unregister(&self, owner: ConnectionId, id: &str) -> bool {
        let removed = {
            let mut connections = self.connections.write();
            let Some(subs) = connections.get_mut(&owner) else {
                return false;
            };
            let removed = subs.remove(id);
            if subs.is_empty() {
                connections.remove(&owner);
            }
            removed
        };

        match removed {
            Some(subscription) => {
                subscription.retire();
                tracing::debug!(owner = %owner, id = %id, "unregistered subscription");
                true
            }
            None => false,
        }
    }

    /// Remove every subscription owned by `owner` (connection loss).
    /// Returns how many were removed.
    pub fn unregister_all(&self, owner: ConnectionId) -> usize {
        let removed = self.connections.write().remove(&owner);
        let Some(subs) = removed else {
            return 0;
        };
        let count = subs.len();
        for subscription in subs.values() {
            subscription.retire();
        }
        tracing::debug!(owner = %owner, count, "unregistered all subscriptions for connection");
        count
    }

    /// Look up a live entry (diagnostics and adapters).
    pub fn get(&self, owner: ConnectionId, id: &str) -> Option<Arc<Subscription>> {
        self.connections.read().get(&owner)?.get(id).cloned()
    }

    /// Deep-copied diagnostic view of every connection's subscriptions.
    pub fn snapshot(&self) -> HashMap<ConnectionId, Vec<SubscriptionInfo>> {
        self.connections
            .read()
            .iter()
            .map(|(owner, subs)| (*owner, subs.values().map(|s| s.info()).collect()))
            .collect()
    }

    /// Number of active subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.connections.read().values().map(|subs| subs.len()).sum()
    }

    /// Number of connections with at least one subscription.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

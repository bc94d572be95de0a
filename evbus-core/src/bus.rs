//! ## evbus-core::bus
//! **Topic registry with ordered fan-out**
//!
//! The registry maps each topic to the callbacks subscribed to it, in
//! subscription order. `publish` takes a snapshot of a topic's callbacks
//! under a read lock and then invokes them one after another on the calling
//! task, so subscriptions made from inside a handler never deadlock.
//!
//! One failing callback never stops the others: every failure is recorded in
//! the [`PublishReport`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use evbus_telemetry::BusMetrics;

use crate::args::Args;
use crate::error::{DispatchError, RegistrationError};
use crate::handler::{Callback, FnCallback, Handler, Origin, Signature};

/// Identifies one subscription within an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

struct Entry {
    id: SubscriptionId,
    key: Option<String>,
    callback: Arc<dyn Callback>,
}

/// One failed invocation of a publish call.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFailure {
    pub subscription: SubscriptionId,
    pub error: DispatchError,
}

/// Outcome of a single `publish`.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    pub topic: String,
    /// Callbacks that completed successfully.
    pub delivered: usize,
    pub failures: Vec<HandlerFailure>,
}

impl PublishReport {
    fn empty(topic: &str) -> Self {
        Self {
            topic: topic.to_owned(),
            delivered: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total callbacks the publish reached.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }

    /// First failure, if any, as an error.
    pub fn into_result(self) -> Result<usize, DispatchError> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.delivered),
        }
    }
}

struct InnerBus {
    topics: RwLock<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
    metrics: Option<BusMetrics>,
}

/// Local topic registry. Cloning (or [`EventBus::share`]) yields another
/// handle to the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<InnerBus>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Registry that records traffic in `metrics`.
    pub fn with_metrics(metrics: BusMetrics) -> Self {
        Self::build(Some(metrics))
    }

    fn build(metrics: Option<BusMetrics>) -> Self {
        Self {
            inner: Arc::new(InnerBus {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                metrics,
            }),
        }
    }

    /// Creates new handle to the shared registry.
    #[inline]
    pub fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn metrics(&self) -> Option<&BusMetrics> {
        self.inner.metrics.as_ref()
    }

    /// Appends `handler` to the topic's ordered handler list.
    pub fn subscribe<M, H>(&self, topic: &str, handler: H) -> Result<SubscriptionId, RegistrationError>
    where
        H: Handler<M>,
        M: 'static,
    {
        let callback = FnCallback::new(handler)?;
        self.subscribe_callback(topic, Arc::new(callback))
    }

    /// Appends an already type-erased callback.
    pub fn subscribe_callback(
        &self,
        topic: &str,
        callback: Arc<dyn Callback>,
    ) -> Result<SubscriptionId, RegistrationError> {
        callback.signature().validate()?;
        let id = self.next_id();
        debug!(topic, id = id.0, signature = %callback.signature(), "Subscribed");
        self.inner
            .topics
            .write()
            .entry(topic.to_owned())
            .or_default()
            .push(Entry {
                id,
                key: None,
                callback,
            });
        Ok(id)
    }

    /// Installs `callback` under `key` unless the topic already holds a
    /// callback with that key, in which case the existing id is returned and
    /// nothing changes.
    pub fn subscribe_keyed(
        &self,
        topic: &str,
        key: &str,
        callback: Arc<dyn Callback>,
    ) -> Result<SubscriptionId, RegistrationError> {
        callback.signature().validate()?;
        let mut topics = self.inner.topics.write();
        let entries = topics.entry(topic.to_owned()).or_default();
        if let Some(existing) = entries.iter().find(|e| e.key.as_deref() == Some(key)) {
            debug!(topic, key, id = existing.id.0, "Keyed subscription already present");
            return Ok(existing.id);
        }
        let id = self.next_id();
        debug!(topic, key, id = id.0, "Subscribed keyed callback");
        entries.push(Entry {
            id,
            key: Some(key.to_owned()),
            callback,
        });
        Ok(id)
    }

    /// Removes one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.remove_where(topic, |e| e.id == id)
    }

    /// Removes the keyed subscription of `topic`. Returns whether it existed.
    pub fn unsubscribe_keyed(&self, topic: &str, key: &str) -> bool {
        self.remove_where(topic, |e| e.key.as_deref() == Some(key))
    }

    fn remove_where(&self, topic: &str, pred: impl Fn(&Entry) -> bool) -> bool {
        let mut topics = self.inner.topics.write();
        let Some(entries) = topics.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !pred(e));
        let removed = entries.len() != before;
        if entries.is_empty() {
            topics.remove(topic);
        }
        if removed {
            debug!(topic, "Unsubscribed");
        }
        removed
    }

    /// Exact-key test: true iff `topic` has at least one callback.
    pub fn has_callback(&self, topic: &str) -> bool {
        self.inner
            .topics
            .read()
            .get(topic)
            .is_some_and(|entries| !entries.is_empty())
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.inner.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Signatures of the callbacks of `topic`, in delivery order.
    pub fn signatures(&self, topic: &str) -> Vec<Signature> {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|entries| entries.iter().map(|e| e.callback.signature().clone()).collect())
            .unwrap_or_default()
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.topics.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        self.inner.topics.write().clear();
    }

    /// Invokes every callback of `topic` with `args`, in subscription order.
    pub async fn publish(&self, topic: &str, args: Args) -> PublishReport {
        self.dispatch(topic, &args, &Origin::Local).await
    }

    /// Replays an event received from another node. Callbacks that declare an
    /// output parameter fail with `UnsupportedPattern`.
    pub async fn publish_forwarded(&self, topic: &str, args: Args, trail: Vec<String>) -> PublishReport {
        self.dispatch(topic, &args, &Origin::Forwarded { trail }).await
    }

    /// Dispatch with an explicit origin.
    pub async fn dispatch(&self, topic: &str, args: &Args, origin: &Origin) -> PublishReport {
        if let Some(metrics) = self.metrics() {
            metrics.published_events.inc();
        }

        let Some(snapshot) = self.snapshot(topic) else {
            trace!(topic, "Publish on topic without subscribers");
            return PublishReport::empty(topic);
        };

        let mut report = PublishReport::empty(topic);
        for (id, callback) in snapshot {
            match callback.invoke(args, origin).await {
                Ok(()) => {
                    report.delivered += 1;
                    if let Some(metrics) = self.metrics() {
                        metrics.delivered_invocations.inc();
                    }
                }
                Err(error) => {
                    warn!(topic, id = id.0, %error, "Handler invocation failed");
                    if let Some(metrics) = self.metrics() {
                        metrics.handler_failures.inc();
                    }
                    report.failures.push(HandlerFailure {
                        subscription: id,
                        error,
                    });
                }
            }
        }
        debug!(
            topic,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Published"
        );
        report
    }

    fn snapshot(&self, topic: &str) -> Option<Vec<(SubscriptionId, Arc<dyn Callback>)>> {
        let topics = self.inner.topics.read();
        let entries = topics.get(topic)?;
        Some(
            entries
                .iter()
                .map(|e| (e.id, Arc::clone(&e.callback)))
                .collect(),
        )
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

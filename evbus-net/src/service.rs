//! ## evbus-net::service
//! **The RPC surface of one bus**
//!
//! - `Register` installs (or removes) a forwarding handler on the local
//!   registry that relays every publish of a topic to the requester's
//!   `PushEvent`.
//! - `PushEvent` replays a received event on the local registry.
//! - `Query` runs a local query on behalf of a remote caller.
//!
//! Forwarded events carry a trail of the nodes that already dispatched them;
//! a node never dispatches an event twice and never forwards it back to a
//! node on its trail.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, trace};

use evbus_core::{Arg, Args, Callback, DispatchError, EventBus, Origin, OutSlot, Signature, Value};
use evbus_telemetry::BusMetrics;

use crate::endpoint::Endpoint;
use crate::node::Role;
use crate::protocol::{
    Action, Call, EventPush, Method, QueryRequest, RemoteError, RemoteErrorKind, RpcReply,
    SubscribeRequest,
};
use crate::transport::{RpcClient, RpcService};

pub struct Service {
    event_bus: EventBus,
    role: Role,
    identity: Arc<RwLock<Endpoint>>,
    client: Arc<dyn RpcClient>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("role", &self.role)
            .field("identity", &*self.identity.read())
            .finish()
    }
}

impl Service {
    pub fn new(event_bus: EventBus, role: Role, identity: Endpoint, client: Arc<dyn RpcClient>) -> Self {
        Self {
            event_bus,
            role,
            identity: Arc::new(RwLock::new(identity)),
            client,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Endpoint this node is known by; also its name on event trails.
    pub fn identity(&self) -> Endpoint {
        self.identity.read().clone()
    }

    pub(crate) fn set_identity(&self, identity: Endpoint) {
        *self.identity.write() = identity;
    }

    fn accepts(&self, method: Method) -> Result<(), RemoteError> {
        if self.role.accepts(method) {
            Ok(())
        } else {
            Err(RemoteError::new(
                RemoteErrorKind::Unsupported,
                format!("{} bus does not serve {method}", self.role),
            ))
        }
    }

    /// Subscribes (or unsubscribes) the requester to `req.topic`.
    ///
    /// Repeating a subscribe for the same requester and topic is a no-op.
    /// Unsubscribe answers whether a forwarder was removed.
    pub fn register(&self, req: &SubscribeRequest) -> Result<bool, RemoteError> {
        self.accepts(Method::Register)?;
        let callback: Method = req
            .callback
            .parse()
            .map_err(|e: String| RemoteError::new(RemoteErrorKind::UnknownMethod, e))?;
        if callback != Method::PushEvent {
            return Err(RemoteError::new(
                RemoteErrorKind::UnknownMethod,
                format!("{callback} cannot receive forwarded events"),
            ));
        }

        let target = req.requester();
        let key = forward_key(&target, callback);
        match req.action {
            Action::Subscribe => {
                let forwarder = Forwarder {
                    topic: req.topic.clone(),
                    target: target.clone(),
                    origin_id: Arc::clone(&self.identity),
                    client: Arc::clone(&self.client),
                    metrics: self.event_bus.metrics().cloned(),
                    signature: Signature::Variadic,
                };
                self.event_bus
                    .subscribe_keyed(&req.topic, &key, Arc::new(forwarder))
                    .map_err(|e| RemoteError::new(RemoteErrorKind::BadRequest, e.to_string()))?;
                info!(topic = %req.topic, subscriber = %target, "Registered remote subscriber");
                Ok(true)
            }
            Action::Unsubscribe => {
                let removed = self.event_bus.unsubscribe_keyed(&req.topic, &key);
                info!(topic = %req.topic, subscriber = %target, removed, "Unregistered remote subscriber");
                Ok(removed)
            }
        }
    }

    /// Replays `req` on the local registry.
    ///
    /// `true` means the local dispatch completed, not that every handler
    /// succeeded. A forwarded event reaching a handler with an output
    /// parameter is reported as `UnsupportedPattern`.
    pub async fn push_event(&self, req: EventPush) -> Result<bool, RemoteError> {
        self.accepts(Method::PushEvent)?;
        let me = self.identity().to_string();
        if req.trail.iter().any(|hop| *hop == me) {
            trace!(topic = %req.topic, "Event already dispatched here, dropping");
            return Ok(true);
        }

        let report = self
            .event_bus
            .publish_forwarded(&req.topic, Args::from(req.args), req.trail)
            .await;
        if report
            .failures
            .iter()
            .any(|f| f.error == DispatchError::UnsupportedPattern)
        {
            return Err(RemoteError::new(
                RemoteErrorKind::UnsupportedPattern,
                DispatchError::UnsupportedPattern.to_string(),
            ));
        }
        Ok(true)
    }

    /// Runs a local query: `req.args` plus a fresh output reference.
    pub async fn query(&self, req: QueryRequest) -> Result<Option<Value>, RemoteError> {
        self.accepts(Method::Query)?;
        let slot = OutSlot::new();
        let mut args: Vec<Arg> = req.args.into_iter().map(Arg::Value).collect();
        args.push(Arg::Out(slot.clone()));

        let report = self.event_bus.publish(&req.topic, Args::from(args)).await;
        if let Some(value) = slot.take() {
            return Ok(Some(value));
        }
        match report.failures.into_iter().next() {
            Some(failure) => Err(RemoteError::new(
                RemoteErrorKind::Dispatch,
                failure.error.to_string(),
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RpcService for Service {
    async fn dispatch(&self, call: Call) -> RpcReply {
        match call {
            Call::Register(req) => self.register(&req).into(),
            Call::PushEvent(req) => self.push_event(req).await.into(),
            Call::Query(req) => self.query(req).await.into(),
        }
    }
}

fn forward_key(target: &Endpoint, callback: Method) -> String {
    format!("{target}#{callback}")
}

/// Handler installed by `Register`: relays each publish of `topic` to
/// `target`.
struct Forwarder {
    topic: String,
    target: Endpoint,
    origin_id: Arc<RwLock<Endpoint>>,
    client: Arc<dyn RpcClient>,
    metrics: Option<BusMetrics>,
    signature: Signature,
}

impl Forwarder {
    fn failure(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::Transport {
            endpoint: self.target.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Callback for Forwarder {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, args: &Args, origin: &Origin) -> Result<(), DispatchError> {
        let target = self.target.to_string();
        if origin.trail().iter().any(|hop| *hop == target) {
            trace!(topic = %self.topic, %target, "Target already on trail, not forwarding");
            return Ok(());
        }
        let values = args.to_values().ok_or(DispatchError::UnsupportedPattern)?;

        let mut trail = origin.trail().to_vec();
        trail.push(self.origin_id.read().to_string());
        let push = EventPush {
            args: values,
            topic: self.topic.clone(),
            trail,
        };

        let started = Instant::now();
        let reply = self.client.call(&self.target, Call::PushEvent(push)).await;
        debug!(
            topic = %self.topic,
            %target,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Forwarded event"
        );
        match reply {
            Ok(RpcReply::Ack(true)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.forwarded_events.inc();
                }
                Ok(())
            }
            Ok(RpcReply::Error(error)) if error.kind == RemoteErrorKind::UnsupportedPattern => {
                Err(DispatchError::UnsupportedPattern)
            }
            Ok(RpcReply::Error(error)) => Err(self.failure(error.to_string())),
            Ok(other) => Err(self.failure(format!("unexpected reply {other:?}"))),
            Err(error) => Err(self.failure(error.to_string())),
        }
    }
}

//! ## evbus-net::node
//! **Server, client and network buses**
//!
//! A [`Bus`] couples an [`EventBus`] with the [`Service`] that exposes it
//! over RPC. Its [`Role`] decides which directions are available:
//!
//! | role    | serves `Register`/`Query` | serves `PushEvent` | dials out |
//! |---------|---------------------------|--------------------|-----------|
//! | server  | yes                       | yes                | no        |
//! | client  | no                        | yes                | yes       |
//! | network | yes                       | yes                | yes       |
//!
//! A role that [listens](Role::listens) can be subscribed to. A started
//! client still binds a socket, but only to receive the `PushEvent` calls of
//! its own remote subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument, warn};

use evbus_config::{EvbusConfig, TransportConfig};
use evbus_core::{
    Args, Callback, EventBus, FnCallback, FromValue, Handler, IntoValue, PublishReport,
    RegistrationError, SubscriptionId, Value,
};
use evbus_telemetry::{BusMetrics, EventLogger};

use crate::endpoint::Endpoint;
use crate::error::BusError;
use crate::protocol::{Call, Method, QueryRequest, RpcReply, SubscribeRequest};
use crate::service::Service;
use crate::transport::{RpcClient, RpcListener, RpcService, TcpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Server,
    Client,
    Network,
}

impl Role {
    /// Whether other buses may subscribe to or query this role.
    pub fn listens(self) -> bool {
        matches!(self, Role::Server | Role::Network)
    }

    /// Whether this role may call other buses.
    pub fn dials(self) -> bool {
        matches!(self, Role::Client | Role::Network)
    }

    /// Whether this role answers inbound `method` calls.
    pub fn accepts(self, method: Method) -> bool {
        match method {
            Method::PushEvent => true,
            Method::Register | Method::Query => self.listens(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Server => "server",
            Role::Client => "client",
            Role::Network => "network",
        })
    }
}

impl FromStr for Role {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            "network" => Ok(Role::Network),
            other => Err(BusError::Config(format!("unknown role {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Created,
    Started,
    Stopped,
}

enum Lifecycle {
    Created,
    Started { listener: RpcListener, owned: bool },
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> BusState {
        match self {
            Lifecycle::Created => BusState::Created,
            Lifecycle::Started { .. } => BusState::Started,
            Lifecycle::Stopped => BusState::Stopped,
        }
    }
}

type RemoteKey = (String, Endpoint);

pub struct Bus {
    role: Role,
    endpoint: Endpoint,
    advertise_address: Option<String>,
    max_frame_bytes: usize,
    event_bus: EventBus,
    client: Arc<dyn RpcClient>,
    service: Arc<Service>,
    shared_listener: Option<RpcListener>,
    lifecycle: AsyncMutex<Lifecycle>,
    remote_subscriptions: Mutex<HashMap<RemoteKey, Vec<SubscriptionId>>>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("role", &self.role)
            .field("endpoint", &self.local_endpoint())
            .finish()
    }
}

impl Bus {
    pub fn new(role: Role, endpoint: Endpoint, event_bus: EventBus) -> Self {
        let transport = match event_bus.metrics() {
            Some(metrics) => TcpTransport::default().with_metrics(metrics.clone()),
            None => TcpTransport::default(),
        };
        let max_frame_bytes = transport.max_frame_bytes();
        let client: Arc<dyn RpcClient> = Arc::new(transport);
        let service = Arc::new(Service::new(
            event_bus.share(),
            role,
            endpoint.clone(),
            Arc::clone(&client),
        ));
        Self {
            role,
            endpoint,
            advertise_address: None,
            max_frame_bytes,
            event_bus,
            client,
            service,
            shared_listener: None,
            lifecycle: AsyncMutex::new(Lifecycle::Created),
            remote_subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Bus that serves subscriptions on `event_bus` but never dials out.
    pub fn server(address: &str, path: &str, event_bus: EventBus) -> Self {
        Self::new(Role::Server, Endpoint::new(address, path), event_bus)
    }

    /// Bus that subscribes to remote topics and receives their events.
    pub fn client(address: &str, path: &str, event_bus: EventBus) -> Self {
        Self::new(Role::Client, Endpoint::new(address, path), event_bus)
    }

    /// Symmetric bus with its own registry.
    pub fn network(address: &str, path: &str) -> Self {
        Self::new(Role::Network, Endpoint::new(address, path), EventBus::new())
    }

    /// Builds the configured role, transport and metrics.
    pub fn from_config(config: &EvbusConfig) -> Result<Self, BusError> {
        let role: Role = config.node.role.parse()?;
        let event_bus = if config.telemetry.metrics_enabled {
            let metrics = BusMetrics::new().map_err(|e| BusError::Config(e.to_string()))?;
            EventBus::with_metrics(metrics)
        } else {
            EventBus::new()
        };
        let endpoint = Endpoint::new(config.node.address.clone(), config.node.path.clone());
        let mut bus = Self::new(role, endpoint, event_bus).with_transport(&config.transport);
        bus.advertise_address = config.node.advertise_address.clone();
        Ok(bus)
    }

    pub fn with_transport(mut self, config: &TransportConfig) -> Self {
        let mut transport = TcpTransport::from_config(config);
        if let Some(metrics) = self.event_bus.metrics() {
            transport = transport.with_metrics(metrics.clone());
        }
        self.max_frame_bytes = config.max_frame_bytes;
        self.with_client(Arc::new(transport))
    }

    /// Replaces the outbound RPC client.
    pub fn with_client(mut self, client: Arc<dyn RpcClient>) -> Self {
        self.client = client;
        self.service = Arc::new(Service::new(
            self.event_bus.share(),
            self.role,
            self.endpoint.clone(),
            Arc::clone(&self.client),
        ));
        self
    }

    /// Mounts on `listener` at start instead of binding `endpoint.address`.
    pub fn with_listener(mut self, listener: RpcListener) -> Self {
        self.shared_listener = Some(listener);
        self
    }

    pub fn with_advertise_address(mut self, address: impl Into<String>) -> Self {
        self.advertise_address = Some(address.into());
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Endpoint other buses use to reach this one. Before `start` this is the
    /// configured endpoint; afterwards the advertised one.
    pub fn local_endpoint(&self) -> Endpoint {
        self.service.identity()
    }

    pub async fn state(&self) -> BusState {
        self.lifecycle.lock().await.state()
    }

    /// Starts listening. Starting a started bus is a no-op.
    #[instrument(level = "debug", skip(self), fields(role = %self.role, endpoint = %self.endpoint))]
    pub async fn start(&self) -> Result<(), BusError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started { .. } => return Ok(()),
            Lifecycle::Stopped => {
                return Err(BusError::InvalidState {
                    state: BusState::Stopped,
                    operation: "start",
                })
            }
        }

        let (listener, owned) = match &self.shared_listener {
            Some(listener) => (listener.clone(), false),
            None => (
                RpcListener::bind(&self.endpoint.bind_address(), self.max_frame_bytes).await?,
                true,
            ),
        };
        let service: Arc<dyn RpcService> = self.service.clone();
        if !listener.mount(&self.endpoint.path, service) {
            if owned {
                listener.shutdown().await;
            }
            return Err(BusError::PathInUse(self.endpoint.path.clone()));
        }

        let advertised = Endpoint::advertised(
            listener.local_addr(),
            &self.endpoint.path,
            self.advertise_address.as_deref(),
        );
        self.service.set_identity(advertised.clone());
        *lifecycle = Lifecycle::Started { listener, owned };
        EventLogger::log_lifecycle(&advertised.to_string(), "started");
        Ok(())
    }

    /// Stops listening. Idempotent; stopping a bus that never started is a
    /// no-op.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Started { .. }) {
            return;
        }
        if let Lifecycle::Started { listener, owned } =
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        {
            listener.unmount(&self.endpoint.path);
            if owned {
                listener.shutdown().await;
            }
        }
        EventLogger::log_lifecycle(&self.local_endpoint().to_string(), "stopped");
    }

    async fn require_started(&self, operation: &'static str) -> Result<(), BusError> {
        match self.lifecycle.lock().await.state() {
            BusState::Started => Ok(()),
            _ => Err(BusError::NotStarted(operation)),
        }
    }

    fn require_dialing(&self, operation: &'static str) -> Result<(), BusError> {
        if self.role.dials() {
            Ok(())
        } else {
            Err(BusError::Unsupported {
                role: self.role,
                operation,
            })
        }
    }

    /// Local subscription, see [`EventBus::subscribe`].
    pub fn subscribe<M, H>(&self, topic: &str, handler: H) -> Result<SubscriptionId, BusError>
    where
        H: Handler<M>,
        M: 'static,
    {
        Ok(self.event_bus.subscribe(topic, handler)?)
    }

    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.event_bus.unsubscribe(topic, id)
    }

    pub async fn publish(&self, topic: &str, args: Args) -> PublishReport {
        self.event_bus.publish(topic, args).await
    }

    /// Subscribes `handler` locally and asks `remote` to forward every
    /// publish of `topic` here.
    ///
    /// The bus must be started so the remote can call back. If the remote
    /// refuses, the local subscription is removed again.
    #[instrument(level = "debug", skip(self, handler, remote), fields(remote = %remote))]
    pub async fn subscribe_remote<M, H>(
        &self,
        topic: &str,
        handler: H,
        remote: &Endpoint,
    ) -> Result<SubscriptionId, BusError>
    where
        H: Handler<M>,
        M: 'static,
    {
        self.require_dialing("subscribe to a remote bus")?;
        let callback = FnCallback::new(handler)?;
        if callback.signature().has_output() {
            return Err(RegistrationError::UnsupportedPattern.into());
        }
        self.require_started("subscribe to a remote bus").await?;

        let id = self.event_bus.subscribe_callback(topic, Arc::new(callback))?;
        let request = SubscribeRequest::subscribe(&self.local_endpoint(), topic);
        let registered = match self.call_remote(remote, Call::Register(request)).await {
            Ok(RpcReply::Ack(true)) => Ok(()),
            Ok(_) => Err(BusError::Protocol {
                endpoint: remote.to_string(),
                method: Method::Register,
            }),
            Err(error) => Err(error),
        };
        if let Err(error) = registered {
            self.event_bus.unsubscribe(topic, id);
            warn!(topic, %error, "Remote subscribe failed, local subscription rolled back");
            return Err(error);
        }

        self.remote_subscriptions
            .lock()
            .entry((topic.to_owned(), remote.clone()))
            .or_default()
            .push(id);
        debug!(topic, id = id.get(), "Subscribed to remote topic");
        Ok(id)
    }

    /// Drops a subscription made with [`Bus::subscribe_remote`]. The remote
    /// stops forwarding once the last local handler for that topic and
    /// remote is gone. Returns whether the subscription existed.
    pub async fn unsubscribe_remote(
        &self,
        topic: &str,
        id: SubscriptionId,
        remote: &Endpoint,
    ) -> Result<bool, BusError> {
        let key = (topic.to_owned(), remote.clone());
        let last = {
            let mut subscriptions = self.remote_subscriptions.lock();
            let Some(ids) = subscriptions.get_mut(&key) else {
                return Ok(false);
            };
            let before = ids.len();
            ids.retain(|i| *i != id);
            if ids.len() == before {
                return Ok(false);
            }
            let last = ids.is_empty();
            if last {
                subscriptions.remove(&key);
            }
            last
        };

        self.event_bus.unsubscribe(topic, id);
        if last {
            let request = SubscribeRequest::unsubscribe(&self.local_endpoint(), topic);
            self.call_remote(remote, Call::Register(request)).await?;
        }
        Ok(true)
    }

    /// Runs a query on `remote`: its handler for `topic` receives `args`
    /// followed by an output parameter, whose value is returned.
    pub async fn query_remote<T: FromValue>(
        &self,
        topic: &str,
        args: Vec<Value>,
        remote: &Endpoint,
    ) -> Result<Option<T>, BusError> {
        match self.query_remote_value(topic, args, remote).await? {
            Some(value) => Ok(Some(T::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Untyped form of [`Bus::query_remote`].
    pub async fn query_remote_value(
        &self,
        topic: &str,
        args: Vec<Value>,
        remote: &Endpoint,
    ) -> Result<Option<Value>, BusError> {
        self.require_dialing("query a remote bus")?;
        let request = QueryRequest {
            topic: topic.to_owned(),
            args,
        };
        match self.call_remote(remote, Call::Query(request)).await? {
            RpcReply::Value(value) => Ok(value),
            _ => Err(BusError::Protocol {
                endpoint: remote.to_string(),
                method: Method::Query,
            }),
        }
    }

    async fn call_remote(&self, remote: &Endpoint, call: Call) -> Result<RpcReply, BusError> {
        let method = call.method();
        match self.client.call(remote, call).await? {
            RpcReply::Error(error) => Err(BusError::Remote {
                endpoint: remote.to_string(),
                method,
                error,
            }),
            reply => Ok(reply),
        }
    }
}

/// Convenience for building query arguments.
pub fn values<I, T>(items: I) -> Vec<Value>
where
    I: IntoIterator<Item = T>,
    T: IntoValue,
{
    items.into_iter().map(IntoValue::into_value).collect()
}

//! The message-queue adapter.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderName, HeaderValue};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use switchyard_config::QueueConfig;
use switchyard_content::{split_content_type, Rendered};
use switchyard_core::{
    BoxFuture, Context, DispatchResult, Dispatcher, Endpoint, RequestContent, RpcError, RpcResult,
    Scope, SetupError, TransportError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::broker::{Broker, BrokerConnection, BrokerResult, Delivery, MessageProperties, QueueOptions};
use super::subscription::{AnonymousSubscription, Subscription};
use super::topology::Topology;
use crate::adapter::{Adapter, AdapterState, Lifecycle, Runtime};
use crate::mapping::{queue_signal, QueueSignal};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use crate::transport::{process, Transport};

/// How long `stop()` waits for in-flight deliveries to settle.
const STOP_GRACE: Duration = Duration::from_secs(30);

type SharedConnection = Arc<RwLock<Option<Arc<dyn BrokerConnection>>>>;

/// Publishes messages over the adapter's current connection.
///
/// Handlers find it in the context extensions:
///
/// ```
/// use serde_json::json;
/// use switchyard_core::{context_handler_fn, Args, Context, RpcError};
/// use switchyard_server::queue::Publisher;
///
/// let handler = context_handler_fn(|ctx: &mut Context, args: Args| {
///     let publisher = ctx.extension::<Publisher>().cloned();
///     async move {
///         let publisher = publisher.ok_or_else(|| RpcError::internal("no publisher"))?;
///         publisher
///             .publish_json("audit", "order.seen", &json!({"order": args.get("data")}))
///             .await
///             .map_err(anyhow::Error::from)?;
///         Ok::<_, RpcError>(())
///     }
/// });
/// ```
#[derive(Clone)]
pub struct Publisher {
    connection: SharedConnection,
    content_type: String,
    encoding: String,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("connected", &self.is_connected())
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Returns `true` while the adapter holds an open connection.
    pub fn is_connected(&self) -> bool {
        self.connection.read().as_ref().is_some_and(|c| c.is_open())
    }

    /// Publishes `body` with the configured content type and encoding.
    pub async fn publish(&self, exchange: &str, routing_key: &str, body: impl Into<Bytes>) -> BrokerResult<()> {
        self.publish_with(exchange, routing_key, MessageProperties::default(), body)
            .await
    }

    /// Publishes a JSON value.
    pub async fn publish_json(&self, exchange: &str, routing_key: &str, value: &Value) -> BrokerResult<()> {
        let body = serde_json::to_vec(value)
            .map_err(|e| TransportError::Broker(format!("cannot encode message: {e}")))?;
        let properties = MessageProperties {
            content_type: Some("application/json".to_string()),
            ..MessageProperties::default()
        };
        self.publish_with(exchange, routing_key, properties, body).await
    }

    /// Publishes with explicit properties. Missing content type and encoding
    /// fall back to the configured ones.
    pub async fn publish_with(
        &self,
        exchange: &str,
        routing_key: &str,
        mut properties: MessageProperties,
        body: impl Into<Bytes>,
    ) -> BrokerResult<()> {
        let connection = self.connection.read().clone().ok_or(TransportError::NotStarted)?;
        if !connection.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        properties
            .content_type
            .get_or_insert_with(|| self.content_type.clone());
        properties
            .content_encoding
            .get_or_insert_with(|| self.encoding.clone());
        connection
            .publish(exchange, routing_key, properties, body.into())
            .await
    }
}

/// Consumes queues for endpoints carrying a [`Subscription`] or
/// [`AnonymousSubscription`].
///
/// `start()` connects, declares every service [`Topology`] and starts
/// consuming; it fails if the broker cannot be reached. Afterwards a
/// background task owns the connection: when it is lost, the task retries
/// every `reconnect_interval`, redeclares the topology and resumes.
pub struct QueueAdapter {
    scope: Arc<Scope>,
    config: QueueConfig,
    broker: Arc<dyn Broker>,
    lifecycle: Lifecycle,
    runtime: RwLock<Option<Arc<Runtime>>>,
    connection: SharedConnection,
    running: Mutex<Option<Running>>,
}

struct Running {
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl QueueAdapter {
    /// An adapter named `queue`.
    pub fn new(broker: Arc<dyn Broker>, config: QueueConfig) -> Self {
        Self::with_scope(Scope::new("queue"), broker, config)
    }

    /// An adapter with its own scope, for a custom name or settings.
    pub fn with_scope(scope: Scope, broker: Arc<dyn Broker>, config: QueueConfig) -> Self {
        let lifecycle = Lifecycle::new(scope.name());
        Self {
            scope: Arc::new(scope),
            config,
            broker,
            lifecycle,
            runtime: RwLock::new(None),
            connection: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
        }
    }

    /// A publisher bound to this adapter's connection.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            connection: Arc::clone(&self.connection),
            content_type: self.config.publish_content_type.clone(),
            encoding: self.config.publish_encoding.clone(),
        }
    }
}

#[async_trait]
impl Adapter for QueueAdapter {
    fn name(&self) -> &str {
        self.scope.name()
    }

    fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    fn attach(&self, runtime: Arc<Runtime>) -> Result<(), SetupError> {
        self.lifecycle.check(AdapterState::Attached)?;
        *self.runtime.write() = Some(runtime);
        self.lifecycle.transition(AdapterState::Attached)
    }

    async fn start(&self) -> Result<(), SetupError> {
        let _starting = self.lifecycle.begin_start().await?;
        let runtime = self
            .runtime
            .read()
            .clone()
            .ok_or_else(|| SetupError::invalid_setting(self.name(), "adapter has no runtime"))?;

        let plan = Plan::build(&runtime, self.config.prefetch)?;
        let session = plan.open(&*self.broker).await?;
        tracing::info!(
            adapter = self.name(),
            consumers = plan.consumers.len(),
            prefetch = plan.prefetch,
            "queue adapter consuming"
        );

        let shared = Arc::new(QueueShared {
            runtime,
            scope: Arc::clone(&self.scope),
            broker: Arc::clone(&self.broker),
            plan,
            connection: Arc::clone(&self.connection),
            publisher: self.publisher(),
            reconnect_interval: self.config.reconnect_interval(),
        });
        *self.connection.write() = Some(Arc::clone(&session.0));
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(supervise(shared, session, shutdown.clone()));
        *self.running.lock() = Some(Running { shutdown, task });
        self.lifecycle.transition(AdapterState::Started)
    }

    async fn stop(&self) -> Result<(), SetupError> {
        self.lifecycle.transition(AdapterState::Stopped)?;
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.shutdown.trigger();
            if let Err(e) = running.task.await {
                tracing::warn!(adapter = self.name(), error = %e, "consumer task ended abnormally");
            }
        }
        tracing::info!(adapter = self.name(), "queue adapter stopped");
        Ok(())
    }
}

#[derive(Debug)]
enum Source {
    Named(String),
    Anonymous(Vec<(String, String)>),
}

#[derive(Debug)]
struct Consumer {
    source: Source,
    ack: bool,
    endpoint: Arc<Endpoint>,
    service: Arc<Scope>,
}

/// Everything needed to (re)establish consumption.
#[derive(Debug)]
struct Plan {
    topology: Topology,
    prefetch: u16,
    consumers: Vec<Arc<Consumer>>,
}

type Session = (
    Arc<dyn BrokerConnection>,
    Vec<(Arc<Consumer>, mpsc::UnboundedReceiver<Delivery>)>,
);

impl Plan {
    fn build(runtime: &Runtime, default_prefetch: u16) -> Result<Self, SetupError> {
        let mut topology = Topology::default();
        let mut consumers = Vec::new();
        let mut named = HashSet::new();

        for service in runtime.services() {
            for declared in service.children::<Topology>() {
                topology.merge(&declared)?;
            }
            for endpoint in service.endpoints() {
                let consumer = |source, ack| {
                    Arc::new(Consumer {
                        source,
                        ack,
                        endpoint: Arc::clone(endpoint),
                        service: Arc::clone(service.scope()),
                    })
                };
                for subscription in endpoint.children::<Subscription>() {
                    for queue in subscription.queues {
                        if !named.insert(queue.clone()) {
                            return Err(SetupError::duplicate("queue consumer", queue));
                        }
                        consumers.push(consumer(Source::Named(queue), subscription.ack));
                    }
                }
                for subscription in endpoint.children::<AnonymousSubscription>() {
                    consumers.push(consumer(Source::Anonymous(subscription.bindings), subscription.ack));
                }
            }
        }

        Ok(Self {
            prefetch: topology.prefetch().unwrap_or(default_prefetch),
            topology,
            consumers,
        })
    }

    /// Connects, declares the topology and starts every consumer.
    async fn open(&self, broker: &dyn Broker) -> BrokerResult<Session> {
        let connection = broker.connect().await?;
        match self.consume(&*connection).await {
            Ok(receivers) => Ok((connection, receivers)),
            Err(e) => {
                if let Err(close) = connection.close().await {
                    tracing::debug!(error = %close, "closing half-opened connection failed");
                }
                Err(e)
            }
        }
    }

    async fn consume(
        &self,
        connection: &dyn BrokerConnection,
    ) -> BrokerResult<Vec<(Arc<Consumer>, mpsc::UnboundedReceiver<Delivery>)>> {
        connection.set_prefetch(self.prefetch).await?;
        self.topology.declare(connection).await?;

        let mut receivers = Vec::with_capacity(self.consumers.len());
        for consumer in &self.consumers {
            let queue = match &consumer.source {
                Source::Named(queue) => queue.clone(),
                Source::Anonymous(bindings) => {
                    let queue = connection.declare_queue(&QueueOptions::anonymous()).await?;
                    for (exchange, key) in bindings {
                        connection.bind_queue(&queue, exchange, key).await?;
                    }
                    queue
                }
            };
            let receiver = connection.consume(&queue, !consumer.ack).await?;
            tracing::debug!(queue = %queue, endpoint = consumer.endpoint.name(), ack = consumer.ack, "consuming queue");
            receivers.push((Arc::clone(consumer), receiver));
        }
        Ok(receivers)
    }
}

/// Owns the connection for the lifetime of a started adapter.
async fn supervise(shared: Arc<QueueShared>, session: Session, shutdown: ShutdownSignal) {
    let tracker = ConnectionTracker::new();
    let mut session = session;
    loop {
        let (connection, receivers) = session;
        *shared.connection.write() = Some(Arc::clone(&connection));

        let lost = consume(&shared, &connection, receivers, &shutdown, &tracker).await;
        if !lost {
            if !tracker.drain(STOP_GRACE).await {
                tracing::warn!(in_flight = tracker.active(), "stopping with deliveries in flight");
            }
            *shared.connection.write() = None;
            if let Err(e) = connection.close().await {
                tracing::debug!(error = %e, "closing broker connection failed");
            }
            return;
        }

        *shared.connection.write() = None;
        tracing::warn!(adapter = shared.scope.name(), "broker connection lost");
        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "closing lost broker connection failed");
        }
        match reconnect(&shared, &shutdown).await {
            Some(next) => session = next,
            None => return,
        }
    }
}

/// Runs deliveries until shutdown (`false`) or connection loss (`true`).
///
/// Loss is noticed either when every consumer channel has ended or when the
/// connection reports itself closed, so a publish-only adapter with no
/// consumers keeps its connection until one of the two happens.
async fn consume(
    shared: &Arc<QueueShared>,
    connection: &Arc<dyn BrokerConnection>,
    receivers: Vec<(Arc<Consumer>, mpsc::UnboundedReceiver<Delivery>)>,
    shutdown: &ShutdownSignal,
    tracker: &ConnectionTracker,
) -> bool {
    let consuming = !receivers.is_empty();
    let (merged_tx, mut merged) = mpsc::unbounded_channel();
    for (consumer, mut receiver) in receivers {
        let merged_tx = merged_tx.clone();
        tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                if merged_tx.send((Arc::clone(&consumer), delivery)).is_err() {
                    break;
                }
            }
        });
    }
    drop(merged_tx);

    let mut liveness = tokio::time::interval(shared.reconnect_interval.max(Duration::from_millis(1)));
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            next = merged.recv(), if consuming => match next {
                Some((consumer, delivery)) => {
                    let shared = Arc::clone(shared);
                    let connection = Arc::clone(connection);
                    let token = tracker.acquire();
                    tokio::spawn(async move {
                        shared.handle(&connection, consumer, delivery).await;
                        drop(token);
                    });
                }
                None => return !shutdown.is_shutdown(),
            },
            _ = liveness.tick() => {
                if !connection.is_open() {
                    return !shutdown.is_shutdown();
                }
            }
            () = shutdown.recv() => return false,
        }
    }
}

async fn reconnect(shared: &QueueShared, shutdown: &ShutdownSignal) -> Option<Session> {
    let mut attempt: u32 = 0;
    loop {
        tokio::select! {
            () = tokio::time::sleep(shared.reconnect_interval) => {}
            () = shutdown.recv() => return None,
        }
        attempt += 1;
        match shared.plan.open(&*shared.broker).await {
            Ok(session) => {
                tracing::info!(adapter = shared.scope.name(), attempt, "reconnected to broker");
                return Some(session);
            }
            Err(e) => tracing::warn!(
                adapter = shared.scope.name(),
                attempt,
                error = %e,
                retry_in_ms = shared.reconnect_interval.as_millis() as u64,
                "reconnect failed"
            ),
        }
    }
}

/// One delivery together with the consumer it arrived on.
struct QueueUnit {
    consumer: Arc<Consumer>,
    delivery: Delivery,
}

/// State shared by the consumer tasks of a started adapter.
struct QueueShared {
    runtime: Arc<Runtime>,
    scope: Arc<Scope>,
    broker: Arc<dyn Broker>,
    plan: Plan,
    connection: SharedConnection,
    publisher: Publisher,
    reconnect_interval: Duration,
}

impl QueueShared {
    async fn handle(&self, connection: &Arc<dyn BrokerConnection>, consumer: Arc<Consumer>, delivery: Delivery) {
        let tag = delivery.delivery_tag;
        let ack = consumer.ack;
        let signal = process(&self.runtime, &self.scope, self, QueueUnit { consumer, delivery }, None).await;
        if !ack {
            return;
        }
        let settled = match signal {
            QueueSignal::Ack => connection.ack(tag).await,
            QueueSignal::Reject { requeue } => connection.reject(tag, requeue).await,
        };
        if let Err(e) = settled {
            tracing::warn!(delivery_tag = tag, ?signal, error = %e, "cannot settle delivery");
        }
    }

    fn resolve(&self, ctx: &Context) -> RpcResult<DispatchResult> {
        let consumer = ctx
            .extension::<Arc<Consumer>>()
            .cloned()
            .ok_or_else(|| RpcError::internal("delivery has no consumer"))?;
        let delivery = ctx
            .extension::<Delivery>()
            .ok_or_else(|| RpcError::internal("delivery missing"))?;

        let signature = consumer.endpoint.signature();
        let wants = |name: &str| signature.declares(name) || signature.open().is_some();
        let mut params = IndexMap::new();
        if wants("routing_key") {
            params.insert("routing_key".to_string(), Value::String(delivery.routing_key.clone()));
        }
        if wants("data") {
            params.insert("data".to_string(), message_data(ctx.request.content.as_ref()));
        }
        if wants("message") {
            params.insert("message".to_string(), message_value(delivery));
        }

        Ok(DispatchResult::new(Arc::clone(&consumer.endpoint), params).with_service(Arc::clone(&consumer.service)))
    }
}

/// The parsed body, or the raw body as text when no media type was given.
fn message_data(content: Option<&RequestContent>) -> Value {
    match content {
        Some(RequestContent { data: Some(data), .. }) => data.clone(),
        Some(content) if !content.raw.is_empty() => {
            Value::String(String::from_utf8_lossy(&content.raw).into_owned())
        }
        _ => Value::Null,
    }
}

fn message_value(delivery: &Delivery) -> Value {
    json!({
        "exchange": delivery.exchange,
        "routing_key": delivery.routing_key,
        "delivery_tag": delivery.delivery_tag,
        "redelivered": delivery.redelivered,
        "content_type": delivery.properties.content_type,
        "content_encoding": delivery.properties.content_encoding,
        "message_id": delivery.properties.message_id,
        "headers": delivery.properties.headers,
    })
}

impl Dispatcher for QueueShared {
    fn dispatch<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<DispatchResult>> {
        Box::pin(std::future::ready(self.resolve(ctx)))
    }
}

impl Transport for QueueShared {
    type Unit = QueueUnit;
    type Reply = QueueSignal;

    fn parse_request(&self, unit: QueueUnit, ctx: &mut Context) -> RpcResult<()> {
        let QueueUnit { consumer, delivery } = unit;

        for (name, value) in &delivery.properties.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                ctx.request.headers.insert(name, value);
            }
        }

        let (mime_type, encoding) = match delivery.properties.content_type.as_deref().map(split_content_type) {
            Some((mime_type, encoding)) => (Some(mime_type), encoding),
            None => (None, None),
        };
        let encoding = encoding.or_else(|| delivery.properties.content_encoding.clone());
        ctx.request.content = Some(RequestContent::new(delivery.body.clone(), mime_type, encoding));

        ctx.insert_extension(self.publisher.clone());
        ctx.insert_extension(consumer);
        ctx.insert_extension(delivery);
        Ok(())
    }

    fn build_response(&self, ctx: &mut Context, rendered: Rendered) -> QueueSignal {
        tracing::trace!(request_id = %ctx.id(), bytes = rendered.body.len(), "delivery processed");
        QueueSignal::Ack
    }

    fn error_reply(&self, _ctx: &mut Context, error: &RpcError, _rendered: Option<Rendered>) -> QueueSignal {
        queue_signal(error.kind())
    }
}

//! An in-process broker.
//!
//! [`MemoryBroker`] follows AMQP 0-9-1 semantics closely enough to run the
//! queue adapter without a network: direct, fanout and topic exchanges, the
//! default exchange, per-connection prefetch, requeue on reject or
//! connection loss, exclusive and auto-delete queues. It also lets tests
//! force a connection loss and inspect what was acknowledged.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use switchyard_core::TransportError;
use tokio::sync::mpsc;

use super::broker::{
    Broker, BrokerConnection, BrokerResult, Delivery, ExchangeKind, MessageProperties, QueueOptions,
};

/// A broker living in the current process. Clones share state.
///
/// ```
/// use bytes::Bytes;
/// use switchyard_server::queue::{Broker, BrokerConnection, MemoryBroker, MessageProperties, QueueOptions};
///
/// # tokio_test::block_on(async {
/// let broker = MemoryBroker::new();
/// let conn = broker.connect().await.unwrap();
/// conn.declare_queue(&QueueOptions::named("jobs", false, false)).await.unwrap();
/// let mut jobs = conn.consume("jobs", false).await.unwrap();
///
/// broker.publish("", "jobs", MessageProperties::default(), Bytes::from("hi")).unwrap();
/// let delivery = jobs.recv().await.unwrap();
/// conn.ack(delivery.delivery_tag).await.unwrap();
/// assert_eq!(broker.acked(), vec![Bytes::from("hi")]);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    available: bool,
    exchanges: HashMap<String, Exchange>,
    queues: IndexMap<String, Queue>,
    connections: HashMap<u64, Connection>,
    next_connection: u64,
    next_anonymous: u64,
    connects: usize,
    acked: Vec<Bytes>,
    rejected: Vec<(Bytes, bool)>,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<(String, String)>,
}

#[derive(Debug)]
struct Queue {
    options: QueueOptions,
    owner: Option<u64>,
    backlog: VecDeque<Message>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
}

#[derive(Debug)]
struct Consumer {
    connection: u64,
    no_ack: bool,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    properties: MessageProperties,
    body: Bytes,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct Connection {
    prefetch: u16,
    next_tag: u64,
    unacked: HashMap<u64, (String, Message)>,
}

impl Connection {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch)
    }
}

impl MemoryBroker {
    /// An empty, reachable broker.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                available: true,
                exchanges: HashMap::new(),
                queues: IndexMap::new(),
                connections: HashMap::new(),
                next_connection: 0,
                next_anonymous: 0,
                connects: 0,
                acked: Vec::new(),
                rejected: Vec::new(),
            })),
        }
    }

    /// Drops every open connection as if the network failed.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            state.drop_connection(id);
        }
    }

    /// While unavailable, `connect` fails.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Publishes without a connection.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> BrokerResult<()> {
        self.state.lock().route(Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties,
            body,
            redelivered: false,
        })
    }

    /// Bodies acknowledged so far, in order.
    pub fn acked(&self) -> Vec<Bytes> {
        self.state.lock().acked.clone()
    }

    /// Bodies rejected so far with their requeue flag, in order.
    pub fn rejected(&self) -> Vec<(Bytes, bool)> {
        self.state.lock().rejected.clone()
    }

    /// Number of successful `connect` calls.
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of open connections.
    pub fn open_connections(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Messages waiting in a queue, not counting unacknowledged ones.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.backlog.len())
    }

    /// Returns `true` if the exchange exists.
    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.state.lock().exchanges.contains_key(exchange)
    }

    /// Names of queues bound to an exchange.
    pub fn bound_queues(&self, exchange: &str) -> Vec<String> {
        self.state
            .lock()
            .exchanges
            .get(exchange)
            .map(|e| e.bindings.iter().map(|(queue, _)| queue.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(TransportError::Broker("broker unavailable".to_string()));
        }
        state.next_connection += 1;
        state.connects += 1;
        let id = state.next_connection;
        state.connections.insert(id, Connection::default());
        Ok(Arc::new(MemoryConnection {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

impl State {
    fn connection(&mut self, id: u64) -> BrokerResult<&mut Connection> {
        self.connections.get_mut(&id).ok_or(TransportError::ConnectionClosed)
    }

    fn route(&mut self, message: Message) -> BrokerResult<()> {
        let targets: Vec<String> = if message.exchange.is_empty() {
            vec![message.routing_key.clone()]
        } else {
            let exchange = self
                .exchanges
                .get(&message.exchange)
                .ok_or_else(|| TransportError::Broker(format!("no exchange '{}'", message.exchange)))?;
            let mut targets: Vec<String> = Vec::new();
            for (queue, key) in &exchange.bindings {
                let hit = match exchange.kind {
                    ExchangeKind::Direct => key == &message.routing_key,
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Topic => topic_matches(key, &message.routing_key),
                };
                if hit && !targets.contains(queue) {
                    targets.push(queue.clone());
                }
            }
            targets
        };

        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.backlog.push_back(message.clone());
                self.pump(&name);
            } else {
                tracing::debug!(queue = %name, "dropping unroutable message");
            }
        }
        Ok(())
    }

    /// Hands waiting messages to consumers with spare capacity.
    fn pump(&mut self, name: &str) {
        let Self {
            queues, connections, ..
        } = self;
        let Some(queue) = queues.get_mut(name) else {
            return;
        };

        while !queue.backlog.is_empty() && !queue.consumers.is_empty() {
            let count = queue.consumers.len();
            let pick = (0..count).map(|i| (queue.next_consumer + i) % count).find(|&i| {
                let consumer = &queue.consumers[i];
                consumer.no_ack
                    || connections
                        .get(&consumer.connection)
                        .is_some_and(Connection::has_capacity)
            });
            let Some(index) = pick else {
                break;
            };
            let Some(message) = queue.backlog.pop_front() else {
                break;
            };
            queue.next_consumer = (index + 1) % count;

            let consumer = &queue.consumers[index];
            let Some(connection) = connections.get_mut(&consumer.connection) else {
                queue.backlog.push_front(message);
                queue.consumers.remove(index);
                continue;
            };
            connection.next_tag += 1;
            let tag = connection.next_tag;
            let delivery = Delivery {
                delivery_tag: tag,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                properties: message.properties.clone(),
                body: message.body.clone(),
            };
            if consumer.sender.send(delivery).is_err() {
                queue.backlog.push_front(message);
                queue.consumers.remove(index);
                queue.next_consumer = 0;
                continue;
            }
            if !consumer.no_ack {
                connection.unacked.insert(tag, (name.to_string(), message));
            }
        }
    }

    fn requeue(&mut self, queue: &str, mut message: Message) {
        message.redelivered = true;
        if let Some(q) = self.queues.get_mut(queue) {
            q.backlog.push_front(message);
        }
    }

    fn drop_connection(&mut self, id: u64) {
        let Some(connection) = self.connections.remove(&id) else {
            return;
        };

        let mut unacked: Vec<(u64, (String, Message))> = connection.unacked.into_iter().collect();
        unacked.sort_by(|a, b| b.0.cmp(&a.0));
        let mut touched: Vec<String> = Vec::new();
        for (_, (queue, message)) in unacked {
            self.requeue(&queue, message);
            if !touched.contains(&queue) {
                touched.push(queue);
            }
        }

        let mut doomed = Vec::new();
        for (name, queue) in &mut self.queues {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| c.connection != id);
            queue.next_consumer = 0;
            let lost_last = before > 0 && queue.consumers.is_empty();
            if queue.owner == Some(id) || (queue.options.auto_delete && lost_last) {
                doomed.push(name.clone());
            }
        }
        for name in &doomed {
            self.queues.shift_remove(name);
            for exchange in self.exchanges.values_mut() {
                exchange.bindings.retain(|(queue, _)| queue != name);
            }
        }
        for name in touched {
            self.pump(&name);
        }
        tracing::debug!(connection = id, deleted_queues = doomed.len(), "memory broker connection dropped");
    }
}

/// A connection to a [`MemoryBroker`].
#[derive(Debug)]
struct MemoryConnection {
    id: u64,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.state.lock().connections.contains_key(&self.id)
    }

    async fn set_prefetch(&self, count: u16) -> BrokerResult<()> {
        self.state.lock().connection(self.id)?.prefetch = count;
        Ok(())
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, _durable: bool) -> BrokerResult<()> {
        let mut state = self.state.lock();
        state.connection(self.id)?;
        if name.is_empty() {
            return Err(TransportError::Broker("the default exchange cannot be declared".to_string()));
        }
        match state.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(TransportError::Broker(format!(
                "exchange '{name}' exists with kind {}",
                existing.kind
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, options: &QueueOptions) -> BrokerResult<String> {
        let mut state = self.state.lock();
        state.connection(self.id)?;
        let name = match &options.name {
            Some(name) => name.clone(),
            None => {
                state.next_anonymous += 1;
                format!("amq.gen-{}", state.next_anonymous)
            }
        };

        if let Some(existing) = state.queues.get(&name) {
            if existing.owner.is_some_and(|owner| owner != self.id) {
                return Err(TransportError::Broker(format!("queue '{name}' is locked by another connection")));
            }
            if existing.options.durable != options.durable || existing.options.auto_delete != options.auto_delete {
                return Err(TransportError::Broker(format!("queue '{name}' exists with other flags")));
            }
            return Ok(name);
        }

        let mut stored = options.clone();
        stored.name = Some(name.clone());
        state.queues.insert(
            name.clone(),
            Queue {
                options: stored,
                owner: options.exclusive.then_some(self.id),
                backlog: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
            },
        );
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()> {
        let mut state = self.state.lock();
        state.connection(self.id)?;
        if !state.queues.contains_key(queue) {
            return Err(TransportError::Broker(format!("no queue '{queue}'")));
        }
        let exchange = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| TransportError::Broker(format!("no exchange '{exchange}'")))?;
        let binding = (queue.to_string(), routing_key.to_string());
        if !exchange.bindings.contains(&binding) {
            exchange.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, no_ack: bool) -> BrokerResult<mpsc::UnboundedReceiver<Delivery>> {
        let mut state = self.state.lock();
        state.connection(self.id)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::Broker(format!("no queue '{queue}'")))?;
        target.consumers.push(Consumer {
            connection: self.id,
            no_ack,
            sender,
        });
        state.pump(queue);
        Ok(receiver)
    }

    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()> {
        let mut state = self.state.lock();
        let (queue, message) = state
            .connection(self.id)?
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| TransportError::Broker(format!("unknown delivery tag {delivery_tag}")))?;
        state.acked.push(message.body);
        state.pump(&queue);
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()> {
        let mut state = self.state.lock();
        let (queue, message) = state
            .connection(self.id)?
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| TransportError::Broker(format!("unknown delivery tag {delivery_tag}")))?;
        state.rejected.push((message.body.clone(), requeue));
        if requeue {
            state.requeue(&queue, message);
        }
        state.pump(&queue);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> BrokerResult<()> {
        let mut state = self.state.lock();
        state.connection(self.id)?;
        state.route(Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties,
            body,
            redelivered: false,
        })
    }

    async fn close(&self) -> BrokerResult<()> {
        self.state.lock().drop_connection(self.id);
        Ok(())
    }
}

/// Matches a dotted routing key against a topic pattern.
fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && words_match(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> MessageProperties {
        MessageProperties::default()
    }

    #[test]
    fn test_topic_patterns() {
        assert!(topic_matches("orders.*", "orders.created"));
        assert!(!topic_matches("orders.*", "orders.created.eu"));
        assert!(topic_matches("orders.#", "orders.created.eu"));
        assert!(topic_matches("orders.#", "orders"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("*.created", "users.created"));
        assert!(!topic_matches("users.created", "users.deleted"));
    }

    #[tokio::test]
    async fn test_exchange_kinds_route() {
        let broker = MemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        for (name, kind) in [
            ("direct", ExchangeKind::Direct),
            ("fanout", ExchangeKind::Fanout),
            ("topic", ExchangeKind::Topic),
        ] {
            conn.declare_exchange(name, kind, false).await.unwrap();
            conn.declare_queue(&QueueOptions::named(name, false, false)).await.unwrap();
        }
        conn.bind_queue("direct", "direct", "a").await.unwrap();
        conn.bind_queue("fanout", "fanout", "ignored").await.unwrap();
        conn.bind_queue("topic", "topic", "a.#").await.unwrap();

        conn.publish("direct", "a", props(), Bytes::from("1")).await.unwrap();
        conn.publish("direct", "b", props(), Bytes::from("2")).await.unwrap();
        conn.publish("fanout", "x", props(), Bytes::from("3")).await.unwrap();
        conn.publish("topic", "a.b.c", props(), Bytes::from("4")).await.unwrap();
        conn.publish("topic", "b.a", props(), Bytes::from("5")).await.unwrap();

        assert_eq!(broker.queue_depth("direct"), Some(1));
        assert_eq!(broker.queue_depth("fanout"), Some(1));
        assert_eq!(broker.queue_depth("topic"), Some(1));
    }

    #[tokio::test]
    async fn test_redeclare_with_other_kind_fails() {
        let broker = MemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.declare_exchange("events", ExchangeKind::Topic, false).await.unwrap();
        conn.declare_exchange("events", ExchangeKind::Topic, false).await.unwrap();
        assert!(conn.declare_exchange("events", ExchangeKind::Direct, false).await.is_err());
    }

    #[tokio::test]
    async fn test_prefetch_limits_unacked() {
        let broker = MemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.set_prefetch(1).await.unwrap();
        conn.declare_queue(&QueueOptions::named("jobs", false, false)).await.unwrap();
        let mut jobs = conn.consume("jobs", false).await.unwrap();

        for body in ["a", "b"] {
            broker.publish("", "jobs", props(), Bytes::from(body)).unwrap();
        }
        let first = jobs.recv().await.unwrap();
        assert!(jobs.try_recv().is_err());
        assert_eq!(broker.queue_depth("jobs"), Some(1));

        conn.ack(first.delivery_tag).await.unwrap();
        let second = jobs.recv().await.unwrap();
        assert_eq!(second.body, Bytes::from("b"));
    }

    #[tokio::test]
    async fn test_reject_with_requeue_redelivers() {
        let broker = MemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.declare_queue(&QueueOptions::named("jobs", false, false)).await.unwrap();
        let mut jobs = conn.consume("jobs", false).await.unwrap();
        broker.publish("", "jobs", props(), Bytes::from("a")).unwrap();

        let first = jobs.recv().await.unwrap();
        assert!(!first.redelivered);
        conn.reject(first.delivery_tag, true).await.unwrap();
        let again = jobs.recv().await.unwrap();
        assert!(again.redelivered);
        conn.reject(again.delivery_tag, false).await.unwrap();

        assert_eq!(
            broker.rejected(),
            vec![(Bytes::from("a"), true), (Bytes::from("a"), false)]
        );
        assert_eq!(broker.queue_depth("jobs"), Some(0));
    }

    #[tokio::test]
    async fn test_disconnect_closes_consumers_and_requeues() {
        let broker = MemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.declare_queue(&QueueOptions::named("jobs", true, false)).await.unwrap();
        let anonymous = conn.declare_queue(&QueueOptions::anonymous()).await.unwrap();
        let mut jobs = conn.consume("jobs", false).await.unwrap();
        broker.publish("", "jobs", props(), Bytes::from("a")).unwrap();
        let _unacked = jobs.recv().await.unwrap();

        broker.disconnect();
        assert!(!conn.is_open());
        assert!(jobs.recv().await.is_none());
        assert_eq!(broker.queue_depth("jobs"), Some(1));
        assert_eq!(broker.queue_depth(&anonymous), None);
        assert!(matches!(conn.ack(1).await, Err(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_unavailable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        assert!(broker.connect().await.is_err());
        broker.set_available(true);
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connects(), 1);
    }
}

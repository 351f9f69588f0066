//! The message broker seam.
//!
//! The queue adapter talks to a broker only through [`Broker`] and
//! [`BrokerConnection`]. [`MemoryBroker`](super::MemoryBroker) implements
//! them in process; an AMQP client implements them over the network.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use switchyard_core::TransportError;
use tokio::sync::mpsc;

/// Result of a broker operation.
pub type BrokerResult<T> = Result<T, TransportError>;

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Routes on exact routing-key equality.
    Direct,
    /// Routes to every bound queue.
    Fanout,
    /// Routes on dotted patterns with `*` (one word) and `#` (any words).
    Topic,
}

impl ExchangeKind {
    /// Lower-case kind name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue declaration flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue name; `None` lets the broker generate one.
    pub name: Option<String>,
    /// Survives a broker restart.
    pub durable: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
    /// Owned by the declaring connection and deleted with it.
    pub exclusive: bool,
}

impl QueueOptions {
    /// Options for a named queue.
    pub fn named(name: impl Into<String>, durable: bool, auto_delete: bool) -> Self {
        Self {
            name: Some(name.into()),
            durable,
            auto_delete,
            exclusive: false,
        }
    }

    /// Options for a server-named, exclusive, auto-delete queue.
    pub fn anonymous() -> Self {
        Self {
            name: None,
            durable: false,
            auto_delete: true,
            exclusive: true,
        }
    }
}

/// Message properties carried next to the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Media type of the body.
    pub content_type: Option<String>,
    /// Charset of the body.
    pub content_encoding: Option<String>,
    /// Application id of the message.
    pub message_id: Option<String>,
    /// Application headers.
    pub headers: IndexMap<String, String>,
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Connection-scoped tag used to ack or reject.
    pub delivery_tag: u64,
    /// Exchange the message was published to; empty for the default exchange.
    pub exchange: String,
    /// Routing key it was published with.
    pub routing_key: String,
    /// The message was delivered before and not acknowledged.
    pub redelivered: bool,
    /// Message properties.
    pub properties: MessageProperties,
    /// Raw body.
    pub body: Bytes,
}

/// Opens connections to a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Opens a new connection.
    async fn connect(&self) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

/// One live connection (with its channel) to a broker.
///
/// A connection that is lost closes every receiver returned by
/// [`consume`](Self::consume); that is how consumers notice the loss.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Returns `false` once the connection is closed or lost.
    fn is_open(&self) -> bool;

    /// Limits unacknowledged deliveries on this connection. `0` means no limit.
    async fn set_prefetch(&self, count: u16) -> BrokerResult<()>;

    /// Declares an exchange. Redeclaring with the same kind is a no-op.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> BrokerResult<()>;

    /// Declares a queue and returns its name.
    async fn declare_queue(&self, options: &QueueOptions) -> BrokerResult<String>;

    /// Binds a queue to an exchange.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()>;

    /// Starts consuming a queue. With `no_ack` every delivery counts as
    /// acknowledged on send.
    async fn consume(&self, queue: &str, no_ack: bool) -> BrokerResult<mpsc::UnboundedReceiver<Delivery>>;

    /// Acknowledges a delivery.
    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()>;

    /// Rejects a delivery, optionally putting it back on its queue.
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()>;

    /// Publishes a message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> BrokerResult<()>;

    /// Closes the connection. Unacknowledged deliveries are requeued.
    async fn close(&self) -> BrokerResult<()>;
}

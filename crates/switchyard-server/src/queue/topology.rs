//! Exchanges, queues and bindings a service needs on the broker.

use switchyard_core::SetupError;

use super::broker::{BrokerConnection, BrokerResult, ExchangeKind, QueueOptions};

/// An exchange to declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDeclaration {
    /// Exchange name.
    pub name: String,
    /// Routing behaviour.
    pub kind: ExchangeKind,
    /// Survives a broker restart.
    pub durable: bool,
}

/// A named queue to declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    /// Queue name.
    pub name: String,
    /// Survives a broker restart.
    pub durable: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
}

/// A queue-to-exchange binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDeclaration {
    /// Bound queue.
    pub queue: String,
    /// Source exchange.
    pub exchange: String,
    /// Routing key or topic pattern.
    pub routing_key: String,
}

/// The broker topology of a service.
///
/// Attach it to a service with
/// [`Service::attach_child`](crate::Service::attach_child). The queue adapter
/// declares it once per connection, before consuming.
///
/// ```
/// use switchyard_server::queue::{ExchangeKind, Topology};
///
/// let topology = Topology::builder()
///     .prefetch(5)
///     .exchange("orders", ExchangeKind::Topic)
///     .queue("orders.audit")
///     .bind("orders.audit", "orders", "orders.#")
///     .build()
///     .unwrap();
/// assert_eq!(topology.prefetch(), Some(5));
/// assert!(topology.queues()[0].auto_delete);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    prefetch: Option<u16>,
    exchanges: Vec<ExchangeDeclaration>,
    queues: Vec<QueueDeclaration>,
    bindings: Vec<BindingDeclaration>,
}

impl Topology {
    /// Starts an empty topology.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Requested prefetch, if any.
    pub fn prefetch(&self) -> Option<u16> {
        self.prefetch
    }

    /// Declared exchanges.
    pub fn exchanges(&self) -> &[ExchangeDeclaration] {
        &self.exchanges
    }

    /// Declared named queues.
    pub fn queues(&self) -> &[QueueDeclaration] {
        &self.queues
    }

    /// Declared bindings.
    pub fn bindings(&self) -> &[BindingDeclaration] {
        &self.bindings
    }

    /// Adds the declarations of `other`.
    ///
    /// Identical declarations collapse. Two declarations of one name that
    /// disagree are a conflict. The smaller prefetch wins.
    pub fn merge(&mut self, other: &Topology) -> Result<(), SetupError> {
        self.prefetch = match (self.prefetch, other.prefetch) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        for exchange in &other.exchanges {
            match self.exchanges.iter().find(|e| e.name == exchange.name) {
                Some(existing) if existing != exchange => {
                    return Err(conflict(format!("exchange '{}' is declared differently", exchange.name)));
                }
                Some(_) => {}
                None => self.exchanges.push(exchange.clone()),
            }
        }
        for queue in &other.queues {
            match self.queues.iter().find(|q| q.name == queue.name) {
                Some(existing) if existing != queue => {
                    return Err(conflict(format!("queue '{}' is declared differently", queue.name)));
                }
                Some(_) => {}
                None => self.queues.push(queue.clone()),
            }
        }
        for binding in &other.bindings {
            if !self.bindings.contains(binding) {
                self.bindings.push(binding.clone());
            }
        }
        Ok(())
    }

    /// Declares everything on `connection`: exchanges, then queues, then
    /// bindings.
    pub async fn declare(&self, connection: &dyn BrokerConnection) -> BrokerResult<()> {
        for exchange in &self.exchanges {
            connection
                .declare_exchange(&exchange.name, exchange.kind, exchange.durable)
                .await?;
            tracing::debug!(exchange = %exchange.name, kind = %exchange.kind, "exchange declared");
        }
        for queue in &self.queues {
            connection
                .declare_queue(&QueueOptions::named(&queue.name, queue.durable, queue.auto_delete))
                .await?;
            tracing::debug!(queue = %queue.name, "queue declared");
        }
        for binding in &self.bindings {
            connection
                .bind_queue(&binding.queue, &binding.exchange, &binding.routing_key)
                .await?;
            tracing::debug!(
                queue = %binding.queue,
                exchange = %binding.exchange,
                routing_key = %binding.routing_key,
                "queue bound"
            );
        }
        Ok(())
    }
}

fn conflict(reason: String) -> SetupError {
    SetupError::InvalidTopology(reason)
}

/// Builder for [`Topology`]. The first conflict is reported by
/// [`build`](Self::build).
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: Topology,
    error: Option<SetupError>,
}

impl TopologyBuilder {
    /// Limits unacknowledged deliveries per connection.
    pub fn prefetch(mut self, count: u16) -> Self {
        self.topology.prefetch = Some(count);
        self
    }

    /// Declares a transient exchange.
    pub fn exchange(self, name: impl Into<String>, kind: ExchangeKind) -> Self {
        self.declare_exchange(name.into(), kind, false)
    }

    /// Declares a durable exchange.
    pub fn durable_exchange(self, name: impl Into<String>, kind: ExchangeKind) -> Self {
        self.declare_exchange(name.into(), kind, true)
    }

    /// Declares a transient, auto-delete queue.
    pub fn queue(self, name: impl Into<String>) -> Self {
        self.queue_with(name, false, true)
    }

    /// Declares a queue with explicit flags.
    pub fn queue_with(mut self, name: impl Into<String>, durable: bool, auto_delete: bool) -> Self {
        let name = name.into();
        if name.is_empty() {
            return self.fail("queue name is empty".to_string());
        }
        if self.topology.queues.iter().any(|q| q.name == name) {
            return self.fail(format!("queue '{name}' declared twice"));
        }
        self.topology.queues.push(QueueDeclaration {
            name,
            durable,
            auto_delete,
        });
        self
    }

    /// Binds a queue to an exchange.
    pub fn bind(mut self, queue: impl Into<String>, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        let binding = BindingDeclaration {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        };
        if binding.exchange.is_empty() {
            return self.fail(format!("queue '{}' cannot be bound to the default exchange", binding.queue));
        }
        if self.topology.bindings.contains(&binding) {
            return self.fail(format!(
                "binding of '{}' to '{}' with '{}' declared twice",
                binding.queue, binding.exchange, binding.routing_key
            ));
        }
        self.topology.bindings.push(binding);
        self
    }

    /// Finishes the topology.
    pub fn build(self) -> Result<Topology, SetupError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.topology),
        }
    }

    fn declare_exchange(mut self, name: String, kind: ExchangeKind, durable: bool) -> Self {
        if name.is_empty() {
            return self.fail("exchange name is empty".to_string());
        }
        if self.topology.exchanges.iter().any(|e| e.name == name) {
            return self.fail(format!("exchange '{name}' declared twice"));
        }
        self.topology.exchanges.push(ExchangeDeclaration { name, kind, durable });
        self
    }

    fn fail(mut self, reason: String) -> Self {
        if self.error.is_none() {
            self.error = Some(conflict(reason));
        }
        self
    }
}

//! Message-queue transport: the broker seam, an in-memory broker, topology
//! declarations, subscriptions and the adapter.

mod adapter;
mod broker;
mod memory;
mod subscription;
mod topology;

pub use adapter::{Publisher, QueueAdapter};
pub use broker::{
    Broker, BrokerConnection, BrokerResult, Delivery, ExchangeKind, MessageProperties, QueueOptions,
};
pub use memory::MemoryBroker;
pub use subscription::{AnonymousSubscription, Subscription};
pub use topology::{BindingDeclaration, ExchangeDeclaration, QueueDeclaration, Topology, TopologyBuilder};

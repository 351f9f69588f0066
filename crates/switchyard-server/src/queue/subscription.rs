//! Consumer metadata attached to endpoints.

use switchyard_core::SetupError;

/// Consumes one or more named queues.
///
/// With `ack` set (the default), a delivery is acknowledged only after the
/// endpoint succeeded and rejected otherwise. Without it, deliveries are
/// auto-acknowledged on receipt.
///
/// ```
/// use switchyard_server::queue::Subscription;
///
/// let subscription = Subscription::new(["jobs"]).unwrap();
/// assert!(subscription.ack);
/// assert!(!subscription.no_ack().ack);
/// assert!(Subscription::new(Vec::<String>::new()).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Queues to consume.
    pub queues: Vec<String>,
    /// Acknowledge after success.
    pub ack: bool,
}

impl Subscription {
    /// Subscribes to `queues`, which must not be empty.
    pub fn new<I, S>(queues: I) -> Result<Self, SetupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queues: Vec<String> = queues.into_iter().map(Into::into).collect();
        if queues.is_empty() {
            return Err(SetupError::InvalidTopology("a subscription needs at least one queue".to_string()));
        }
        Ok(Self { queues, ack: true })
    }

    /// Auto-acknowledge deliveries.
    pub fn no_ack(mut self) -> Self {
        self.ack = false;
        self
    }
}

/// Consumes a server-named exclusive queue bound to the given exchanges.
///
/// Each adapter connection gets its own queue, so every running instance
/// sees every matching message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousSubscription {
    /// `(exchange, routing key)` pairs.
    pub bindings: Vec<(String, String)>,
    /// Acknowledge after success.
    pub ack: bool,
}

impl AnonymousSubscription {
    /// Subscribes through `bindings`, which must not be empty.
    pub fn new<I, E, K>(bindings: I) -> Result<Self, SetupError>
    where
        I: IntoIterator<Item = (E, K)>,
        E: Into<String>,
        K: Into<String>,
    {
        let bindings: Vec<(String, String)> = bindings
            .into_iter()
            .map(|(exchange, key)| (exchange.into(), key.into()))
            .collect();
        if bindings.is_empty() {
            return Err(SetupError::InvalidTopology(
                "an anonymous subscription needs at least one binding".to_string(),
            ));
        }
        if let Some((_, key)) = bindings.iter().find(|(exchange, _)| exchange.is_empty()) {
            return Err(SetupError::InvalidTopology(format!(
                "binding '{key}' names the default exchange"
            )));
        }
        Ok(Self { bindings, ack: true })
    }

    /// Auto-acknowledge deliveries.
    pub fn no_ack(mut self) -> Self {
        self.ack = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_needs_bindings() {
        let empty: Vec<(String, String)> = Vec::new();
        assert!(AnonymousSubscription::new(empty).is_err());
        assert!(AnonymousSubscription::new([("", "key")]).is_err());

        let subscription = AnonymousSubscription::new([("events", "user.*")]).unwrap();
        assert_eq!(subscription.bindings, [("events".to_string(), "user.*".to_string())]);
        assert!(subscription.ack);
    }

    #[test]
    fn test_subscription_keeps_queue_order() {
        let subscription = Subscription::new(["b", "a"]).unwrap().no_ack();
        assert_eq!(subscription.queues, ["b", "a"]);
        assert!(!subscription.ack);
    }
}

use crate::amqp::{BrokerMessage, DecodeError, ExchangeType};
use crate::messaging::AckHandle;
use std::time::Duration;

/// Outgoing message wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageQueueMessage<T> {
    /// Optional message id, sent as the AMQP `message_id` property
    pub id: Option<String>,
    /// Message TTL; the broker drops the message if it is not consumed in time
    pub ttl: Option<Duration>,
    /// The message payload, encoded as JSON
    pub data: T,
}

impl<T> MessageQueueMessage<T> {
    pub fn new(data: T) -> Self {
        Self {
            id: None,
            ttl: None,
            data,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub name: String,
    pub kind: ExchangeType,
}

impl ExchangeDefinition {
    pub fn new(name: impl Into<String>, kind: ExchangeType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Where a message is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// The broker's default exchange; the routing key names the queue
    Default,
    /// A named exchange, asserted before each publish
    Exchange(ExchangeDefinition),
}

impl PublishTarget {
    pub fn exchange_name(&self) -> &str {
        match self {
            PublishTarget::Default => "",
            PublishTarget::Exchange(exchange) => &exchange.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefinition {
    pub name: String,
    pub durable: bool,
}

impl QueueDefinition {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Let the broker consider deliveries acknowledged on send.
    /// When set, `AckHandle::ack` is a no-op.
    pub auto_ack: bool,
    /// Queue message TTL. `None` or zero means no TTL.
    pub ttl: Option<Duration>,
}

/// Payload handed to a listener.
#[derive(Debug)]
pub enum MessagePayload<T> {
    Decoded(T),
    /// The payload was not valid JSON or did not match `T`.
    /// The raw delivery is passed on so it is never dropped silently.
    Undecodable {
        raw: BrokerMessage,
        error: DecodeError,
    },
}

/// A delivery as seen by a listener.
#[derive(Debug)]
pub struct IncomingMessage<T> {
    pub id: Option<String>,
    pub data: MessagePayload<T>,
    pub ack: AckHandle,
}

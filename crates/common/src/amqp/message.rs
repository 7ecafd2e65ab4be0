use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::time::Duration;

use crate::amqp::AmqpResult;

/// A delivery received from the broker.
///
/// Higher layers clone or borrow it; nothing above the broker client mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub payload: Bytes,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub message_id: Option<String>,
    /// Delivery attempts reported by the broker (`x-delivery-count`, quorum queues only)
    pub delivery_count: Option<u32>,
}

impl BrokerMessage {
    pub fn new(payload: impl Into<Bytes>, routing_key: impl Into<String>, delivery_tag: u64) -> Self {
        Self {
            payload: payload.into(),
            exchange: String::new(),
            routing_key: routing_key.into(),
            delivery_tag,
            redelivered: false,
            message_id: None,
            delivery_count: None,
        }
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn with_delivery_count(mut self, count: u32) -> Self {
        self.delivery_count = Some(count);
        self
    }

    /// Number of earlier delivery attempts.
    ///
    /// Classic queues only expose the redelivered flag, so without a broker
    /// count the answer saturates at 1.
    pub fn previous_deliveries(&self) -> u32 {
        match self.delivery_count {
            Some(count) => count,
            None if self.redelivered => 1,
            None => 0,
        }
    }

    /// Payload as UTF-8 text, lossy. Used for logging undecodable content.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    /// Per-queue message TTL (`x-message-ttl`)
    pub message_ttl: Option<Duration>,
}

impl QueueOptions {
    pub fn durable() -> Self {
        Self {
            durable: true,
            message_ttl: None,
        }
    }
}

/// Broker reply to a queue assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Mapped to the AMQP `expiration` property in milliseconds
    pub ttl: Option<Duration>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Broker treats deliveries as acknowledged on send
    pub no_ack: bool,
}

/// A consumer registered on the channel: its tag plus the delivery stream.
pub struct RawConsumer {
    pub consumer_tag: String,
    pub deliveries: BoxStream<'static, AmqpResult<BrokerMessage>>,
}

impl fmt::Debug for RawConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConsumer")
            .field("consumer_tag", &self.consumer_tag)
            .finish_non_exhaustive()
    }
}

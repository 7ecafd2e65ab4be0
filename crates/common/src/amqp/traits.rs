use crate::amqp::{
    AmqpResult, ConsumeOptions, ExchangeType, PublishOptions, QueueInfo, QueueOptions, RawConsumer,
};
use async_trait::async_trait;
use bytes::Bytes;

/// Trait for the primitive channel operations the broker client needs.
/// Abstracts an AMQP 0-9-1 channel so the client can be tested without a broker.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Declare an exchange; succeeds if it already exists with the same type
    async fn assert_exchange(&self, name: &str, kind: ExchangeType) -> AmqpResult<()>;

    /// Declare a queue; succeeds if it already exists with the same options
    async fn assert_queue(&self, name: &str, options: QueueOptions) -> AmqpResult<QueueInfo>;

    /// Bind a queue to an exchange with a routing pattern
    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> AmqpResult<()>;

    /// Write a message to the channel.
    /// `Ok` only means the client accepted the frame, not that anyone received it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> AmqpResult<()>;

    /// Start a consumer on a queue
    async fn consume(&self, queue: &str, options: ConsumeOptions) -> AmqpResult<RawConsumer>;

    /// Acknowledge a delivery, or every outstanding delivery up to it when `multiple`
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> AmqpResult<()>;

    /// Negatively acknowledge a delivery
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> AmqpResult<()>;

    /// Cancel a consumer; its delivery stream ends afterwards
    async fn cancel(&self, consumer_tag: &str) -> AmqpResult<()>;

    /// Close the channel and its connection
    async fn close(&self) -> AmqpResult<()>;
}

use crate::amqp::{
    AmqpChannel, AmqpError, AmqpResult, BrokerMessage, ConsumeOptions, ExchangeType,
    PublishOptions, QueueInfo, QueueOptions, RawConsumer,
};
use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument};

const REPLY_SUCCESS: u16 = 200;
const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

/// Concrete implementation of AmqpChannel using lapin.
/// Owns the single connection and channel used by the process.
pub struct LapinChannel {
    connection: Connection,
    channel: Channel,
    consumer_seq: AtomicU64,
}

impl LapinChannel {
    pub async fn connect(url: &str, timeout: Duration, prefetch_count: u16) -> AmqpResult<Self> {
        info!(
            timeout_ms = timeout.as_millis() as u64,
            prefetch_count, "Connecting to AMQP broker"
        );

        let connection = tokio::time::timeout(
            timeout,
            Connection::connect(url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            AmqpError::Connection(anyhow!(
                "timed out after {}ms waiting for the broker",
                timeout.as_millis()
            ))
        })?
        .map_err(|e| AmqpError::Connection(e.into()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| AmqpError::Connection(e.into()))?;

        if prefetch_count > 0 {
            channel
                .basic_qos(prefetch_count, BasicQosOptions::default())
                .await
                .map_err(|e| AmqpError::Channel(e.into()))?;
        }

        info!(channel_id = channel.id(), "Successfully connected to AMQP broker");
        Ok(Self {
            connection,
            channel,
            consumer_seq: AtomicU64::new(0),
        })
    }

    fn next_consumer_tag(&self, queue: &str) -> String {
        let seq = self.consumer_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}.consumer-{}", queue, seq)
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn assert_exchange(&self, name: &str, kind: ExchangeType) -> AmqpResult<()> {
        let kind = match kind {
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Fanout => ExchangeKind::Fanout,
            ExchangeType::Topic => ExchangeKind::Topic,
        };
        let options = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };

        self.channel
            .exchange_declare(name, kind, options, FieldTable::default())
            .await
            .map_err(|e| AmqpError::topology(name, e))
    }

    async fn assert_queue(&self, name: &str, options: QueueOptions) -> AmqpResult<QueueInfo> {
        let mut arguments = FieldTable::default();
        if let Some(ttl) = options.message_ttl {
            let ttl_ms = u32::try_from(ttl.as_millis()).unwrap_or(u32::MAX);
            arguments.insert("x-message-ttl".into(), AMQPValue::LongUInt(ttl_ms));
        }
        let declare_options = QueueDeclareOptions {
            durable: options.durable,
            ..Default::default()
        };

        let queue = self
            .channel
            .queue_declare(name, declare_options, arguments)
            .await
            .map_err(|e| AmqpError::topology(name, e))?;

        Ok(QueueInfo {
            name: queue.name().as_str().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> AmqpResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| AmqpError::topology(format!("{} -> {}", exchange, queue), e))
    }

    #[instrument(skip(self, payload, options), fields(exchange = %exchange, routing_key = %routing_key, payload_size = payload.len()))]
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> AmqpResult<()> {
        let mut properties = BasicProperties::default().with_content_type("application/json".into());
        if let Some(ttl) = options.ttl {
            properties = properties.with_expiration(ttl.as_millis().to_string().into());
        }
        if let Some(message_id) = options.message_id {
            properties = properties.with_message_id(message_id.into());
        }

        // The returned confirm is dropped: the channel is not in confirm mode
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| AmqpError::Channel(e.into()))?;
        Ok(())
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> AmqpResult<RawConsumer> {
        let consumer_tag = self.next_consumer_tag(queue);
        let consume_options = BasicConsumeOptions {
            no_ack: options.no_ack,
            ..Default::default()
        };

        let consumer = self
            .channel
            .basic_consume(queue, &consumer_tag, consume_options, FieldTable::default())
            .await
            .map_err(|e| AmqpError::Consume {
                queue: queue.to_string(),
                source: e.into(),
            })?;

        debug!(queue = %queue, consumer_tag = %consumer_tag, "Consumer started");

        let deliveries = consumer
            .map(|delivery| {
                delivery
                    .map(into_broker_message)
                    .map_err(|e| AmqpError::Channel(e.into()))
            })
            .boxed();

        Ok(RawConsumer {
            consumer_tag,
            deliveries,
        })
    }

    async fn ack(&self, delivery_tag: u64, multiple: bool) -> AmqpResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await
            .map_err(|e| AmqpError::Acknowledge {
                delivery_tag,
                source: e.into(),
            })
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> AmqpResult<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| AmqpError::Acknowledge {
                delivery_tag,
                source: e.into(),
            })
    }

    async fn cancel(&self, consumer_tag: &str) -> AmqpResult<()> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| AmqpError::Channel(e.into()))
    }

    async fn close(&self) -> AmqpResult<()> {
        let channel_result = self
            .channel
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|e| AmqpError::Channel(e.into()));

        // Close the connection even when the channel was already gone
        let connection_result = self
            .connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|e| AmqpError::Connection(e.into()));

        channel_result.and(connection_result)
    }
}

fn into_broker_message(mut delivery: Delivery) -> BrokerMessage {
    let message_id = delivery
        .properties
        .message_id()
        .as_ref()
        .map(|id| id.as_str().to_string());

    let delivery_count = delivery.properties.headers().as_ref().and_then(|headers| {
        headers
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)
            .and_then(|(_, value)| amqp_value_as_u32(value))
    });

    BrokerMessage {
        payload: Bytes::from(std::mem::take(&mut delivery.data)),
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
        message_id,
        delivery_count,
    }
}

fn amqp_value_as_u32(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::LongUInt(v) => Some(*v),
        AMQPValue::ShortShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

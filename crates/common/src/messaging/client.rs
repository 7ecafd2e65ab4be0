use crate::amqp::{
    AmqpClient, AmqpResult, ConsumeCallback, ConsumeOptions, DecodeError, PublishOptions,
    QueueOptions,
};
use crate::messaging::{
    AckHandle, IncomingMessage, MessageListener, MessagePayload, MessageQueueMessage,
    PublishTarget, QueueDefinition, Subscription, SubscriptionOptions,
};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Typed publish/subscribe on top of `AmqpClient`.
///
/// Publishing encodes the envelope data as JSON; subscribing decodes it back
/// and hands each delivery to a listener together with its `AckHandle`.
#[derive(Clone)]
pub struct MessageQueueClient {
    client: Arc<AmqpClient>,
}

impl MessageQueueClient {
    pub fn new(client: Arc<AmqpClient>) -> Self {
        Self { client }
    }

    pub async fn close(&self) {
        self.client.dispose().await;
    }

    /// Publish `message` to `target`.
    ///
    /// A named exchange is asserted first; a topology failure is returned as an
    /// error. Otherwise the result is the channel's acceptance flag.
    pub async fn publish<T>(
        &self,
        target: &PublishTarget,
        message: &MessageQueueMessage<T>,
        routing_key: &str,
    ) -> AmqpResult<bool>
    where
        T: Serialize + Sync,
    {
        debug!(
            exchange = %target.exchange_name(),
            routing_key = %routing_key,
            message_id = message.id.as_deref(),
            "publishing message to exchange with routing key"
        );

        if let PublishTarget::Exchange(exchange) = target {
            self.client
                .assert_exchange(&exchange.name, exchange.kind)
                .await?;
        }

        let options = PublishOptions {
            ttl: message.ttl,
            message_id: message.id.clone(),
        };
        Ok(self
            .client
            .send(target.exchange_name(), &message.data, routing_key, options)
            .await)
    }

    /// Assert `queue` and start delivering its messages to `listener`.
    ///
    /// Deliveries are handed over one at a time. A listener error or panic is
    /// logged here and never reaches the dispatch loop.
    pub async fn subscribe<T>(
        &self,
        queue: &QueueDefinition,
        listener: Arc<dyn MessageListener<T>>,
        options: SubscriptionOptions,
    ) -> AmqpResult<Subscription>
    where
        T: DeserializeOwned + Send + 'static,
    {
        debug!(
            queue = %queue.name,
            auto_ack = options.auto_ack,
            ttl_ms = options.ttl.map(|ttl| ttl.as_millis() as u64),
            "subscribing to queue with options"
        );

        let queue_options = QueueOptions {
            durable: queue.durable,
            message_ttl: options.ttl.filter(|ttl| !ttl.is_zero()),
        };
        self.client.assert_queue(&queue.name, queue_options).await?;

        let callback = self.listener_callback(queue.name.clone(), listener, options.auto_ack);
        let consumer = self
            .client
            .consume(
                &queue.name,
                ConsumeOptions {
                    no_ack: options.auto_ack,
                },
                callback,
            )
            .await?;

        Ok(Subscription::new(
            self.client.clone(),
            queue.name.clone(),
            vec![consumer],
        ))
    }

    fn listener_callback<T>(
        &self,
        queue: String,
        listener: Arc<dyn MessageListener<T>>,
        auto_ack: bool,
    ) -> ConsumeCallback
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.client.clone();

        Arc::new(move |parsed, raw| {
            let client = client.clone();
            let listener = listener.clone();
            let queue = queue.clone();

            Box::pin(async move {
                let delivery_tag = raw.delivery_tag;
                let ack = AckHandle::new(client, raw.clone(), auto_ack);

                let decoded = parsed.and_then(|value| {
                    serde_json::from_value::<T>(value).map_err(DecodeError::from)
                });
                let data = match decoded {
                    Ok(data) => MessagePayload::Decoded(data),
                    Err(error) => {
                        warn!(
                            queue = %queue,
                            delivery_tag,
                            content = %raw.payload_text(),
                            error = %error,
                            "received a message which can not be decoded"
                        );
                        MessagePayload::Undecodable {
                            raw: raw.clone(),
                            error,
                        }
                    }
                };

                let message = IncomingMessage {
                    id: raw.message_id.clone(),
                    data,
                    ack,
                };

                match AssertUnwindSafe(listener.on_message(message))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(
                            queue = %queue,
                            delivery_tag,
                            error = ?e,
                            "error while processing message"
                        );
                    }
                    Err(_) => {
                        error!(queue = %queue, delivery_tag, "listener panicked while processing message");
                    }
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::{AmqpError, BrokerMessage, ExchangeType, MockAmqpChannel, QueueInfo, RawConsumer};
    use crate::messaging::ExchangeDefinition;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use mockall::predicate::*;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Reading {
        lecture_id: String,
        value: u32,
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Decoded(Reading),
        Undecodable(u64),
    }

    struct RecordingListener {
        seen: mpsc::UnboundedSender<Seen>,
        ack_twice: bool,
        fail_on: Option<u32>,
    }

    #[async_trait]
    impl MessageListener<Reading> for RecordingListener {
        async fn on_message(&self, message: IncomingMessage<Reading>) -> anyhow::Result<()> {
            match message.data {
                MessagePayload::Decoded(reading) => {
                    let value = reading.value;
                    let _ = self.seen.send(Seen::Decoded(reading));
                    if self.fail_on == Some(value) {
                        return Err(anyhow!("cannot handle value {}", value));
                    }
                    message.ack.ack().await;
                    if self.ack_twice {
                        message.ack.ack().await;
                    }
                }
                MessagePayload::Undecodable { raw, .. } => {
                    let _ = self.seen.send(Seen::Undecodable(raw.delivery_tag));
                }
            }
            Ok(())
        }
    }

    fn queue_info(name: &str) -> QueueInfo {
        QueueInfo {
            name: name.to_string(),
            message_count: 0,
            consumer_count: 0,
        }
    }

    fn expect_durable_queue(mock_channel: &mut MockAmqpChannel, queue: &'static str) {
        mock_channel
            .expect_assert_queue()
            .withf(move |name: &str, options: &QueueOptions| {
                name == queue && options.durable && options.message_ttl.is_none()
            })
            .times(1)
            .returning(|name, _| Ok(queue_info(name)));
    }

    fn expect_deliveries(mock_channel: &mut MockAmqpChannel, messages: Vec<BrokerMessage>) {
        mock_channel
            .expect_consume()
            .times(1)
            .return_once(move |_, _| {
                Ok(RawConsumer {
                    consumer_tag: "ctag-1".to_string(),
                    deliveries: stream::iter(messages.into_iter().map(Ok)).boxed(),
                })
            });
    }

    fn reading_message(tag: u64, value: u32) -> BrokerMessage {
        let payload = serde_json::to_vec(&Reading {
            lecture_id: "L".to_string(),
            value,
        })
        .unwrap();
        BrokerMessage::new(payload, "pcount-replay-queue", tag)
    }

    #[tokio::test]
    async fn test_close_disposes_the_broker_client_once() {
        let mut mock_channel = MockAmqpChannel::new();
        mock_channel.expect_close().times(1).returning(|| Ok(()));

        let amqp_client = Arc::new(AmqpClient::new(Arc::new(mock_channel)));
        let client = MessageQueueClient::new(Arc::clone(&amqp_client));

        client.close().await;
        client.clone().close().await;

        assert!(!amqp_client.is_connected());
    }

    #[tokio::test]
    async fn test_publish_to_default_exchange_skips_assertion() {
        let mut mock_channel = MockAmqpChannel::new();
        mock_channel.expect_assert_exchange().never();
        mock_channel
            .expect_publish()
            .withf(|exchange, routing_key, _, options| {
                exchange.is_empty()
                    && routing_key == "pcount-request-queue"
                    && options.ttl.is_none()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let client = MessageQueueClient::new(Arc::new(AmqpClient::new(Arc::new(mock_channel))));
        let accepted = client
            .publish(
                &PublishTarget::Default,
                &MessageQueueMessage::new(serde_json::json!({ "lectureId": "L" })),
                "pcount-request-queue",
            )
            .await
            .unwrap();

        assert!(accepted);
    }

    #[tokio::test]
    async fn test_publish_to_named_exchange_asserts_and_maps_ttl() {
        let mut mock_channel = MockAmqpChannel::new();
        mock_channel
            .expect_assert_exchange()
            .withf(|name: &str, kind: &ExchangeType| {
                name == "pcount-exchange" && *kind == ExchangeType::Direct
            })
            .times(1)
            .returning(|_, _| Ok(()));
        mock_channel
            .expect_publish()
            .withf(|exchange, routing_key, payload, options| {
                exchange == "pcount-exchange"
                    && routing_key == "pcount-request"
                    && payload.as_ref() == br#"{"lectureId":"L","value":1}"#
                    && options.ttl == Some(Duration::from_millis(1500))
                    && options.message_id.as_deref() == Some("msg-1")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let client = MessageQueueClient::new(Arc::new(AmqpClient::new(Arc::new(mock_channel))));
        let target =
            PublishTarget::Exchange(ExchangeDefinition::new("pcount-exchange", ExchangeType::Direct));
        let message = MessageQueueMessage::new(Reading {
            lecture_id: "L".to_string(),
            value: 1,
        })
        .with_id("msg-1")
        .with_ttl(Duration::from_millis(1500));

        let accepted = client
            .publish(&target, &message, "pcount-request")
            .await
            .unwrap();

        assert!(accepted);
    }

    #[tokio::test]
    async fn test_publish_topology_failure_is_an_error() {
        let mut mock_channel = MockAmqpChannel::new();
        mock_channel
            .expect_assert_exchange()
            .times(1)
            .returning(|name, _| Err(AmqpError::topology(name, anyhow!("PRECONDITION_FAILED"))));
        mock_channel.expect_publish().never();

        let client = MessageQueueClient::new(Arc::new(AmqpClient::new(Arc::new(mock_channel))));
        let target =
            PublishTarget::Exchange(ExchangeDefinition::new("pcount-exchange", ExchangeType::Direct));

        let result = client
            .publish(&target, &MessageQueueMessage::new(1), "pcount-request")
            .await;

        assert!(matches!(result, Err(AmqpError::Topology { .. })));
    }

    #[tokio::test]
    async fn test_subscribe_delivers_decoded_message_and_acks_once() {
        let mut mock_channel = MockAmqpChannel::new();
        expect_durable_queue(&mut mock_channel, "pcount-replay-queue");
        expect_deliveries(&mut mock_channel, vec![reading_message(1, 3)]);
        mock_channel
            .expect_ack()
            .with(eq(1u64), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let client = MessageQueueClient::new(Arc::new(AmqpClient::new(Arc::new(mock_channel))));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn MessageListener<Reading>> = Arc::new(RecordingListener {
            seen: tx,
            ack_twice: true,
            fail_on: None,
        });

        let mut subscription = client
            .subscribe(
                &QueueDefinition::durable("pcount-replay-queue"),
                listener,
                SubscriptionOptions::default(),
            )
            .await
            .unwrap();
        subscription.closed().await;

        assert_eq!(subscription.consumer_tags(), vec!["ctag-1"]);
        assert_eq!(
            rx.recv().await,
            Some(Seen::Decoded(Reading {
                lecture_id: "L".to_string(),
                value: 3
            }))
        );
    }

    #[tokio::test]
    async fn test_subscribe_hands_undecodable_message_to_listener() {
        let mut mock_channel = MockAmqpChannel::new();
        expect_durable_queue(&mut mock_channel, "pcount-replay-queue");
        expect_deliveries(
            &mut mock_channel,
            vec![
                BrokerMessage::new("{broken", "pcount-replay-queue", 1),
                BrokerMessage::new(r#"{"unexpected":true}"#, "pcount-replay-queue", 2),
            ],
        );
        mock_channel.expect_ack().never();

        let client = MessageQueueClient::new(Arc::new(AmqpClient::new(Arc::new(mock_channel))));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn MessageListener<Reading>> = Arc::new(RecordingListener {
            seen: tx,
            ack_twice: false,
            fail_on: None,
        });

        let mut subscription = client
            .subscribe(
                &QueueDefinition::durable("pcount-replay-queue"),
                listener,
                SubscriptionOptions::default(),
            )
            .await
            .unwrap();
        subscription.closed().await;

        assert_eq!(rx.recv().await, Some(Seen::Undecodable(1)));
        assert_eq!(rx.recv().await, Some(Seen::Undecodable(2)));
    }

    #[tokio::test]
    async fn test_listener_error_does_not_stop_dispatch() {
        let mut mock_channel = MockAmqpChannel::new();
        expect_durable_queue(&mut mock_channel, "pcount-replay-queue");
        expect_deliveries(
            &mut mock_channel,
            vec![reading_message(1, 13), reading_message(2, 4)],
        );
        mock_channel
            .expect_ack()
            .with(eq(2u64), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let client = MessageQueueClient::new(Arc::new(AmqpClient::new(Arc::new(mock_channel))));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn MessageListener<Reading>> = Arc::new(RecordingListener {
            seen: tx,
            ack_twice: false,
            fail_on: Some(13),
        });

        let mut subscription = client
            .subscribe(
                &QueueDefinition::durable("pcount-replay-queue"),
                listener,
                SubscriptionOptions::default(),
            )
            .await
            .unwrap();
        subscription.closed().await;

        assert!(matches!(rx.recv().await, Some(Seen::Decoded(r)) if r.value == 13));
        assert!(matches!(rx.recv().await, Some(Seen::Decoded(r)) if r.value == 4));
    }

    #[tokio::test]
    async fn test_subscribe_with_ttl_and_auto_ack() {
        let mut mock_channel = MockAmqpChannel::new();
        mock_channel
            .expect_assert_queue()
            .withf(|name: &str, options: &QueueOptions| {
                name == "events" && options.message_ttl == Some(Duration::from_secs(60))
            })
            .times(1)
            .returning(|name, _| Ok(queue_info(name)));
        mock_channel
            .expect_consume()
            .withf(|queue: &str, options: &ConsumeOptions| queue == "events" && options.no_ack)
            .times(1)
            .returning(|_, _| {
                Ok(RawConsumer {
                    consumer_tag: "ctag-1".to_string(),
                    deliveries: stream::iter(vec![Ok(reading_message(1, 1))]).boxed(),
                })
            });
        mock_channel.expect_ack().never();

        let client = MessageQueueClient::new(Arc::new(AmqpClient::new(Arc::new(mock_channel))));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn MessageListener<Reading>> = Arc::new(RecordingListener {
            seen: tx,
            ack_twice: false,
            fail_on: None,
        });

        let mut subscription = client
            .subscribe(
                &QueueDefinition::durable("events"),
                listener,
                SubscriptionOptions {
                    auto_ack: true,
                    ttl: Some(Duration::from_secs(60)),
                },
            )
            .await
            .unwrap();
        subscription.closed().await;

        assert!(matches!(rx.recv().await, Some(Seen::Decoded(_))));
    }

    #[tokio::test]
    async fn test_subscribe_queue_assertion_failure() {
        let mut mock_channel = MockAmqpChannel::new();
        mock_channel
            .expect_assert_queue()
            .times(1)
            .returning(|name, _| Err(AmqpError::topology(name, anyhow!("ACCESS_REFUSED"))));
        mock_channel.expect_consume().never();

        let client = MessageQueueClient::new(Arc::new(AmqpClient::new(Arc::new(mock_channel))));
        let (tx, _rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn MessageListener<Reading>> = Arc::new(RecordingListener {
            seen: tx,
            ack_twice: false,
            fail_on: None,
        });

        let result = client
            .subscribe(
                &QueueDefinition::durable("pcount-replay-queue"),
                listener,
                SubscriptionOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(AmqpError::Topology { .. })));
    }
}

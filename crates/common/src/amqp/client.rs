use crate::amqp::{
    AmqpChannel, AmqpResult, BrokerMessage, ConsumeOptions, DecodeError, ExchangeType,
    LapinChannel, PublishOptions, QueueInfo, QueueOptions,
};
use futures::future::BoxFuture;
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback invoked for every delivery of a consumer.
/// Receives the JSON-parsed payload (or the decode error) alongside the raw message.
pub type ConsumeCallback = Arc<
    dyn Fn(Result<serde_json::Value, DecodeError>, BrokerMessage) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RegisteredConsumer {
    queue: String,
    consumer_tag: String,
}

/// A running consumer: its tag and the task dispatching its deliveries.
#[derive(Debug)]
pub struct ConsumerHandle {
    queue: String,
    consumer_tag: String,
    task: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Wait until the dispatch task stops (consumer cancelled or channel closed)
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let joined = task.await;
            self.task = None;
            if let Err(e) = joined {
                error!(consumer_tag = %self.consumer_tag, error = %e, "Dispatch task failed");
            }
        }
    }
}

/// Low level AMQP client owning the process-wide channel.
///
/// Every consumer gets its own dispatch task; deliveries of one consumer are
/// handed to the callback strictly one after another.
pub struct AmqpClient {
    channel: Arc<dyn AmqpChannel>,
    consumers: Mutex<Vec<RegisteredConsumer>>,
    connected: AtomicBool,
}

impl AmqpClient {
    pub fn new(channel: Arc<dyn AmqpChannel>) -> Self {
        Self {
            channel,
            consumers: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub async fn connect(url: &str, timeout: Duration, prefetch_count: u16) -> AmqpResult<Self> {
        let channel = LapinChannel::connect(url, timeout, prefetch_count).await?;
        Ok(Self::new(Arc::new(channel)))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Cancel every registered consumer and close the channel.
    ///
    /// Safe to call more than once; only the first call touches the broker.
    /// Close failures are logged and swallowed.
    pub async fn dispose(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            debug!("AMQP client already disposed");
            return;
        }

        info!("Closing the AMQP connection");

        let consumers = std::mem::take(&mut *self.consumers.lock().await);
        for consumer in consumers {
            if let Err(e) = self.channel.cancel(&consumer.consumer_tag).await {
                debug!(
                    queue = %consumer.queue,
                    consumer_tag = %consumer.consumer_tag,
                    error = %e,
                    "Can not cancel consumer (probably already closed)"
                );
            }
        }

        if let Err(e) = self.channel.close().await {
            warn!(error = %e, "Can not close the channel (probably already closed)");
        }
    }

    pub async fn assert_exchange(&self, exchange: &str, kind: ExchangeType) -> AmqpResult<()> {
        debug!(exchange = %exchange, kind = %kind, "Assert exchange");
        self.channel.assert_exchange(exchange, kind).await
    }

    pub async fn assert_queue(&self, name: &str, options: QueueOptions) -> AmqpResult<QueueInfo> {
        debug!(queue = %name, durable = options.durable, "Assert queue");
        let queue = self.channel.assert_queue(name, options).await?;
        debug!(
            queue = %queue.name,
            message_count = queue.message_count,
            consumer_count = queue.consumer_count,
            "Queue asserted"
        );
        Ok(queue)
    }

    pub async fn assert_binding(
        &self,
        queue: &str,
        exchange: &str,
        routing_pattern: &str,
    ) -> AmqpResult<()> {
        debug!(
            queue = %queue,
            exchange = %exchange,
            routing_pattern = %routing_pattern,
            "Bind queue on exchange"
        );
        self.channel.bind_queue(queue, exchange, routing_pattern).await
    }

    /// JSON-encode `data` and write it to the channel.
    ///
    /// Returns whether the client accepted the write. `true` is not a delivery
    /// confirmation.
    pub async fn send<T>(
        &self,
        exchange: &str,
        data: &T,
        routing_key: &str,
        options: PublishOptions,
    ) -> bool
    where
        T: Serialize + ?Sized,
    {
        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            ttl_ms = options.ttl.map(|ttl| ttl.as_millis() as u64),
            "Publish message to exchange"
        );

        let payload = match serde_json::to_vec(data) {
            Ok(payload) => payload,
            Err(e) => {
                error!(exchange = %exchange, error = %e, "Can not encode the outgoing message");
                return false;
            }
        };

        match self
            .channel
            .publish(exchange, routing_key, payload.into(), options)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    exchange = %exchange,
                    routing_key = %routing_key,
                    error = %e,
                    "Publish was not accepted by the channel"
                );
                false
            }
        }
    }

    /// Register a consumer on `queue` and start dispatching its deliveries.
    ///
    /// Payloads are parsed as JSON here; a payload that fails to parse is still
    /// handed to the callback, with the decode error in place of the value.
    pub async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
        callback: ConsumeCallback,
    ) -> AmqpResult<ConsumerHandle> {
        debug!(queue = %queue, no_ack = options.no_ack, "Consume queue");

        let raw = self.channel.consume(queue, options).await?;
        let consumer_tag = raw.consumer_tag;
        self.register_consumer(queue, &consumer_tag).await;

        let mut deliveries = raw.deliveries;
        let task_queue = queue.to_string();
        let task_tag = consumer_tag.clone();
        let task = tokio::spawn(async move {
            while let Some(delivery) = deliveries.next().await {
                let message = match delivery {
                    Ok(message) => message,
                    Err(e) => {
                        error!(queue = %task_queue, error = %e, "Error receiving delivery");
                        continue;
                    }
                };

                let parsed = serde_json::from_slice::<serde_json::Value>(&message.payload)
                    .map_err(DecodeError::from);
                if let Err(ref e) = parsed {
                    warn!(
                        queue = %task_queue,
                        delivery_tag = message.delivery_tag,
                        error = %e,
                        "Can not parse the incoming message"
                    );
                }

                callback(parsed, message).await;
            }
            debug!(queue = %task_queue, consumer_tag = %task_tag, "Delivery stream ended");
        });

        Ok(ConsumerHandle {
            queue: queue.to_string(),
            consumer_tag,
            task: Some(task),
        })
    }

    /// Stop a single consumer. Its dispatch task ends once the broker confirms.
    pub async fn cancel(&self, consumer_tag: &str) -> AmqpResult<()> {
        self.consumers
            .lock()
            .await
            .retain(|consumer| consumer.consumer_tag != consumer_tag);
        self.channel.cancel(consumer_tag).await
    }

    pub async fn ack(&self, message: &BrokerMessage, all_up_to: bool) -> AmqpResult<()> {
        debug!(delivery_tag = message.delivery_tag, all_up_to, "Ack message");
        self.channel.ack(message.delivery_tag, all_up_to).await
    }

    pub async fn reject(&self, message: &BrokerMessage, requeue: bool) -> AmqpResult<()> {
        debug!(delivery_tag = message.delivery_tag, requeue, "Reject message");
        self.channel.reject(message.delivery_tag, requeue).await
    }

    /// Consumer tags currently registered for `queue`
    pub async fn consumer_tags(&self, queue: &str) -> Vec<String> {
        self.consumers
            .lock()
            .await
            .iter()
            .filter(|consumer| consumer.queue == queue)
            .map(|consumer| consumer.consumer_tag.clone())
            .collect()
    }

    async fn register_consumer(&self, queue: &str, consumer_tag: &str) {
        self.consumers.lock().await.push(RegisteredConsumer {
            queue: queue.to_string(),
            consumer_tag: consumer_tag.to_string(),
        });
        info!(
            queue = %queue,
            consumer_tag = %consumer_tag,
            "A new consumer has been created"
        );
    }
}

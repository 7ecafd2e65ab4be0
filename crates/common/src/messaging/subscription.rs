use crate::amqp::{AmqpClient, AmqpResult, ConsumerHandle};
use std::sync::Arc;
use tracing::debug;

/// Handle returned by `MessageQueueClient::subscribe`.
///
/// Carries the consumer tags it created, so cancelling a subscription never
/// depends on looking up the listener that was registered.
pub struct Subscription {
    client: Arc<AmqpClient>,
    queue: String,
    consumers: Vec<ConsumerHandle>,
}

impl Subscription {
    pub(crate) fn new(client: Arc<AmqpClient>, queue: String, consumers: Vec<ConsumerHandle>) -> Self {
        Self {
            client,
            queue,
            consumers,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tags(&self) -> Vec<&str> {
        self.consumers
            .iter()
            .map(|consumer| consumer.consumer_tag())
            .collect()
    }

    /// Wait until every consumer of this subscription has stopped
    pub async fn closed(&mut self) {
        for consumer in &mut self.consumers {
            consumer.closed().await;
        }
    }

    /// Cancel the consumers and wait for in-flight deliveries to finish
    pub async fn cancel(mut self) -> AmqpResult<()> {
        debug!(queue = %self.queue, consumers = self.consumers.len(), "Cancelling subscription");
        let mut first_error = None;
        for consumer in &self.consumers {
            if let Err(e) = self.client.cancel(consumer.consumer_tag()).await {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.closed().await;
        Ok(())
    }
}

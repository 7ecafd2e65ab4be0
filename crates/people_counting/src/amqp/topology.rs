use common::amqp::{AmqpClient, AmqpResult, ExchangeType, QueueOptions};
use common::messaging::{ExchangeDefinition, PublishTarget, QueueDefinition};
use tracing::info;

/// Exchange, queues and binding used by the counting exchange of messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountingTopology {
    pub exchange: String,
    pub routing_key: String,
    pub request_queue: String,
    pub result_queue: String,
}

impl Default for CountingTopology {
    fn default() -> Self {
        Self {
            exchange: "pcount-exchange".to_string(),
            routing_key: "pcount-request".to_string(),
            request_queue: "pcount-request-queue".to_string(),
            result_queue: "pcount-replay-queue".to_string(),
        }
    }
}

impl CountingTopology {
    /// Assert the exchange, both queues and the request binding.
    /// Every step is idempotent; the first failure is returned.
    pub async fn assert(&self, client: &AmqpClient) -> AmqpResult<()> {
        client
            .assert_exchange(&self.exchange, ExchangeType::Direct)
            .await?;
        client
            .assert_queue(&self.request_queue, QueueOptions::durable())
            .await?;
        client
            .assert_binding(&self.request_queue, &self.exchange, &self.routing_key)
            .await?;
        client
            .assert_queue(&self.result_queue, QueueOptions::durable())
            .await?;

        info!(
            exchange = %self.exchange,
            routing_key = %self.routing_key,
            request_queue = %self.request_queue,
            result_queue = %self.result_queue,
            "people counting topology asserted"
        );
        Ok(())
    }

    pub fn request_target(&self) -> PublishTarget {
        PublishTarget::Exchange(ExchangeDefinition::new(
            self.exchange.clone(),
            ExchangeType::Direct,
        ))
    }

    pub fn result_queue_definition(&self) -> QueueDefinition {
        QueueDefinition::durable(self.result_queue.clone())
    }
}

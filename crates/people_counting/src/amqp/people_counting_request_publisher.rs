use crate::amqp::CountingTopology;
use async_trait::async_trait;
use common::domain::{
    DomainError, DomainResult, PeopleCountingPublisher, PeopleCountingRequest,
};
use common::messaging::{MessageQueueClient, MessageQueueMessage, PublishTarget};
use tracing::{debug, warn};

/// Publishes counting requests to the request exchange
pub struct PeopleCountingRequestPublisher {
    client: MessageQueueClient,
    target: PublishTarget,
    routing_key: String,
}

impl PeopleCountingRequestPublisher {
    pub fn new(client: MessageQueueClient, topology: &CountingTopology) -> Self {
        debug!(
            exchange = %topology.exchange,
            routing_key = %topology.routing_key,
            "initialized PeopleCountingRequestPublisher"
        );

        Self {
            client,
            target: topology.request_target(),
            routing_key: topology.routing_key.clone(),
        }
    }
}

#[async_trait]
impl PeopleCountingPublisher for PeopleCountingRequestPublisher {
    async fn publish(&self, request: PeopleCountingRequest) -> DomainResult<()> {
        debug!(
            lecture_id = %request.lecture_id,
            photo_count = request.photos.len(),
            "publishing people counting request"
        );

        let accepted = self
            .client
            .publish(&self.target, &MessageQueueMessage::new(&request), &self.routing_key)
            .await
            .map_err(|e| DomainError::PublishError(e.to_string()))?;

        if !accepted {
            warn!(
                lecture_id = %request.lecture_id,
                exchange = %self.target.exchange_name(),
                routing_key = %self.routing_key,
                "people counting request was not accepted by the channel"
            );
        }
        Ok(())
    }
}

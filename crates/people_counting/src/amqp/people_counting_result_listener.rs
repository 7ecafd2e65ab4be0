use crate::domain::LecturePhotoService;
use async_trait::async_trait;
use common::domain::PeopleCountingResult;
use common::messaging::{AckHandle, IncomingMessage, MessageListener, MessagePayload};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultConsumerConfig {
    /// Redeliveries allowed before a failing result is rejected without requeue.
    /// `None` leaves failed results unacked.
    pub max_redeliveries: Option<u32>,
}

/// Applies counting results from the result queue.
///
/// A result is acked only after it was fully reconciled into the store.
pub struct PeopleCountingResultListener {
    service: Arc<LecturePhotoService>,
    config: ResultConsumerConfig,
}

impl PeopleCountingResultListener {
    pub fn new(service: Arc<LecturePhotoService>, config: ResultConsumerConfig) -> Self {
        Self { service, config }
    }

    async fn settle_failure(&self, ack: &AckHandle) {
        let Some(max_redeliveries) = self.config.max_redeliveries else {
            debug!(
                delivery_tag = ack.message().delivery_tag,
                "leaving counting result unacked"
            );
            return;
        };

        let previous = ack.message().previous_deliveries();
        if previous < max_redeliveries {
            debug!(
                delivery_tag = ack.message().delivery_tag,
                previous_deliveries = previous,
                max_redeliveries,
                "requeueing counting result"
            );
            ack.reject(true).await;
        } else {
            warn!(
                delivery_tag = ack.message().delivery_tag,
                previous_deliveries = previous,
                max_redeliveries,
                "giving up on counting result"
            );
            ack.reject(false).await;
        }
    }
}

#[async_trait]
impl MessageListener<PeopleCountingResult> for PeopleCountingResultListener {
    async fn on_message(&self, message: IncomingMessage<PeopleCountingResult>) -> anyhow::Result<()> {
        let IncomingMessage { data, ack, .. } = message;

        let result = match data {
            MessagePayload::Decoded(result) => result,
            MessagePayload::Undecodable { raw, error } => {
                warn!(
                    delivery_tag = raw.delivery_tag,
                    error = %error,
                    "could not decode people counting result"
                );
                self.settle_failure(&ack).await;
                return Ok(());
            }
        };

        let lecture_id = result.lecture_id.clone();
        match self.service.add_people_counting_results(result).await {
            Ok(items) => {
                debug!(
                    lecture_id = %lecture_id,
                    item_count = items.len(),
                    "added people counting result"
                );
                ack.ack().await;
            }
            Err(e) => {
                error!(
                    lecture_id = %lecture_id,
                    error = %e,
                    "could not add people counting result"
                );
                self.settle_failure(&ack).await;
            }
        }
        Ok(())
    }
}

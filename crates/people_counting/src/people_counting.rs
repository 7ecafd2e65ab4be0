use crate::amqp::{
    CountingTopology, PeopleCountingRequestPublisher, PeopleCountingResultListener,
    ResultConsumerConfig,
};
use crate::domain::LecturePhotoService;
use anyhow::anyhow;
use common::amqp::AmqpClient;
use common::domain::LectureStore;
use common::messaging::{MessageQueueClient, Subscription, SubscriptionOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct PeopleCountingConfig {
    pub topology: CountingTopology,
    pub result_consumer: ResultConsumerConfig,
}

/// People counting module: request publishing and result consumption
pub struct PeopleCounting {
    service: Arc<LecturePhotoService>,
    subscription: Subscription,
}

impl PeopleCounting {
    pub async fn new(
        store: Arc<dyn LectureStore>,
        amqp_client: Arc<AmqpClient>,
        config: PeopleCountingConfig,
    ) -> anyhow::Result<Self> {
        debug!("initializing people counting module");

        config.topology.assert(&amqp_client).await?;

        let messaging = MessageQueueClient::new(amqp_client);
        let publisher = Arc::new(PeopleCountingRequestPublisher::new(
            messaging.clone(),
            &config.topology,
        ));
        let service = Arc::new(LecturePhotoService::new(store, publisher));

        let listener = Arc::new(PeopleCountingResultListener::new(
            Arc::clone(&service),
            config.result_consumer,
        ));
        let subscription = messaging
            .subscribe(
                &config.topology.result_queue_definition(),
                listener,
                SubscriptionOptions::default(),
            )
            .await?;

        info!(
            result_queue = %config.topology.result_queue,
            max_redeliveries = ?config.result_consumer.max_redeliveries,
            "listening for people counting results"
        );

        Ok(Self {
            service,
            subscription,
        })
    }

    pub fn service(&self) -> Arc<LecturePhotoService> {
        Arc::clone(&self.service)
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        // Result consumer process - runs until shutdown, then cancels its consumers
        Box::new({
            let mut subscription = self.subscription;
            move |ctx| {
                Box::pin(async move {
                    let stopped = tokio::select! {
                        _ = ctx.cancelled() => false,
                        _ = subscription.closed() => true,
                    };
                    if stopped {
                        return Err(anyhow!(
                            "consumer on {} stopped unexpectedly",
                            subscription.queue()
                        ));
                    }

                    debug!(queue = %subscription.queue(), "stopping people counting consumer");
                    subscription.cancel().await?;
                    Ok(())
                })
            }
        })
    }
}

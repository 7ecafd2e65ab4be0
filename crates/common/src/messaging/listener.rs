use crate::messaging::IncomingMessage;
use async_trait::async_trait;

/// Receives the deliveries of one subscription.
///
/// Returning an error is logged by the facade and leaves the message unsettled
/// unless the listener already acked or rejected it.
#[async_trait]
pub trait MessageListener<T: Send + 'static>: Send + Sync {
    async fn on_message(&self, message: IncomingMessage<T>) -> anyhow::Result<()>;
}

use crate::amqp::{AmqpClient, BrokerMessage};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Settles one delivery.
///
/// Clones share state: once any clone has acked or rejected the delivery,
/// further calls are logged and ignored.
#[derive(Clone)]
pub struct AckHandle {
    inner: Arc<AckState>,
}

struct AckState {
    client: Arc<AmqpClient>,
    message: BrokerMessage,
    auto_ack: bool,
    settled: AtomicBool,
}

impl AckHandle {
    pub fn new(client: Arc<AmqpClient>, message: BrokerMessage, auto_ack: bool) -> Self {
        Self {
            inner: Arc::new(AckState {
                client,
                message,
                auto_ack,
                settled: AtomicBool::new(false),
            }),
        }
    }

    pub fn message(&self) -> &BrokerMessage {
        &self.inner.message
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::SeqCst)
    }

    /// Mark the delivery as fully processed.
    ///
    /// Call only after the work it triggered has been durably applied.
    pub async fn ack(&self) {
        let delivery_tag = self.inner.message.delivery_tag;
        if self.inner.auto_ack {
            debug!(delivery_tag, "auto-ack subscription, nothing to acknowledge");
            return;
        }
        if self.inner.settled.swap(true, Ordering::SeqCst) {
            debug!(delivery_tag, "message already settled, ignoring ack");
            return;
        }

        debug!(
            delivery_tag,
            routing_key = %self.inner.message.routing_key,
            "ack message"
        );
        if let Err(e) = self.inner.client.ack(&self.inner.message, false).await {
            error!(delivery_tag, error = %e, "failed to acknowledge message");
            self.inner.settled.store(false, Ordering::SeqCst);
        }
    }

    /// Negatively acknowledge the delivery. With `requeue` the broker redelivers
    /// it, otherwise it is dropped or dead-lettered by broker policy.
    pub async fn reject(&self, requeue: bool) {
        let delivery_tag = self.inner.message.delivery_tag;
        if self.inner.auto_ack {
            debug!(delivery_tag, "auto-ack subscription, nothing to reject");
            return;
        }
        if self.inner.settled.swap(true, Ordering::SeqCst) {
            debug!(delivery_tag, "message already settled, ignoring reject");
            return;
        }

        if let Err(e) = self.inner.client.reject(&self.inner.message, requeue).await {
            error!(delivery_tag, requeue, error = %e, "failed to reject message");
            self.inner.settled.store(false, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("delivery_tag", &self.inner.message.delivery_tag)
            .field("auto_ack", &self.inner.auto_ack)
            .field("settled", &self.is_settled())
            .finish()
    }
}

use async_trait::async_trait;
use orchestrator_core::OrchestratorResult;

use crate::events::Message;

/// A message taken off a queue. It stays unacknowledged until settled with
/// `ack_message` or `nack_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: Message,
    pub delivery_tag: u64,
}

/// Message channel used to reach worker services.
///
/// Implementations deliver each published message to exactly one consumer
/// of the named queue and keep per-queue FIFO order. Delivery is
/// at-least-once: a message handed out by `receive_message` returns to the
/// head of its queue when nacked with `requeue`.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish_message(&self, queue: &str, message: &Message) -> OrchestratorResult<()>;
    /// Next waiting message on `queue`, `None` when the queue is empty.
    /// Payloads that cannot be decoded are discarded here.
    async fn receive_message(&self, queue: &str) -> OrchestratorResult<Option<Delivery>>;
    async fn ack_message(&self, queue: &str, delivery_tag: u64) -> OrchestratorResult<()>;
    async fn nack_message(
        &self,
        queue: &str,
        delivery_tag: u64,
        requeue: bool,
    ) -> OrchestratorResult<()>;
    async fn get_queue_size(&self, queue: &str) -> OrchestratorResult<u32>;
    async fn close(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

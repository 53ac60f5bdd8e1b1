use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{Delivery, Message, MessageQueue};
use tokio::sync::Mutex;
use tracing::debug;

/// In-process message channel.
///
/// Used for embedded runs and tests. Queues are created on first use and
/// nothing survives the process. Received messages are held as unacked
/// until settled, and a requeueing nack puts them back at the head.
#[derive(Debug, Default)]
pub struct InMemoryMessageQueue {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    next_tag: AtomicU64,
    config: InMemoryQueueConfig,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    unacked: HashMap<u64, Message>,
}

#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// Maximum waiting messages per queue, 0 for unbounded
    pub max_queue_size: u32,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
        }
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Names of every queue created so far
    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliveries handed out and not yet settled
    pub async fn unacked_count(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|state| state.unacked.len())
            .unwrap_or(0)
    }

    async fn settle(&self, queue: &str, delivery_tag: u64) -> OrchestratorResult<Message> {
        let mut queues = self.queues.lock().await;
        queues
            .get_mut(queue)
            .and_then(|state| state.unacked.remove(&delivery_tag))
            .ok_or_else(|| {
                OrchestratorError::MessageQueue(format!(
                    "unknown delivery tag {delivery_tag} on {queue}"
                ))
            })
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> OrchestratorResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_insert_with(|| {
            debug!("creating in-memory queue {}", queue);
            QueueState::default()
        });

        if self.config.max_queue_size > 0 && state.ready.len() >= self.config.max_queue_size as usize
        {
            return Err(OrchestratorError::MessageQueue(format!(
                "queue {queue} is full ({} messages)",
                self.config.max_queue_size
            )));
        }

        state.ready.push_back(message.clone());
        debug!("published {} to {}", message.message_type_str(), queue);
        Ok(())
    }

    async fn receive_message(&self, queue: &str) -> OrchestratorResult<Option<Delivery>> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some(message) = state.ready.pop_front() else {
            return Ok(None);
        };

        let delivery_tag = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
        state.unacked.insert(delivery_tag, message.clone());
        Ok(Some(Delivery {
            message,
            delivery_tag,
        }))
    }

    async fn ack_message(&self, queue: &str, delivery_tag: u64) -> OrchestratorResult<()> {
        self.settle(queue, delivery_tag).await.map(|_| ())
    }

    async fn nack_message(
        &self,
        queue: &str,
        delivery_tag: u64,
        requeue: bool,
    ) -> OrchestratorResult<()> {
        let message = self.settle(queue, delivery_tag).await?;
        if requeue {
            if let Some(state) = self.queues.lock().await.get_mut(queue) {
                state.ready.push_front(message);
            }
        }
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> OrchestratorResult<u32> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .map(|state| state.ready.len() as u32)
            .unwrap_or(0))
    }
}

use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{Message, MessageQueue, MessageType};
use orchestrator_infrastructure::MetricsCollector;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::job_store::{EventDisposition, JobStore};
use crate::status_service::StatusQueryService;

/// Consumes worker result events and status requests
pub struct StateListener {
    job_store: Arc<JobStore>,
    status_service: Arc<StatusQueryService>,
    message_queue: Arc<dyn MessageQueue>,
    result_queue: String,
    status_request_queue: String,
    idle_poll: Duration,
    metrics: Arc<MetricsCollector>,
    running: Arc<RwLock<bool>>,
}

impl StateListener {
    pub fn new(
        job_store: Arc<JobStore>,
        status_service: Arc<StatusQueryService>,
        message_queue: Arc<dyn MessageQueue>,
        result_queue: String,
        status_request_queue: String,
        idle_poll: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_store,
            status_service,
            message_queue,
            result_queue,
            status_request_queue,
            idle_poll,
            metrics,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("state listener stop requested");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Handle one inbound message. Stale events and unsupported message
    /// types are not errors.
    pub async fn process_message(&self, message: &Message) -> OrchestratorResult<()> {
        match &message.message_type {
            MessageType::StageResult(event) => {
                match self.job_store.apply_stage_event(event).await? {
                    EventDisposition::Applied(effect) => {
                        debug!(
                            job_id = %event.job_id,
                            stage_id = %event.stage_id,
                            attempt = event.attempt,
                            ?effect,
                            "stage event applied"
                        );
                    }
                    EventDisposition::Ignored(reason) => {
                        warn!(
                            job_id = %event.job_id,
                            stage_id = %event.stage_id,
                            attempt = event.attempt,
                            %reason,
                            "ignoring stage event"
                        );
                        self.metrics.record_stale_event();
                    }
                }
                Ok(())
            }
            MessageType::StatusRequest(request) => self
                .status_service
                .respond_to_status_request(request)
                .await
                .map(|_| ()),
            _ => {
                debug!(
                    message_id = %message.id,
                    "ignoring unsupported message type {}",
                    message.message_type_str()
                );
                Ok(())
            }
        }
    }

    /// Drain both inbound queues once. Returns how many messages were
    /// settled for good.
    ///
    /// A message is acked once it has been applied or found permanently
    /// unusable. Any other failure puts it back at the head of its queue and
    /// ends this pass over that queue, so the next poll retries it in order.
    pub async fn poll_once(&self) -> OrchestratorResult<usize> {
        let mut handled = 0;

        for queue in [&self.result_queue, &self.status_request_queue] {
            while let Some(delivery) = self.message_queue.receive_message(queue).await? {
                let message = &delivery.message;
                match self.process_message(message).await {
                    Ok(()) => {}
                    Err(e) if e.is_permanent() => {
                        error!(
                            message_id = %message.id,
                            message_type = message.message_type_str(),
                            "dropping message that cannot be processed: {}",
                            e
                        );
                    }
                    Err(e) => {
                        warn!(
                            message_id = %message.id,
                            message_type = message.message_type_str(),
                            %queue,
                            "failed to process message, requeueing: {}",
                            e
                        );
                        self.message_queue
                            .nack_message(queue, delivery.delivery_tag, true)
                            .await?;
                        break;
                    }
                }

                self.message_queue
                    .ack_message(queue, delivery.delivery_tag)
                    .await?;
                handled += 1;
            }
        }

        Ok(handled)
    }

    pub async fn listen_for_updates(&self) -> OrchestratorResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("state listener already running");
                return Ok(());
            }
            *running = true;
        }

        info!(
            result_queue = %self.result_queue,
            status_request_queue = %self.status_request_queue,
            "state listener started"
        );

        while *self.running.read().await {
            match self.poll_once().await {
                Ok(0) => tokio::time::sleep(self.idle_poll).await,
                Ok(handled) => debug!(handled, "processed inbound messages"),
                Err(e) => {
                    // Channel errors are transient; back off and keep going
                    error!("failed to consume inbound messages: {}", e);
                    tokio::time::sleep(self.idle_poll * 10).await;
                }
            }
        }

        info!("state listener stopped");
        Ok(())
    }
}

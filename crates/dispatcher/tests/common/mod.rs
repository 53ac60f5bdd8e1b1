#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::{
    MessageQueueConfig, MessageQueueType, OrchestratorError, OrchestratorResult,
    RetryBackoffConfig, StageDeadlines,
};
use orchestrator_dispatcher::{
    Dispatcher, JobController, JobStore, RetryPolicy, StateListener, StatusQueryService,
    TimeoutMonitor, TimeoutMonitorConfig,
};
use orchestrator_domain::{
    Delivery, ImageDescriptor, Job, JobRepository, Message, MessageQueue, ServiceKind, StageSpec,
};
use orchestrator_infrastructure::{InMemoryJobRepository, InMemoryMessageQueue, MetricsCollector};

pub fn create_test_metrics() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new())
}

pub fn test_queue_config() -> MessageQueueConfig {
    MessageQueueConfig {
        r#type: MessageQueueType::InMemory,
        publish_max_attempts: 3,
        publish_retry_base_ms: 1,
        publish_retry_max_ms: 2,
        ..MessageQueueConfig::default()
    }
}

/// Deterministic backoff: 10s, 20s, 40s, then 60s
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::new(RetryBackoffConfig {
        base_interval_seconds: 10,
        max_interval_seconds: 60,
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    })
}

pub fn test_image() -> ImageDescriptor {
    ImageDescriptor::new("sles-15-sp5-v20240501").with_provider("ec2")
}

/// `upload` fans out to `test` and `replicate`
pub fn fan_out_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("upload", ServiceKind::Upload),
        StageSpec::new("test", ServiceKind::Test).depends_on("upload"),
        StageSpec::new("replicate", ServiceKind::Replicate).depends_on("upload"),
    ]
}

/// `upload -> test -> publish`
pub fn chain_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("upload", ServiceKind::Upload),
        StageSpec::new("test", ServiceKind::Test).depends_on("upload"),
        StageSpec::new("publish", ServiceKind::Publish).depends_on("test"),
    ]
}

/// Wires the orchestration services over in-memory backends
pub struct TestHarness {
    pub repository: Arc<dyn JobRepository>,
    pub job_store: Arc<JobStore>,
    pub queue: Arc<InMemoryMessageQueue>,
    pub queue_config: MessageQueueConfig,
    pub metrics: Arc<MetricsCollector>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_repository(Arc::new(InMemoryJobRepository::new()))
    }

    pub fn with_repository(repository: Arc<dyn JobRepository>) -> Self {
        let job_store = Arc::new(JobStore::new(repository.clone(), test_retry_policy(), 3));
        Self {
            repository,
            job_store,
            queue: Arc::new(InMemoryMessageQueue::new()),
            queue_config: test_queue_config(),
            metrics: create_test_metrics(),
        }
    }

    pub fn dispatcher(&self, instance_id: &str) -> Dispatcher {
        self.dispatcher_with_queue(self.queue.clone(), instance_id)
    }

    pub fn dispatcher_with_queue(
        &self,
        queue: Arc<dyn MessageQueue>,
        instance_id: &str,
    ) -> Dispatcher {
        Dispatcher::new(
            self.job_store.clone(),
            queue,
            self.queue_config.clone(),
            instance_id.to_string(),
            self.metrics.clone(),
        )
    }

    pub fn controller(&self) -> JobController {
        JobController::new(
            self.job_store.clone(),
            self.queue.clone(),
            self.queue_config.clone(),
            self.metrics.clone(),
        )
    }

    pub fn status_service(&self) -> Arc<StatusQueryService> {
        Arc::new(StatusQueryService::new(
            self.job_store.clone(),
            self.queue.clone(),
            self.queue_config.clone(),
        ))
    }

    pub fn listener(&self) -> StateListener {
        StateListener::new(
            self.job_store.clone(),
            self.status_service(),
            self.queue.clone(),
            self.queue_config.result_queue.clone(),
            self.queue_config.status_request_queue.clone(),
            Duration::from_millis(5),
            self.metrics.clone(),
        )
    }

    pub fn monitor(&self) -> TimeoutMonitor {
        TimeoutMonitor::new(
            self.job_store.clone(),
            TimeoutMonitorConfig {
                scan_interval: Duration::from_millis(10),
                deadlines: StageDeadlines::default(),
            },
            self.metrics.clone(),
        )
    }

    pub async fn drain(&self, queue: &str) -> Vec<Message> {
        drain_queue(self.queue.as_ref(), queue).await
    }

    /// Send a worker result through the listener's inbound queue
    pub async fn send_result(&self, message: Message) {
        self.queue
            .publish_message(&self.queue_config.result_queue, &message)
            .await
            .unwrap();
    }
}

/// Receive and ack everything waiting on `name`
pub async fn drain_queue(queue: &dyn MessageQueue, name: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some(delivery) = queue.receive_message(name).await.unwrap() {
        queue.ack_message(name, delivery.delivery_tag).await.unwrap();
        messages.push(delivery.message);
    }
    messages
}

/// Message channel that rejects the first `failures` publishes
pub struct FailingQueue {
    inner: InMemoryMessageQueue,
    failures_left: AtomicU32,
    pub publish_calls: AtomicU32,
}

impl FailingQueue {
    pub fn failing(failures: u32) -> Self {
        Self {
            inner: InMemoryMessageQueue::new(),
            failures_left: AtomicU32::new(failures),
            publish_calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.publish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageQueue for FailingQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> OrchestratorResult<()> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                (left > 0).then(|| left.saturating_sub(1))
            })
            .is_ok();
        if rejected {
            return Err(OrchestratorError::MessageQueue(format!(
                "broker unavailable for {queue}"
            )));
        }
        self.inner.publish_message(queue, message).await
    }

    async fn receive_message(&self, queue: &str) -> OrchestratorResult<Option<Delivery>> {
        self.inner.receive_message(queue).await
    }

    async fn ack_message(&self, queue: &str, delivery_tag: u64) -> OrchestratorResult<()> {
        self.inner.ack_message(queue, delivery_tag).await
    }

    async fn nack_message(
        &self,
        queue: &str,
        delivery_tag: u64,
        requeue: bool,
    ) -> OrchestratorResult<()> {
        self.inner.nack_message(queue, delivery_tag, requeue).await
    }

    async fn get_queue_size(&self, queue: &str) -> OrchestratorResult<u32> {
        self.inner.get_queue_size(queue).await
    }
}

/// Job repository whose updates fail while armed, as SQLite does when the
/// database is locked
pub struct FlakyRepository {
    inner: InMemoryJobRepository,
    failing_updates: AtomicU32,
}

impl FlakyRepository {
    pub fn new() -> Self {
        Self {
            inner: InMemoryJobRepository::new(),
            failing_updates: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` updates
    pub fn fail_next_updates(&self, count: u32) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobRepository for FlakyRepository {
    async fn create(&self, job: &Job) -> OrchestratorResult<()> {
        self.inner.create(job).await
    }

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<Job>> {
        self.inner.get_by_id(id).await
    }

    async fn update(&self, job: &Job) -> OrchestratorResult<i64> {
        let fail = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                (left > 0).then(|| left - 1)
            })
            .is_ok();
        if fail {
            return Err(OrchestratorError::DatabaseOperation(
                "database is locked".to_string(),
            ));
        }
        self.inner.update(job).await
    }

    async fn list_active(&self) -> OrchestratorResult<Vec<Job>> {
        self.inner.list_active().await
    }

    async fn list(&self, include_archived: bool) -> OrchestratorResult<Vec<Job>> {
        self.inner.list(include_archived).await
    }
}

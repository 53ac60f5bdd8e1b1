mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::common::*;
    use orchestrator_dispatcher::{DispatchReport, JobOptions};
    use orchestrator_domain::{MessageQueue, MessageType, StageEvent, StageState};

    fn task_requests(messages: Vec<orchestrator_domain::Message>) -> Vec<(String, String, u32)> {
        messages
            .into_iter()
            .map(|message| match message.message_type {
                MessageType::TaskRequest(request) => {
                    (request.job_id, request.stage_id, request.attempt)
                }
                other => panic!("expected a task request, got {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_publishes_to_service_queue() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), fan_out_stages(), JobOptions::default())
            .await
            .unwrap();
        let dispatcher = harness.dispatcher("dispatcher-1");
        assert_eq!(dispatcher.instance_id(), "dispatcher-1");

        let report = dispatcher.dispatch_eligible().await.unwrap();
        assert_eq!(
            report,
            DispatchReport {
                jobs_scanned: 1,
                dispatched: 1,
                reverted: 0,
                skipped: 0,
            }
        );

        let messages = harness.drain("upload.service").await;
        assert_eq!(messages.len(), 1);
        match &messages[0].message_type {
            MessageType::TaskRequest(request) => {
                assert_eq!(request.job_id, job.id);
                assert_eq!(request.stage_id, "upload");
                assert_eq!(request.attempt, 1);
                assert_eq!(request.image.name, job.image.name);
                assert_eq!(request.capability_ref, job.capability_ref);
            }
            other => panic!("expected a task request, got {other:?}"),
        }

        let stored = harness.job_store.get_job(&job.id).await.unwrap();
        let upload = stored.stage("upload").unwrap();
        assert_eq!(upload.state, StageState::Dispatched);
        assert_eq!(upload.claimed_by.as_deref(), Some("dispatcher-1"));

        // Nothing else is eligible until upload completes
        let report = dispatcher.dispatch_eligible().await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert!(harness.drain("test.service").await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_follows_dependencies() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), fan_out_stages(), JobOptions::default())
            .await
            .unwrap();
        let dispatcher = harness.dispatcher("dispatcher-1");

        dispatcher.dispatch_eligible().await.unwrap();
        harness
            .job_store
            .apply_stage_event(&StageEvent::success(&job.id, "upload", 1))
            .await
            .unwrap();

        let report = dispatcher.dispatch_eligible().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(harness.drain("test.service").await.len(), 1);
        assert_eq!(harness.drain("replicate.service").await.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_is_fifo_across_jobs() {
        let harness = TestHarness::new();
        let mut job_ids = Vec::new();
        for _ in 0..3 {
            let job = harness
                .job_store
                .create_job(test_image(), fan_out_stages(), JobOptions::default())
                .await
                .unwrap();
            job_ids.push(job.id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        harness
            .dispatcher("dispatcher-1")
            .dispatch_eligible()
            .await
            .unwrap();

        let published: Vec<String> = task_requests(harness.drain("upload.service").await)
            .into_iter()
            .map(|(job_id, _, _)| job_id)
            .collect();
        assert_eq!(published, job_ids);
    }

    #[tokio::test]
    async fn test_exhausted_publish_reverts_claim() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), fan_out_stages(), JobOptions::default())
            .await
            .unwrap();
        let queue = Arc::new(FailingQueue::always_failing());
        let dispatcher = harness.dispatcher_with_queue(queue.clone(), "dispatcher-1");

        let report = dispatcher.dispatch_eligible().await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.reverted, 1);
        assert_eq!(queue.calls(), harness.queue_config.publish_max_attempts);

        let stored = harness.job_store.get_job(&job.id).await.unwrap();
        let upload = stored.stage("upload").unwrap();
        assert_eq!(upload.state, StageState::Eligible);
        assert_eq!(upload.attempt, 0);
        assert!(upload.claimed_by.is_none());
        assert_eq!(queue.get_queue_size("upload.service").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_publish_failure_is_retried() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), fan_out_stages(), JobOptions::default())
            .await
            .unwrap();
        let queue = Arc::new(FailingQueue::failing(2));
        let dispatcher = harness.dispatcher_with_queue(queue.clone(), "dispatcher-1");

        let report = dispatcher.dispatch_eligible().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.reverted, 0);
        assert_eq!(queue.calls(), 3);

        let messages = drain_queue(queue.as_ref(), "upload.service").await;
        assert_eq!(task_requests(messages), vec![(job.id.clone(), "upload".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_reverted_stage_is_redispatched_with_same_attempt() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), fan_out_stages(), JobOptions::default())
            .await
            .unwrap();

        let broken = harness.dispatcher_with_queue(Arc::new(FailingQueue::always_failing()), "a");
        assert_eq!(broken.dispatch_eligible().await.unwrap().reverted, 1);

        let healthy = harness.dispatcher("b");
        assert_eq!(healthy.dispatch_eligible().await.unwrap().dispatched, 1);
        assert_eq!(
            task_requests(harness.drain("upload.service").await),
            vec![(job.id, "upload".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_competing_dispatchers_send_each_attempt_once() {
        let harness = TestHarness::new();
        for _ in 0..5 {
            harness
                .job_store
                .create_job(test_image(), fan_out_stages(), JobOptions::default())
                .await
                .unwrap();
        }

        let first = Arc::new(harness.dispatcher("dispatcher-1"));
        let second = Arc::new(harness.dispatcher("dispatcher-2"));
        let (a, b) = tokio::join!(first.dispatch_eligible(), second.dispatch_eligible());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.dispatched + b.dispatched, 5);
        let published = task_requests(harness.drain("upload.service").await);
        assert_eq!(published.len(), 5);
        let mut unique: Vec<_> = published.iter().map(|(job_id, _, _)| job_id.clone()).collect();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_not_scanned() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), fan_out_stages(), JobOptions::default())
            .await
            .unwrap();
        harness.job_store.cancel_job(&job.id).await.unwrap();

        let report = harness
            .dispatcher("dispatcher-1")
            .dispatch_eligible()
            .await
            .unwrap();
        assert_eq!(report, DispatchReport::default());
    }
}

mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::common::*;
    use orchestrator_dispatcher::JobOptions;
    use orchestrator_domain::{
        JobStatus, Message, MessageQueue, MessageType, ServiceKind, StageEvent, StageState,
        TaskRequest,
    };

    #[tokio::test]
    async fn test_listener_applies_results_in_order() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), chain_stages(), JobOptions::default())
            .await
            .unwrap();
        harness
            .dispatcher("dispatcher-1")
            .dispatch_eligible()
            .await
            .unwrap();
        let listener = harness.listener();

        harness
            .send_result(Message::stage_result(StageEvent::progress(&job.id, "upload", 1)))
            .await;
        harness
            .send_result(Message::stage_result(StageEvent::success(&job.id, "upload", 1)))
            .await;

        assert_eq!(listener.poll_once().await.unwrap(), 2);

        let stored = harness.job_store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.stage("upload").unwrap().state, StageState::Completed);
        assert_eq!(stored.stage("test").unwrap().state, StageState::Eligible);
    }

    #[tokio::test]
    async fn test_listener_survives_bad_and_stale_messages() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), chain_stages(), JobOptions::default())
            .await
            .unwrap();
        harness
            .dispatcher("dispatcher-1")
            .dispatch_eligible()
            .await
            .unwrap();
        let listener = harness.listener();
        let before = harness.job_store.get_job(&job.id).await.unwrap();

        harness
            .send_result(Message::stage_result(StageEvent::success("missing-job", "upload", 1)))
            .await;
        harness
            .send_result(Message::stage_result(StageEvent::success(&job.id, "upload", 4)))
            .await;
        harness
            .send_result(Message::stage_result(StageEvent::success(&job.id, "publish", 1)))
            .await;
        let stray = harness
            .job_store
            .get_job(&job.id)
            .await
            .map(|job| TaskRequest::for_stage(&job, job.stage("upload").unwrap()))
            .unwrap();
        harness.send_result(Message::task_request(stray)).await;

        assert_eq!(listener.poll_once().await.unwrap(), 4);
        assert_eq!(harness.job_store.get_job(&job.id).await.unwrap(), before);

        let result_queue = &harness.queue_config.result_queue;
        assert_eq!(harness.queue.get_queue_size(result_queue).await.unwrap(), 0);
        assert_eq!(harness.queue.unacked_count(result_queue).await, 0);
    }

    #[tokio::test]
    async fn test_result_is_redelivered_after_failed_write() {
        let repository = Arc::new(FlakyRepository::new());
        let harness = TestHarness::with_repository(repository.clone());
        let job = harness
            .job_store
            .create_job(test_image(), chain_stages(), JobOptions::default())
            .await
            .unwrap();
        harness
            .dispatcher("dispatcher-1")
            .dispatch_eligible()
            .await
            .unwrap();
        let listener = harness.listener();
        let result_queue = &harness.queue_config.result_queue;

        harness
            .send_result(Message::stage_result(StageEvent::progress(&job.id, "upload", 1)))
            .await;
        harness
            .send_result(Message::stage_result(StageEvent::success(&job.id, "upload", 1)))
            .await;
        repository.fail_next_updates(1);

        assert_eq!(listener.poll_once().await.unwrap(), 0);
        assert_eq!(harness.queue.get_queue_size(result_queue).await.unwrap(), 2);
        assert_eq!(harness.queue.unacked_count(result_queue).await, 0);
        let stored = harness.job_store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.stage("upload").unwrap().state, StageState::Dispatched);

        assert_eq!(listener.poll_once().await.unwrap(), 2);
        assert_eq!(harness.queue.get_queue_size(result_queue).await.unwrap(), 0);
        let stored = harness.job_store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.stage("upload").unwrap().state, StageState::Completed);
        assert_eq!(stored.stage("test").unwrap().state, StageState::Eligible);
    }

    #[tokio::test]
    async fn test_status_request_is_answered_on_kind_queue() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), fan_out_stages(), JobOptions::default())
            .await
            .unwrap();
        harness
            .dispatcher("dispatcher-1")
            .dispatch_eligible()
            .await
            .unwrap();
        let listener = harness.listener();

        harness
            .queue
            .publish_message(
                &harness.queue_config.status_request_queue,
                &Message::status_request(ServiceKind::Upload),
            )
            .await
            .unwrap();
        assert_eq!(listener.poll_once().await.unwrap(), 1);

        let replies = harness.drain("upload.status").await;
        assert_eq!(replies.len(), 1);
        match &replies[0].message_type {
            MessageType::StatusReply(reply) => {
                assert_eq!(reply.service_kind, ServiceKind::Upload);
                assert_eq!(reply.stages.len(), 1);
                assert_eq!(reply.stages[0].job_id, job.id);
                assert_eq!(reply.stages[0].stage_id, "upload");
            }
            other => panic!("expected a status reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_listen_loop_processes_until_stopped() {
        let harness = TestHarness::new();
        let job = harness
            .job_store
            .create_job(test_image(), chain_stages(), JobOptions::default())
            .await
            .unwrap();
        harness
            .dispatcher("dispatcher-1")
            .dispatch_eligible()
            .await
            .unwrap();

        let listener = Arc::new(harness.listener());
        assert!(!listener.is_running().await);
        let handle = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.listen_for_updates().await })
        };

        harness
            .send_result(Message::stage_result(StageEvent::success(&job.id, "upload", 1)))
            .await;

        let mut completed = false;
        for _ in 0..100 {
            let stored = harness.job_store.get_job(&job.id).await.unwrap();
            if stored.stage("upload").unwrap().state == StageState::Completed {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(completed, "listener never applied the result");
        assert!(listener.is_running().await);

        listener.stop().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!listener.is_running().await);

        let stored = harness.job_store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::InProgress);
    }
}

use crate::config::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.message_queue.r#type, MessageQueueType::Rabbitmq);
    assert_eq!(config.orchestrator.default_max_attempts, 3);
    assert!(config.api.enabled);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "sqlite::memory:"
max_connections = 1
min_connections = 1
connection_timeout_seconds = 10
idle_timeout_seconds = 60

[message_queue]
type = "in_memory"
url = ""
task_queue_suffix = "service"
status_reply_suffix = "status"
cancel_queue_suffix = "cancel"
result_queue = "orchestrator.listener"
status_request_queue = "orchestrator.status"
publish_max_attempts = 5
publish_retry_base_ms = 10
publish_retry_max_ms = 100
connection_timeout_seconds = 5

[orchestrator]
dispatch_interval_seconds = 2
monitor_interval_seconds = 10
listener_idle_poll_ms = 50
default_max_attempts = 4
recover_on_startup = false

[orchestrator.stage_deadlines]
obs = 60
upload = 120
test = 60
replicate = 60
publish = 30
deprecate = 30

[orchestrator.retry]
base_interval_seconds = 5
max_interval_seconds = 50
backoff_multiplier = 3.0
jitter_factor = 0.0
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();
    assert_eq!(config.message_queue.r#type, MessageQueueType::InMemory);
    assert_eq!(config.message_queue.publish_max_attempts, 5);
    assert_eq!(config.orchestrator.default_max_attempts, 4);
    assert_eq!(config.orchestrator.stage_deadlines.upload, 120);
    assert_eq!(config.orchestrator.retry.backoff_multiplier, 3.0);
    // Sections missing from the file fall back to defaults
    assert_eq!(config.api.bind_address, "0.0.0.0:8080");
}

#[test]
fn test_toml_round_trip_keeps_values() {
    let mut config = AppConfig::default();
    config.orchestrator.stage_deadlines.publish = 42;

    let serialized = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&serialized).unwrap();
    assert_eq!(parsed.orchestrator.stage_deadlines.publish, 42);
}

#[test]
fn test_load_partial_file_merges_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[orchestrator]
default_max_attempts = 7

[orchestrator.stage_deadlines]
test = 900
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = AppConfig::load(Some(&path)).unwrap();

    assert_eq!(config.orchestrator.default_max_attempts, 7);
    assert_eq!(config.orchestrator.stage_deadlines.test, 900);
    assert_eq!(config.orchestrator.stage_deadlines.upload, 7200);
    assert_eq!(config.message_queue.result_queue, "orchestrator.listener");
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/orchestrator.toml"));
    assert!(result.is_err());
}

#[test]
fn test_validation_rejects_bad_values() {
    let mut config = AppConfig::default();
    config.database.url = "postgresql://localhost/db".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.orchestrator.default_max_attempts = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.orchestrator.stage_deadlines.obs = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.message_queue.status_request_queue = config.message_queue.result_queue.clone();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_format = "xml".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.orchestrator.retry.base_interval_seconds = 10_000;
    assert!(config.validate().is_err());
}

#[test]
fn test_in_memory_queue_skips_url_check() {
    let mut config = AppConfig::default();
    config.message_queue.r#type = MessageQueueType::InMemory;
    config.message_queue.url = String::new();
    assert!(config.validate().is_ok());
}

#[test]
fn test_queue_name_derivation() {
    let config = MessageQueueConfig::default();
    assert_eq!(config.task_queue("upload"), "upload.service");
    assert_eq!(config.status_reply_queue("test"), "test.status");
    assert_eq!(config.cancel_queue("publish"), "publish.cancel");
}

#[test]
fn test_stage_deadline_lookup() {
    let deadlines = StageDeadlines::default();
    assert_eq!(deadlines.for_kind("upload"), Some(7200));
    assert_eq!(deadlines.for_kind("unknown"), None);
}

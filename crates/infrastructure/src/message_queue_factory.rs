use std::sync::Arc;

use orchestrator_core::{MessageQueueConfig, MessageQueueType, OrchestratorError, OrchestratorResult};
use orchestrator_domain::MessageQueue;
use tracing::{debug, info};

use crate::{InMemoryMessageQueue, RabbitMQMessageQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    pub async fn create(config: &MessageQueueConfig) -> OrchestratorResult<Arc<dyn MessageQueue>> {
        debug!("creating message queue of type {:?}", config.r#type);
        Self::validate_config(config)?;

        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("initializing RabbitMQ message queue");
                let rabbitmq = RabbitMQMessageQueue::new(config.clone()).await?;
                Ok(Arc::new(rabbitmq))
            }
            MessageQueueType::InMemory => {
                info!("initializing in-memory message queue");
                Ok(Arc::new(InMemoryMessageQueue::new()))
            }
        }
    }

    pub fn validate_config(config: &MessageQueueConfig) -> OrchestratorResult<()> {
        if config.r#type == MessageQueueType::Rabbitmq
            && !config.url.starts_with("amqp://")
            && !config.url.starts_with("amqps://")
        {
            return Err(OrchestratorError::config_error(
                "RabbitMQ url must start with amqp:// or amqps://",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_in_memory_queue() {
        let config = MessageQueueConfig {
            r#type: MessageQueueType::InMemory,
            url: String::new(),
            ..MessageQueueConfig::default()
        };
        let queue = MessageQueueFactory::create(&config).await.unwrap();
        assert_eq!(queue.get_queue_size("anything").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_through_port() {
        let config = MessageQueueConfig {
            r#type: MessageQueueType::InMemory,
            url: String::new(),
            ..MessageQueueConfig::default()
        };
        let queue = MessageQueueFactory::create(&config).await.unwrap();
        queue.close().await.unwrap();
    }

    #[test]
    fn test_rejects_non_amqp_url() {
        let config = MessageQueueConfig {
            url: "redis://localhost".to_string(),
            ..MessageQueueConfig::default()
        };
        assert!(matches!(
            MessageQueueFactory::validate_config(&config),
            Err(OrchestratorError::Configuration(_))
        ));
    }
}

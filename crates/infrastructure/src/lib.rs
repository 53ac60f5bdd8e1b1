pub mod database;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;
pub mod observability;

pub use database::{DatabaseManager, InMemoryJobRepository, SqliteJobRepository};
pub use in_memory_queue::{InMemoryMessageQueue, InMemoryQueueConfig};
pub use message_queue::RabbitMQMessageQueue;
pub use message_queue_factory::MessageQueueFactory;
pub use observability::MetricsCollector;

pub mod manager;
pub mod memory;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use memory::InMemoryJobRepository;
pub use sqlite::SqliteJobRepository;

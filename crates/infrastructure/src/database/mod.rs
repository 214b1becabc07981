pub mod manager;
pub mod mapping;
pub mod migrations;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseConnection, DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{PostgresQueueRepository, PostgresScheduleRepository, PostgresTaskResultRepository};
pub use sqlite::{SqliteQueueRepository, SqliteScheduleRepository, SqliteTaskResultRepository};

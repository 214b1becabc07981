pub mod sqlite_queue_repository;
pub mod sqlite_schedule_repository;
pub mod sqlite_task_result_repository;

pub use sqlite_queue_repository::SqliteQueueRepository;
pub use sqlite_schedule_repository::SqliteScheduleRepository;
pub use sqlite_task_result_repository::SqliteTaskResultRepository;

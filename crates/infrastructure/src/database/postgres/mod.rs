pub mod postgres_queue_repository;
pub mod postgres_schedule_repository;
pub mod postgres_task_result_repository;

pub use postgres_queue_repository::PostgresQueueRepository;
pub use postgres_schedule_repository::PostgresScheduleRepository;
pub use postgres_task_result_repository::PostgresTaskResultRepository;

//! 进程内文档存储后端（`memory:`）
//!
//! 能力为 `BackendCapabilities::DOCUMENT`，上层代理和台账会自动切换到回退策略。

mod memory_queue_repository;
mod memory_schedule_repository;
mod memory_task_result_repository;
mod store;

pub use memory_queue_repository::MemoryQueueRepository;
pub use memory_schedule_repository::MemoryScheduleRepository;
pub use memory_task_result_repository::MemoryTaskResultRepository;
pub use store::MemoryStore;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ormq_domain::{QueueMessage, Schedule, TaskResult};
use tokio::sync::RwLock;
use tracing::info;

/// 进程内文档存储
///
/// 模拟只支持单文档原子更新的文档数据库：每次写入只锁住整个集合片刻，
/// 没有"条件更新并返回"的领取语句，布尔字段也不提供过滤。
/// 多个仓储共享同一个 `MemoryStore` 时看到的是同一份数据。
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub(crate) collections: Arc<RwLock<Collections>>,
}

#[derive(Debug, Default)]
pub(crate) struct Collections {
    pub queue: BTreeMap<i64, QueueMessage>,
    pub results: HashMap<String, TaskResult>,
    pub schedules: BTreeMap<i64, Schedule>,
    pub last_queue_id: i64,
    pub last_schedule_id: i64,
}

impl Collections {
    pub fn next_queue_id(&mut self) -> i64 {
        self.last_queue_id += 1;
        self.last_queue_id
    }

    pub fn next_schedule_id(&mut self) -> i64 {
        self.last_schedule_id += 1;
        self.last_schedule_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("创建进程内文档存储");
        Self::default()
    }
}

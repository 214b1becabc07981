//! 领域仓储抽象
//!
//! 定义三类记录存储的访问接口，遵循依赖倒置原则：
//! - `QueueRepository` - ORM代理的队列行
//! - `TaskResultRepository` - 成功/失败结果台账
//! - `ScheduleRepository` - 周期调度定义
//!
//! 每个实现通过 `capabilities()` 报告后端能力，上层据此选择策略。
//! 删除类操作返回是否真的删除了行，"已不存在"不是错误。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ormq_errors::QueueResult;

use crate::capabilities::BackendCapabilities;
use crate::entities::{
    NewQueueMessage, QueueMessage, Schedule, ScheduleFilter, TaskResult, TaskResultFilter,
};

/// 队列行仓储
#[async_trait]
pub trait QueueRepository: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    async fn insert(&self, message: &NewQueueMessage) -> QueueResult<QueueMessage>;

    async fn get(&self, id: i64) -> QueueResult<Option<QueueMessage>>;

    /// 单条语句完成"挑选一条可用行并加锁"，返回被加锁的行。
    ///
    /// 可用行：`key` 匹配，且 `lock` 为空或早于 `stale_before`。
    /// 仅在 `capabilities().atomic_claim` 为真时可调用。
    async fn claim_next(
        &self,
        key: &str,
        stale_before: DateTime<Utc>,
        lock: DateTime<Utc>,
    ) -> QueueResult<Option<QueueMessage>>;

    /// 按 id 升序列出分区内全部行
    async fn list_by_key(&self, key: &str) -> QueueResult<Vec<QueueMessage>>;

    /// 单行比较并交换：仅当当前 `lock` 等于 `expected` 时写入 `new`
    async fn swap_lock(
        &self,
        id: i64,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> QueueResult<bool>;

    /// 无条件清除锁，行不存在或本就未加锁时返回 false
    async fn clear_lock(&self, id: i64) -> QueueResult<bool>;

    async fn delete(&self, id: i64) -> QueueResult<bool>;

    async fn delete_by_key(&self, key: &str) -> QueueResult<u64>;

    async fn count(&self, key: &str) -> QueueResult<i64>;

    /// 持有未过期锁的行数
    async fn count_locked(&self, key: &str, stale_before: DateTime<Utc>) -> QueueResult<i64>;
}

/// 结果台账仓储，只追加不更新
#[async_trait]
pub trait TaskResultRepository: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    async fn insert(&self, result: &TaskResult) -> QueueResult<()>;

    async fn get(&self, id: &str) -> QueueResult<Option<TaskResult>>;

    /// 按 `stopped` 倒序返回匹配的记录。
    ///
    /// `filter.success` 仅在 `capabilities().boolean_filter` 为真时可用。
    async fn find(&self, filter: &TaskResultFilter) -> QueueResult<Vec<TaskResult>>;

    /// 与 `find` 条件相同的记录数，忽略 `limit`
    async fn count(&self, filter: &TaskResultFilter) -> QueueResult<i64>;

    async fn delete(&self, id: &str) -> QueueResult<bool>;
}

/// 调度仓储
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    async fn create(&self, schedule: &Schedule) -> QueueResult<Schedule>;

    async fn get(&self, id: i64) -> QueueResult<Option<Schedule>>;

    async fn find(&self, filter: &ScheduleFilter) -> QueueResult<Vec<Schedule>>;

    /// `repeats != 0` 且 `next_run <= now` 的调度，按 `next_run` 升序
    async fn find_due(&self, now: DateTime<Utc>) -> QueueResult<Vec<Schedule>>;

    /// 乐观认领：仅当存储中的调度未耗尽且 `next_run` 仍等于 `expected_next_run` 时，
    /// 写入 `schedule` 的 next_run / last_run / repeats / task_id，并清空 success。
    async fn advance(
        &self,
        schedule: &Schedule,
        expected_next_run: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// 撤销一次认领：仅当存储中的 `task_id` 仍是 `claimed_task_id` 时，
    /// 把 next_run / last_run / repeats / task_id / success 写回 `original` 的值。
    async fn restore(&self, original: &Schedule, claimed_task_id: &str) -> QueueResult<bool>;

    /// 仅当调度最近一次派发的任务是 `task_id` 时写入执行结果
    async fn record_outcome(&self, id: i64, task_id: &str, success: bool) -> QueueResult<bool>;

    async fn delete(&self, id: i64) -> QueueResult<bool>;
}

//! 结果台账
//!
//! 成功与失败记录共用一张表，按 `success` 区分。后端布尔过滤不可靠时，
//! 先用 `attempt_count > 0` 取回候选，再在进程内按成功标志筛选，两条路径结果一致。

use std::sync::Arc;

use async_trait::async_trait;
use ormq_domain::{TaskResult, TaskResultFilter, TaskResultRepository};
use ormq_errors::QueueResult;
use tracing::{debug, info, instrument};

/// 按成功/失败查询的策略
#[async_trait]
pub trait QueryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find_by_outcome(
        &self,
        repo: &dyn TaskResultRepository,
        success: bool,
        filter: &TaskResultFilter,
    ) -> QueueResult<Vec<TaskResult>>;

    async fn count_by_outcome(&self, repo: &dyn TaskResultRepository, success: bool) -> QueueResult<usize>;
}

/// 直接在布尔列上过滤
pub struct DirectFilter;

#[async_trait]
impl QueryStrategy for DirectFilter {
    fn name(&self) -> &'static str {
        "direct_filter"
    }

    async fn find_by_outcome(
        &self,
        repo: &dyn TaskResultRepository,
        success: bool,
        filter: &TaskResultFilter,
    ) -> QueueResult<Vec<TaskResult>> {
        let filter = TaskResultFilter {
            success: Some(success),
            ..filter.clone()
        };
        repo.find(&filter).await
    }

    async fn count_by_outcome(&self, repo: &dyn TaskResultRepository, success: bool) -> QueueResult<usize> {
        let filter = TaskResultFilter {
            success: Some(success),
            ..TaskResultFilter::default()
        };
        Ok(repo.count(&filter).await?.max(0) as usize)
    }
}

/// 先按尝试次数取回，再在进程内按成功标志筛选
pub struct FetchAndFilter;

#[async_trait]
impl QueryStrategy for FetchAndFilter {
    fn name(&self) -> &'static str {
        "fetch_and_filter"
    }

    async fn find_by_outcome(
        &self,
        repo: &dyn TaskResultRepository,
        success: bool,
        filter: &TaskResultFilter,
    ) -> QueueResult<Vec<TaskResult>> {
        // limit 必须在筛选之后生效
        let fetch = TaskResultFilter {
            success: None,
            attempt_count_gt: Some(filter.attempt_count_gt.unwrap_or(0).max(0)),
            limit: None,
            ..filter.clone()
        };
        let mut matched: Vec<TaskResult> = repo
            .find(&fetch)
            .await?
            .into_iter()
            .filter(|r| r.success == success)
            .collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }

    async fn count_by_outcome(&self, repo: &dyn TaskResultRepository, success: bool) -> QueueResult<usize> {
        Ok(self
            .find_by_outcome(repo, success, &TaskResultFilter::default())
            .await?
            .len())
    }
}

pub fn select_query_strategy(repo: &dyn TaskResultRepository) -> Box<dyn QueryStrategy> {
    if repo.capabilities().boolean_filter {
        Box::new(DirectFilter)
    } else {
        Box::new(FetchAndFilter)
    }
}

pub struct ResultLedger {
    repo: Arc<dyn TaskResultRepository>,
    strategy: Box<dyn QueryStrategy>,
}

impl ResultLedger {
    pub fn new(repo: Arc<dyn TaskResultRepository>) -> Self {
        let strategy = select_query_strategy(repo.as_ref());
        info!(strategy = strategy.name(), "结果台账已创建");
        Self { repo, strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    #[instrument(skip(self, result), fields(task_id = %result.id))]
    pub async fn record_success(&self, result: TaskResult) -> QueueResult<TaskResult> {
        self.record(result, true).await
    }

    #[instrument(skip(self, result), fields(task_id = %result.id))]
    pub async fn record_failure(&self, result: TaskResult) -> QueueResult<TaskResult> {
        self.record(result, false).await
    }

    async fn record(&self, mut result: TaskResult, success: bool) -> QueueResult<TaskResult> {
        result.success = success;
        // 回退查询依赖 attempt_count > 0，每条记录至少计一次尝试
        result.attempt_count = result.attempt_count.max(1);
        self.repo.insert(&result).await?;
        debug!("记录任务结果: {}", result.entity_description());
        Ok(result)
    }

    pub async fn query_successes(&self, filter: &TaskResultFilter) -> QueueResult<Vec<TaskResult>> {
        self.strategy
            .find_by_outcome(self.repo.as_ref(), true, filter)
            .await
    }

    pub async fn query_failures(&self, filter: &TaskResultFilter) -> QueueResult<Vec<TaskResult>> {
        self.strategy
            .find_by_outcome(self.repo.as_ref(), false, filter)
            .await
    }

    pub async fn get(&self, id: &str) -> QueueResult<Option<TaskResult>> {
        self.repo.get(id).await
    }

    /// 仅返回失败记录，成功记录视为不存在
    pub async fn get_failure(&self, id: &str) -> QueueResult<Option<TaskResult>> {
        Ok(self.repo.get(id).await?.filter(|r| !r.success))
    }

    pub async fn delete(&self, id: &str) -> QueueResult<bool> {
        self.repo.delete(id).await
    }

    /// 原样写回一条已删除的记录
    pub async fn restore(&self, result: &TaskResult) -> QueueResult<()> {
        self.repo.insert(result).await
    }

    pub async fn count_successes(&self) -> QueueResult<usize> {
        self.strategy.count_by_outcome(self.repo.as_ref(), true).await
    }

    pub async fn count_failures(&self) -> QueueResult<usize> {
        self.strategy.count_by_outcome(self.repo.as_ref(), false).await
    }
}

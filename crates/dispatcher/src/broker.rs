//! ORM消息代理
//!
//! 队列行充当消息：`enqueue` 插入，`lease` 加锁领取，`acknowledge` 删除，`release` 解锁。
//! 锁时间早于租约超时阈值的行视为被遗弃，可以重新领取。
//!
//! 领取策略在构造时根据仓储能力选定一次：
//! - `AtomicClaim` - 单条"条件更新并返回"语句
//! - `ScanAndSwap` - 读取分区、进程内筛选，再逐行比较并交换

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ormq_config::BrokerConfig;
use ormq_domain::{
    Clock, NewQueueMessage, QueueMessage, QueueRepository, SystemClock, TaskEnvelope,
};
use ormq_errors::{QueueError, QueueResult};
use tracing::{debug, info, instrument};

use crate::metrics::QueueMetrics;

/// 领取策略
#[async_trait]
pub trait LeaseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 领取一条可用消息并以 `now` 加锁；没有可用消息时返回 `None`
    async fn lease_one(
        &self,
        repo: &dyn QueueRepository,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> QueueResult<Option<QueueMessage>>;
}

/// 单语句原子领取
pub struct AtomicClaim;

#[async_trait]
impl LeaseStrategy for AtomicClaim {
    fn name(&self) -> &'static str {
        "atomic_claim"
    }

    async fn lease_one(
        &self,
        repo: &dyn QueueRepository,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> QueueResult<Option<QueueMessage>> {
        repo.claim_next(key, stale_before, now).await
    }
}

/// 扫描后逐行比较并交换
///
/// 以读到的 `lock` 值作为期望值；交换失败说明该行已被其他Worker抢走，换下一个候选。
pub struct ScanAndSwap {
    metrics: QueueMetrics,
}

impl ScanAndSwap {
    pub fn new(metrics: QueueMetrics) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl LeaseStrategy for ScanAndSwap {
    fn name(&self) -> &'static str {
        "scan_and_swap"
    }

    async fn lease_one(
        &self,
        repo: &dyn QueueRepository,
        key: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> QueueResult<Option<QueueMessage>> {
        let candidates = repo.list_by_key(key).await?;
        for candidate in candidates
            .into_iter()
            .filter(|m| m.is_available(stale_before))
        {
            if repo.swap_lock(candidate.id, candidate.lock, Some(now)).await? {
                return Ok(Some(QueueMessage {
                    lock: Some(now),
                    ..candidate
                }));
            }
            self.metrics.record_lease_conflict();
            debug!(
                error = %QueueError::LeaseConflict { message_id: candidate.id },
                "领取竞争失败，尝试下一条"
            );
        }
        Ok(None)
    }
}

/// 根据仓储能力选择领取策略
pub fn select_lease_strategy(
    repo: &dyn QueueRepository,
    metrics: &QueueMetrics,
) -> Box<dyn LeaseStrategy> {
    if repo.capabilities().atomic_claim {
        Box::new(AtomicClaim)
    } else {
        Box::new(ScanAndSwap::new(metrics.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOptions {
    /// 未指定分区时使用的队列键
    pub queue_key: String,
    pub lease_timeout: Duration,
    /// 批量领取的默认上限
    pub bulk: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for BrokerOptions {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            queue_key: config.queue_key.clone(),
            lease_timeout: Duration::seconds(config.lease_timeout_seconds as i64),
            bulk: config.bulk.max(1) as usize,
        }
    }
}

pub struct OrmBroker {
    repo: Arc<dyn QueueRepository>,
    strategy: Box<dyn LeaseStrategy>,
    clock: Arc<dyn Clock>,
    options: BrokerOptions,
    metrics: QueueMetrics,
}

impl OrmBroker {
    pub fn new(repo: Arc<dyn QueueRepository>, options: BrokerOptions) -> Self {
        Self::with_clock(repo, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repo: Arc<dyn QueueRepository>,
        options: BrokerOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = QueueMetrics::new();
        let strategy = select_lease_strategy(repo.as_ref(), &metrics);
        info!(
            strategy = strategy.name(),
            queue_key = %options.queue_key,
            lease_timeout_seconds = options.lease_timeout.num_seconds(),
            "ORM代理已创建"
        );
        Self {
            repo,
            strategy,
            clock,
            options,
            metrics,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn default_key(&self) -> &str {
        &self.options.queue_key
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.options.lease_timeout
    }

    /// 入队到信封指定的集群分区，未指定时使用默认分区
    pub async fn enqueue(&self, envelope: &TaskEnvelope) -> QueueResult<QueueMessage> {
        let key = envelope
            .cluster
            .clone()
            .unwrap_or_else(|| self.options.queue_key.clone());
        self.enqueue_to(&key, envelope).await
    }

    #[instrument(skip(self, envelope), fields(task_id = %envelope.id, func = %envelope.func))]
    pub async fn enqueue_to(&self, key: &str, envelope: &TaskEnvelope) -> QueueResult<QueueMessage> {
        let message = NewQueueMessage::from_envelope(key, envelope)?;
        let stored = self.repo.insert(&message).await?;
        self.metrics.record_enqueued();
        debug!("任务已入队: {}", stored.entity_description());
        Ok(stored)
    }

    /// 领取一条消息，从不阻塞；没有可用消息时返回 `None`
    #[instrument(skip(self))]
    pub async fn lease(&self, queue_key: &str) -> QueueResult<Option<QueueMessage>> {
        let now = self.clock.now();
        let leased = self
            .strategy
            .lease_one(self.repo.as_ref(), queue_key, now, self.stale_before(now))
            .await?;
        if let Some(message) = &leased {
            self.metrics.record_leased(1);
            debug!("领取消息: ID {}, 任务: {}", message.id, message.task_id);
        }
        Ok(leased)
    }

    /// 最多领取 `limit` 条，缺省为配置的 bulk
    pub async fn lease_batch(
        &self,
        queue_key: &str,
        limit: Option<usize>,
    ) -> QueueResult<Vec<QueueMessage>> {
        let limit = limit.unwrap_or(self.options.bulk);
        let mut leased = Vec::with_capacity(limit);
        while leased.len() < limit {
            match self.lease(queue_key).await? {
                Some(message) => leased.push(message),
                None => break,
            }
        }
        Ok(leased)
    }

    /// 删除消息；重复确认返回 false
    pub async fn acknowledge(&self, message_id: i64) -> QueueResult<bool> {
        let deleted = self.repo.delete(message_id).await?;
        if deleted {
            self.metrics.record_acknowledged();
            debug!("消息 {} 已确认", message_id);
        } else {
            debug!("消息 {} 已不存在，忽略确认", message_id);
        }
        Ok(deleted)
    }

    /// 解锁但不删除，消息可被立即重新领取
    pub async fn release(&self, message_id: i64) -> QueueResult<bool> {
        let released = self.repo.clear_lock(message_id).await?;
        if released {
            debug!("消息 {} 已释放", message_id);
        }
        Ok(released)
    }

    /// 分区内全部消息数（含已加锁）
    pub async fn queue_size(&self, queue_key: &str) -> QueueResult<i64> {
        self.repo.count(queue_key).await
    }

    /// 持有未过期租约的消息数
    pub async fn lock_size(&self, queue_key: &str) -> QueueResult<i64> {
        let now = self.clock.now();
        self.repo.count_locked(queue_key, self.stale_before(now)).await
    }

    pub async fn purge(&self, queue_key: &str) -> QueueResult<u64> {
        let removed = self.repo.delete_by_key(queue_key).await?;
        info!("清空队列分区 {}，删除 {} 条消息", queue_key, removed);
        Ok(removed)
    }

    pub async fn get(&self, message_id: i64) -> QueueResult<Option<QueueMessage>> {
        self.repo.get(message_id).await
    }

    pub async fn list(&self, queue_key: &str) -> QueueResult<Vec<QueueMessage>> {
        self.repo.list_by_key(queue_key).await
    }
}

//! 测试替身：固定时钟与可注入失败的队列仓储

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ormq_domain::{BackendCapabilities, Clock, NewQueueMessage, QueueMessage, QueueRepository};
use ormq_errors::{QueueError, QueueResult};

/// 可设置、可推进的时钟，克隆体共享同一时间
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// 包装任意队列仓储，前 `succeed_inserts` 次插入正常，之后的插入返回存储错误
pub struct FailingQueueRepository {
    inner: Arc<dyn QueueRepository>,
    succeed_inserts: usize,
    inserts: AtomicUsize,
}

impl FailingQueueRepository {
    pub fn new(inner: Arc<dyn QueueRepository>, succeed_inserts: usize) -> Self {
        Self {
            inner,
            succeed_inserts,
            inserts: AtomicUsize::new(0),
        }
    }

    /// 所有插入都失败
    pub fn always_failing(inner: Arc<dyn QueueRepository>) -> Self {
        Self::new(inner, 0)
    }
}

#[async_trait]
impl QueueRepository for FailingQueueRepository {
    fn capabilities(&self) -> BackendCapabilities {
        self.inner.capabilities()
    }

    async fn insert(&self, message: &NewQueueMessage) -> QueueResult<QueueMessage> {
        let attempt = self.inserts.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.succeed_inserts {
            return Err(QueueError::storage(format!(
                "injected failure on insert #{}",
                attempt + 1
            )));
        }
        self.inner.insert(message).await
    }

    async fn get(&self, id: i64) -> QueueResult<Option<QueueMessage>> {
        self.inner.get(id).await
    }

    async fn claim_next(
        &self,
        key: &str,
        stale_before: DateTime<Utc>,
        lock: DateTime<Utc>,
    ) -> QueueResult<Option<QueueMessage>> {
        self.inner.claim_next(key, stale_before, lock).await
    }

    async fn list_by_key(&self, key: &str) -> QueueResult<Vec<QueueMessage>> {
        self.inner.list_by_key(key).await
    }

    async fn swap_lock(
        &self,
        id: i64,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> QueueResult<bool> {
        self.inner.swap_lock(id, expected, new).await
    }

    async fn clear_lock(&self, id: i64) -> QueueResult<bool> {
        self.inner.clear_lock(id).await
    }

    async fn delete(&self, id: i64) -> QueueResult<bool> {
        self.inner.delete(id).await
    }

    async fn delete_by_key(&self, key: &str) -> QueueResult<u64> {
        self.inner.delete_by_key(key).await
    }

    async fn count(&self, key: &str) -> QueueResult<i64> {
        self.inner.count(key).await
    }

    async fn count_locked(&self, key: &str, stale_before: DateTime<Utc>) -> QueueResult<i64> {
        self.inner.count_locked(key, stale_before).await
    }
}

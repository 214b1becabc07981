use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ormq_domain::{BackendCapabilities, NewQueueMessage, QueueMessage, QueueRepository};
use ormq_errors::{QueueError, QueueResult};
use tracing::debug;

use super::store::MemoryStore;

pub struct MemoryQueueRepository {
    store: MemoryStore,
    capabilities: BackendCapabilities,
}

impl MemoryQueueRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self::with_capabilities(store, BackendCapabilities::DOCUMENT)
    }

    /// 能力只能向下收窄：文档存储本身就不支持原子领取
    pub fn with_capabilities(store: MemoryStore, capabilities: BackendCapabilities) -> Self {
        let capabilities = BackendCapabilities::DOCUMENT
            .restrict(Some(capabilities.atomic_claim), Some(capabilities.boolean_filter));
        Self { store, capabilities }
    }
}

#[async_trait]
impl QueueRepository for MemoryQueueRepository {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    async fn insert(&self, message: &NewQueueMessage) -> QueueResult<QueueMessage> {
        let mut collections = self.store.collections.write().await;
        let id = collections.next_queue_id();
        let created = QueueMessage {
            id,
            key: message.key.clone(),
            task_id: message.task_id.clone(),
            name: message.name.clone(),
            func: message.func.clone(),
            hook: message.hook.clone(),
            payload: message.payload.clone(),
            lock: None,
        };
        collections.queue.insert(id, created.clone());
        debug!("写入队列文档: {}", created.entity_description());
        Ok(created)
    }

    async fn get(&self, id: i64) -> QueueResult<Option<QueueMessage>> {
        let collections = self.store.collections.read().await;
        Ok(collections.queue.get(&id).cloned())
    }

    async fn claim_next(
        &self,
        _key: &str,
        _stale_before: DateTime<Utc>,
        _lock: DateTime<Utc>,
    ) -> QueueResult<Option<QueueMessage>> {
        Err(QueueError::unsupported("文档存储不支持单语句领取，请使用逐行比较交换"))
    }

    async fn list_by_key(&self, key: &str) -> QueueResult<Vec<QueueMessage>> {
        let collections = self.store.collections.read().await;
        Ok(collections
            .queue
            .values()
            .filter(|m| m.key == key)
            .cloned()
            .collect())
    }

    async fn swap_lock(
        &self,
        id: i64,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> QueueResult<bool> {
        let mut collections = self.store.collections.write().await;
        match collections.queue.get_mut(&id) {
            Some(message) if message.lock == expected => {
                message.lock = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_lock(&self, id: i64) -> QueueResult<bool> {
        let mut collections = self.store.collections.write().await;
        match collections.queue.get_mut(&id) {
            Some(message) if message.lock.is_some() => {
                message.lock = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: i64) -> QueueResult<bool> {
        let mut collections = self.store.collections.write().await;
        Ok(collections.queue.remove(&id).is_some())
    }

    async fn delete_by_key(&self, key: &str) -> QueueResult<u64> {
        let mut collections = self.store.collections.write().await;
        let before = collections.queue.len();
        collections.queue.retain(|_, m| m.key != key);
        Ok((before - collections.queue.len()) as u64)
    }

    async fn count(&self, key: &str) -> QueueResult<i64> {
        let collections = self.store.collections.read().await;
        Ok(collections.queue.values().filter(|m| m.key == key).count() as i64)
    }

    async fn count_locked(&self, key: &str, stale_before: DateTime<Utc>) -> QueueResult<i64> {
        let collections = self.store.collections.read().await;
        Ok(collections
            .queue
            .values()
            .filter(|m| m.key == key && !m.is_available(stale_before))
            .count() as i64)
    }
}

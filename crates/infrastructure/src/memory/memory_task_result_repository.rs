use async_trait::async_trait;
use ormq_domain::{BackendCapabilities, TaskResult, TaskResultFilter, TaskResultRepository};
use ormq_errors::{QueueError, QueueResult};
use tracing::debug;

use super::store::MemoryStore;

pub struct MemoryTaskResultRepository {
    store: MemoryStore,
    capabilities: BackendCapabilities,
}

impl MemoryTaskResultRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self::with_capabilities(store, BackendCapabilities::DOCUMENT)
    }

    pub fn with_capabilities(store: MemoryStore, capabilities: BackendCapabilities) -> Self {
        let capabilities = BackendCapabilities::DOCUMENT
            .restrict(Some(capabilities.atomic_claim), Some(capabilities.boolean_filter));
        Self { store, capabilities }
    }
}

#[async_trait]
impl TaskResultRepository for MemoryTaskResultRepository {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    async fn insert(&self, result: &TaskResult) -> QueueResult<()> {
        let mut collections = self.store.collections.write().await;
        if collections.results.contains_key(&result.id) {
            return Err(QueueError::storage(format!("任务结果 {} 已存在", result.id)));
        }
        collections.results.insert(result.id.clone(), result.clone());
        debug!("写入结果文档: {}", result.entity_description());
        Ok(())
    }

    async fn get(&self, id: &str) -> QueueResult<Option<TaskResult>> {
        let collections = self.store.collections.read().await;
        Ok(collections.results.get(id).cloned())
    }

    async fn find(&self, filter: &TaskResultFilter) -> QueueResult<Vec<TaskResult>> {
        reject_boolean_filter(filter)?;

        let collections = self.store.collections.read().await;
        let mut matched: Vec<TaskResult> = collections
            .results
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.stopped.cmp(&a.stopped));
        if let Some(limit) = filter.limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }

    async fn count(&self, filter: &TaskResultFilter) -> QueueResult<i64> {
        reject_boolean_filter(filter)?;
        let collections = self.store.collections.read().await;
        Ok(collections.results.values().filter(|r| filter.matches(r)).count() as i64)
    }

    async fn delete(&self, id: &str) -> QueueResult<bool> {
        let mut collections = self.store.collections.write().await;
        Ok(collections.results.remove(id).is_some())
    }
}

fn reject_boolean_filter(filter: &TaskResultFilter) -> QueueResult<()> {
    if filter.success.is_some() {
        return Err(QueueError::unsupported("文档存储不支持按布尔字段过滤"));
    }
    Ok(())
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ormq_domain::{BackendCapabilities, Schedule, ScheduleFilter, ScheduleRepository};
use ormq_errors::QueueResult;
use tracing::debug;

use super::store::MemoryStore;

pub struct MemoryScheduleRepository {
    store: MemoryStore,
    capabilities: BackendCapabilities,
}

impl MemoryScheduleRepository {
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
impl ScheduleRepository for MemoryScheduleRepository {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    async fn create(&self, schedule: &Schedule) -> QueueResult<Schedule> {
        let mut collections = self.store.collections.write().await;
        let mut created = schedule.clone();
        created.id = collections.next_schedule_id();
        collections.schedules.insert(created.id, created.clone());
        debug!("写入调度文档: {}", created.entity_description());
        Ok(created)
    }

    async fn get(&self, id: i64) -> QueueResult<Option<Schedule>> {
        let collections = self.store.collections.read().await;
        Ok(collections.schedules.get(&id).cloned())
    }

    async fn find(&self, filter: &ScheduleFilter) -> QueueResult<Vec<Schedule>> {
        let collections = self.store.collections.read().await;
        let matched = collections
            .schedules
            .values()
            .filter(|s| filter.matches(s))
            .cloned();
        Ok(match filter.limit {
            Some(limit) => matched.take(limit.max(0) as usize).collect(),
            None => matched.collect(),
        })
    }

    async fn find_due(&self, now: DateTime<Utc>) -> QueueResult<Vec<Schedule>> {
        let collections = self.store.collections.read().await;
        let mut due: Vec<Schedule> = collections
            .schedules
            .values()
            .filter(|s| s.repeats != 0 && s.next_run <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_run.cmp(&b.next_run).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn advance(
        &self,
        schedule: &Schedule,
        expected_next_run: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut collections = self.store.collections.write().await;
        match collections.schedules.get_mut(&schedule.id) {
            Some(stored) if stored.repeats != 0 && stored.next_run == expected_next_run => {
                stored.next_run = schedule.next_run;
                stored.last_run = schedule.last_run;
                stored.repeats = schedule.repeats;
                stored.task_id = schedule.task_id.clone();
                stored.success = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore(&self, original: &Schedule, claimed_task_id: &str) -> QueueResult<bool> {
        let mut collections = self.store.collections.write().await;
        match collections.schedules.get_mut(&original.id) {
            Some(stored) if stored.task_id.as_deref() == Some(claimed_task_id) => {
                stored.next_run = original.next_run;
                stored.last_run = original.last_run;
                stored.repeats = original.repeats;
                stored.task_id = original.task_id.clone();
                stored.success = original.success;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_outcome(&self, id: i64, task_id: &str, success: bool) -> QueueResult<bool> {
        let mut collections = self.store.collections.write().await;
        match collections.schedules.get_mut(&id) {
            Some(stored) if stored.task_id.as_deref() == Some(task_id) => {
                stored.success = Some(success);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: i64) -> QueueResult<bool> {
        let mut collections = self.store.collections.write().await;
        Ok(collections.schedules.remove(&id).is_some())
    }
}

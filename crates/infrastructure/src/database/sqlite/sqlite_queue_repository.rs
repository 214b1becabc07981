use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ormq_domain::{BackendCapabilities, NewQueueMessage, QueueMessage, QueueRepository};
use ormq_errors::QueueResult;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use crate::error_handling::{
    DatabaseResultExt, OperationContext, RepositoryErrorHelpers, RepositoryOperation,
};

const ENTITY: &str = "队列消息";
const COLUMNS: &str = "id, key, task_id, name, func, hook, payload, lock";

pub struct SqliteQueueRepository {
    pool: SqlitePool,
    capabilities: BackendCapabilities,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_capabilities(pool, BackendCapabilities::RELATIONAL)
    }

    pub fn with_capabilities(pool: SqlitePool, capabilities: BackendCapabilities) -> Self {
        Self { pool, capabilities }
    }

    fn row_to_message(row: &SqliteRow) -> QueueResult<QueueMessage> {
        Ok(QueueMessage {
            id: row.try_get("id")?,
            key: row.try_get("key")?,
            task_id: row.try_get("task_id")?,
            name: row.try_get("name")?,
            func: row.try_get("func")?,
            hook: row.try_get("hook")?,
            payload: row.try_get("payload")?,
            lock: row.try_get("lock")?,
        })
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    #[instrument(skip(self, message), fields(key = %message.key, task_id = %message.task_id))]
    async fn insert(&self, message: &NewQueueMessage) -> QueueResult<QueueMessage> {
        let context = OperationContext::new(RepositoryOperation::Create, ENTITY)
            .with_additional_info(format!("分区: {}", message.key));

        let row = sqlx::query(&format!(
            "INSERT INTO ormq (key, task_id, name, func, hook, payload, lock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)
             RETURNING {COLUMNS}"
        ))
        .bind(&message.key)
        .bind(&message.task_id)
        .bind(&message.name)
        .bind(&message.func)
        .bind(&message.hook)
        .bind(&message.payload)
        .fetch_one(&self.pool)
        .await
        .with_context(&context)?;

        let created = Self::row_to_message(&row)?;
        RepositoryErrorHelpers::log_operation_success(
            &context.with_id(created.id),
            Some(&created.entity_description()),
        );
        Ok(created)
    }

    async fn get(&self, id: i64) -> QueueResult<Option<QueueMessage>> {
        let context = OperationContext::new(RepositoryOperation::Read, ENTITY).with_id(id);
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM ormq WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(&context)?;
        row.as_ref().map(Self::row_to_message).transpose()
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn claim_next(
        &self,
        key: &str,
        stale_before: DateTime<Utc>,
        lock: DateTime<Utc>,
    ) -> QueueResult<Option<QueueMessage>> {
        let context = OperationContext::new(RepositoryOperation::Claim, ENTITY)
            .with_additional_info(format!("分区: {key}"));

        // 子查询挑选与加锁在同一条 UPDATE 中完成，SQLite 的写锁保证不会重复领取
        let row = sqlx::query(&format!(
            "UPDATE ormq SET lock = ?1
             WHERE id = (
                 SELECT id FROM ormq
                 WHERE key = ?2 AND (lock IS NULL OR lock < ?3)
                 ORDER BY id
                 LIMIT 1
             )
             RETURNING {COLUMNS}"
        ))
        .bind(lock)
        .bind(key)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .with_context(&context)?;

        match row {
            Some(row) => {
                let message = Self::row_to_message(&row)?;
                debug!("领取队列消息: ID {}, 任务: {}", message.id, message.task_id);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    async fn list_by_key(&self, key: &str) -> QueueResult<Vec<QueueMessage>> {
        let context = OperationContext::new(RepositoryOperation::Query, ENTITY)
            .with_additional_info(format!("分区: {key}"));
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM ormq WHERE key = ?1 ORDER BY id"
        ))
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .with_context(&context)?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn swap_lock(
        &self,
        id: i64,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> QueueResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Update, ENTITY).with_id(id);
        let result = sqlx::query("UPDATE ormq SET lock = ?1 WHERE id = ?2 AND lock IS ?3")
            .bind(new)
            .bind(id)
            .bind(expected)
            .execute(&self.pool)
            .await
            .with_context(&context)?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_lock(&self, id: i64) -> QueueResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Update, ENTITY).with_id(id);
        let result = sqlx::query("UPDATE ormq SET lock = NULL WHERE id = ?1 AND lock IS NOT NULL")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(&context)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: i64) -> QueueResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Delete, ENTITY).with_id(id);
        let result = sqlx::query("DELETE FROM ormq WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(&context)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_by_key(&self, key: &str) -> QueueResult<u64> {
        let context = OperationContext::new(RepositoryOperation::Delete, ENTITY)
            .with_additional_info(format!("分区: {key}"));
        let result = sqlx::query("DELETE FROM ormq WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(&context)?;
        Ok(result.rows_affected())
    }

    async fn count(&self, key: &str) -> QueueResult<i64> {
        let context = OperationContext::new(RepositoryOperation::Query, ENTITY);
        let row = sqlx::query("SELECT COUNT(*) AS total FROM ormq WHERE key = ?1")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .with_context(&context)?;
        Ok(row.try_get("total")?)
    }

    async fn count_locked(&self, key: &str, stale_before: DateTime<Utc>) -> QueueResult<i64> {
        let context = OperationContext::new(RepositoryOperation::Query, ENTITY);
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM ormq WHERE key = ?1 AND lock IS NOT NULL AND lock >= ?2",
        )
        .bind(key)
        .bind(stale_before)
        .fetch_one(&self.pool)
        .await
        .with_context(&context)?;
        Ok(row.try_get("total")?)
    }
}

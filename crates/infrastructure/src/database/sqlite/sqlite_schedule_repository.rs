use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ormq_domain::{BackendCapabilities, Schedule, ScheduleFilter, ScheduleRepository};
use ormq_errors::QueueResult;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;
use crate::error_handling::{
    DatabaseResultExt, OperationContext, RepositoryErrorHelpers, RepositoryOperation,
};

const ENTITY: &str = "调度";
const COLUMNS: &str = "id, name, func, hook, args, kwargs, schedule_type, minutes, cron, repeats, next_run, last_run, cluster, task_id, success";

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
    capabilities: BackendCapabilities,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_capabilities(pool, BackendCapabilities::RELATIONAL)
    }

    pub fn with_capabilities(pool: SqlitePool, capabilities: BackendCapabilities) -> Self {
        Self { pool, capabilities }
    }

    fn row_to_schedule(row: &SqliteRow) -> QueueResult<Schedule> {
        let args: Option<String> = row.try_get("args")?;
        let kwargs: Option<String> = row.try_get("kwargs")?;

        Ok(Schedule {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            func: row.try_get("func")?,
            hook: row.try_get("hook")?,
            args: MappingHelpers::parse_args(args.as_deref())?,
            kwargs: MappingHelpers::parse_kwargs(kwargs.as_deref())?,
            schedule_type: row.try_get("schedule_type")?,
            minutes: row.try_get("minutes")?,
            cron: row.try_get("cron")?,
            repeats: row.try_get("repeats")?,
            next_run: row.try_get("next_run")?,
            last_run: row.try_get("last_run")?,
            cluster: row.try_get("cluster")?,
            task_id: row.try_get("task_id")?,
            success: row.try_get("success")?,
        })
    }

    fn build_select(filter: &ScheduleFilter) -> QueryBuilder<'_, Sqlite> {
        let mut query = QueryBuilder::new(format!("SELECT {COLUMNS} FROM schedules WHERE 1=1"));
        if let Some(cluster) = &filter.cluster {
            query.push(" AND cluster = ").push_bind(cluster.as_str());
        }
        if let Some(schedule_type) = filter.schedule_type {
            query.push(" AND schedule_type = ").push_bind(schedule_type);
        }
        if let Some(search) = &filter.search {
            query
                .push(" AND func LIKE ")
                .push_bind(MappingHelpers::contains_pattern(search))
                .push(r" ESCAPE '\'");
        }
        query.push(" ORDER BY id");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit);
        }
        query
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    #[instrument(skip(self, schedule), fields(func = %schedule.func, schedule_type = %schedule.schedule_type))]
    async fn create(&self, schedule: &Schedule) -> QueueResult<Schedule> {
        let context = OperationContext::new(RepositoryOperation::Create, ENTITY);

        let row = sqlx::query(&format!(
            "INSERT INTO schedules (name, func, hook, args, kwargs, schedule_type, minutes, cron, repeats, next_run, last_run, cluster, task_id, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             RETURNING {COLUMNS}"
        ))
        .bind(&schedule.name)
        .bind(&schedule.func)
        .bind(&schedule.hook)
        .bind(MappingHelpers::args_to_json(&schedule.args)?)
        .bind(MappingHelpers::kwargs_to_json(&schedule.kwargs)?)
        .bind(schedule.schedule_type)
        .bind(schedule.minutes)
        .bind(&schedule.cron)
        .bind(schedule.repeats)
        .bind(schedule.next_run)
        .bind(schedule.last_run)
        .bind(&schedule.cluster)
        .bind(&schedule.task_id)
        .bind(schedule.success)
        .fetch_one(&self.pool)
        .await
        .with_context(&context)?;

        let created = Self::row_to_schedule(&row)?;
        RepositoryErrorHelpers::log_operation_success(
            &context.with_id(created.id),
            Some(&created.entity_description()),
        );
        Ok(created)
    }

    async fn get(&self, id: i64) -> QueueResult<Option<Schedule>> {
        let context = OperationContext::new(RepositoryOperation::Read, ENTITY).with_id(id);
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM schedules WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(&context)?;
        row.as_ref().map(Self::row_to_schedule).transpose()
    }

    async fn find(&self, filter: &ScheduleFilter) -> QueueResult<Vec<Schedule>> {
        let context = OperationContext::new(RepositoryOperation::Query, ENTITY);
        let mut query = Self::build_select(filter);
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .with_context(&context)?;
        rows.iter().map(Self::row_to_schedule).collect()
    }

    async fn find_due(&self, now: DateTime<Utc>) -> QueueResult<Vec<Schedule>> {
        let context = OperationContext::new(RepositoryOperation::Query, ENTITY)
            .with_additional_info("到期调度");
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM schedules
             WHERE repeats != 0 AND next_run <= ?1
             ORDER BY next_run, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .with_context(&context)?;
        rows.iter().map(Self::row_to_schedule).collect()
    }

    #[instrument(skip(self, schedule), fields(schedule_id = schedule.id))]
    async fn advance(
        &self,
        schedule: &Schedule,
        expected_next_run: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Update, ENTITY).with_id(schedule.id);
        let result = sqlx::query(
            "UPDATE schedules
             SET next_run = ?1, last_run = ?2, repeats = ?3, task_id = ?4, success = NULL
             WHERE id = ?5 AND next_run = ?6 AND repeats != 0",
        )
        .bind(schedule.next_run)
        .bind(schedule.last_run)
        .bind(schedule.repeats)
        .bind(&schedule.task_id)
        .bind(schedule.id)
        .bind(expected_next_run)
        .execute(&self.pool)
        .await
        .with_context(&context)?;

        let claimed = result.rows_affected() == 1;
        if !claimed {
            debug!("调度 {} 已被其他调度器推进", schedule.id);
        }
        Ok(claimed)
    }

    async fn restore(&self, original: &Schedule, claimed_task_id: &str) -> QueueResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Update, ENTITY)
            .with_id(original.id)
            .with_additional_info("撤销认领");
        let result = sqlx::query(
            "UPDATE schedules
             SET next_run = ?1, last_run = ?2, repeats = ?3, task_id = ?4, success = ?5
             WHERE id = ?6 AND task_id = ?7",
        )
        .bind(original.next_run)
        .bind(original.last_run)
        .bind(original.repeats)
        .bind(&original.task_id)
        .bind(original.success)
        .bind(original.id)
        .bind(claimed_task_id)
        .execute(&self.pool)
        .await
        .with_context(&context)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_outcome(&self, id: i64, task_id: &str, success: bool) -> QueueResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Update, ENTITY).with_id(id);
        let result = sqlx::query("UPDATE schedules SET success = ?1 WHERE id = ?2 AND task_id = ?3")
            .bind(success)
            .bind(id)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .with_context(&context)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: i64) -> QueueResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Delete, ENTITY).with_id(id);
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(&context)?;
        Ok(result.rows_affected() == 1)
    }
}

use async_trait::async_trait;
use ormq_domain::{BackendCapabilities, TaskResult, TaskResultFilter, TaskResultRepository};
use ormq_errors::QueueResult;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;

use crate::database::mapping::MappingHelpers;
use crate::error_handling::{
    DatabaseResultExt, OperationContext, RepositoryErrorHelpers, RepositoryOperation,
};

const ENTITY: &str = "任务结果";
const LIKE_ESCAPE: &str = r" ESCAPE '\'";
const COLUMNS: &str = r#"id, name, func, hook, args, kwargs, result, "group", started, stopped, success, attempt_count"#;

pub struct SqliteTaskResultRepository {
    pool: SqlitePool,
    capabilities: BackendCapabilities,
}

impl SqliteTaskResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_capabilities(pool, BackendCapabilities::RELATIONAL)
    }

    pub fn with_capabilities(pool: SqlitePool, capabilities: BackendCapabilities) -> Self {
        Self { pool, capabilities }
    }

    fn row_to_result(row: &SqliteRow) -> QueueResult<TaskResult> {
        let args: Option<String> = row.try_get("args")?;
        let kwargs: Option<String> = row.try_get("kwargs")?;
        let result: Option<String> = row.try_get("result")?;

        Ok(TaskResult {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            func: row.try_get("func")?,
            hook: row.try_get("hook")?,
            args: MappingHelpers::parse_args(args.as_deref())?,
            kwargs: MappingHelpers::parse_kwargs(kwargs.as_deref())?,
            result: MappingHelpers::parse_result(result.as_deref())?,
            group: row.try_get("group")?,
            started: row.try_get("started")?,
            stopped: row.try_get("stopped")?,
            success: row.try_get("success")?,
            attempt_count: row.try_get("attempt_count")?,
        })
    }

    fn build_select(filter: &TaskResultFilter) -> QueryBuilder<'_, Sqlite> {
        let mut query = QueryBuilder::new(format!("SELECT {COLUMNS} FROM task_results WHERE 1=1"));
        Self::push_conditions(&mut query, filter);

        query.push(" ORDER BY stopped DESC");

        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit);
        }
        query
    }

    fn push_conditions<'a>(query: &mut QueryBuilder<'a, Sqlite>, filter: &'a TaskResultFilter) {
        if let Some(success) = filter.success {
            query.push(" AND success = ").push_bind(success);
        }
        if let Some(min) = filter.attempt_count_gt {
            query.push(" AND attempt_count > ").push_bind(min);
        }
        if let Some(group) = &filter.group {
            query.push(r#" AND "group" = "#).push_bind(group.as_str());
        }
        if let Some(search) = &filter.search {
            let pattern = MappingHelpers::contains_pattern(search);
            query
                .push(" AND (name LIKE ")
                .push_bind(pattern.clone())
                .push(LIKE_ESCAPE)
                .push(" OR func LIKE ")
                .push_bind(pattern.clone())
                .push(LIKE_ESCAPE)
                .push(r#" OR "group" LIKE "#)
                .push_bind(pattern)
                .push(LIKE_ESCAPE)
                .push(")");
        }
        if let Some(ids) = &filter.ids {
            query.push(" AND id IN (");
            let mut separated = query.separated(", ");
            for id in ids {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");
        }
    }
}

#[async_trait]
impl TaskResultRepository for SqliteTaskResultRepository {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    #[instrument(skip(self, result), fields(task_id = %result.id, success = result.success))]
    async fn insert(&self, result: &TaskResult) -> QueueResult<()> {
        let context = OperationContext::new(RepositoryOperation::Create, ENTITY).with_id(&result.id);

        sqlx::query(&format!(
            "INSERT INTO task_results ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ))
        .bind(&result.id)
        .bind(&result.name)
        .bind(&result.func)
        .bind(&result.hook)
        .bind(MappingHelpers::args_to_json(&result.args)?)
        .bind(MappingHelpers::kwargs_to_json(&result.kwargs)?)
        .bind(MappingHelpers::result_to_json(result.result.as_ref())?)
        .bind(&result.group)
        .bind(result.started)
        .bind(result.stopped)
        .bind(result.success)
        .bind(result.attempt_count)
        .execute(&self.pool)
        .await
        .with_context(&context)?;

        RepositoryErrorHelpers::log_operation_success(&context, Some(&result.entity_description()));
        Ok(())
    }

    async fn get(&self, id: &str) -> QueueResult<Option<TaskResult>> {
        let context = OperationContext::new(RepositoryOperation::Read, ENTITY).with_id(id);
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM task_results WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(&context)?;
        row.as_ref().map(Self::row_to_result).transpose()
    }

    async fn find(&self, filter: &TaskResultFilter) -> QueueResult<Vec<TaskResult>> {
        if filter.ids.as_ref().is_some_and(|ids| ids.is_empty()) {
            return Ok(Vec::new());
        }
        let context = OperationContext::new(RepositoryOperation::Query, ENTITY);
        let mut query = Self::build_select(filter);
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .with_context(&context)?;
        rows.iter().map(Self::row_to_result).collect()
    }

    async fn count(&self, filter: &TaskResultFilter) -> QueueResult<i64> {
        if filter.ids.as_ref().is_some_and(|ids| ids.is_empty()) {
            return Ok(0);
        }
        let context = OperationContext::new(RepositoryOperation::Query, ENTITY);
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM task_results WHERE 1=1");
        Self::push_conditions(&mut query, filter);
        let count: i64 = query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .with_context(&context)?;
        Ok(count)
    }

    async fn delete(&self, id: &str) -> QueueResult<bool> {
        let context = OperationContext::new(RepositoryOperation::Delete, ENTITY).with_id(id);
        let result = sqlx::query("DELETE FROM task_results WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(&context)?;
        Ok(result.rows_affected() == 1)
    }
}

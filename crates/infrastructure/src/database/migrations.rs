//! 表结构迁移
//!
//! 三张表：`ormq`（队列行）、`task_results`（结果台账）、`schedules`（周期调度）。
//! 语句均为幂等的 `IF NOT EXISTS`，可在每次启动时执行。

use ormq_errors::QueueResult;
use sqlx::{PgPool, SqlitePool};
use tracing::{debug, info};

use crate::error_handling::{DatabaseResultExt, OperationContext, RepositoryOperation};

const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ormq (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL,
        task_id TEXT NOT NULL,
        name TEXT NOT NULL,
        func TEXT NOT NULL,
        hook TEXT,
        payload TEXT NOT NULL,
        lock DATETIME
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_results (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        func TEXT NOT NULL,
        hook TEXT,
        args TEXT NOT NULL DEFAULT '[]',
        kwargs TEXT NOT NULL DEFAULT '{}',
        result TEXT,
        "group" TEXT,
        started DATETIME NOT NULL,
        stopped DATETIME NOT NULL,
        success BOOLEAN NOT NULL DEFAULT 1,
        attempt_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        func TEXT NOT NULL,
        hook TEXT,
        args TEXT NOT NULL DEFAULT '[]',
        kwargs TEXT NOT NULL DEFAULT '{}',
        schedule_type TEXT NOT NULL DEFAULT 'O',
        minutes INTEGER,
        cron TEXT,
        repeats INTEGER NOT NULL DEFAULT -1,
        next_run DATETIME NOT NULL,
        last_run DATETIME,
        cluster TEXT,
        task_id TEXT,
        success BOOLEAN
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ormq_key_lock ON ormq(key, lock)",
    "CREATE INDEX IF NOT EXISTS idx_task_results_success ON task_results(success)",
    "CREATE INDEX IF NOT EXISTS idx_task_results_stopped ON task_results(stopped)",
    r#"CREATE INDEX IF NOT EXISTS idx_task_results_group ON task_results("group")"#,
    "CREATE INDEX IF NOT EXISTS idx_schedules_next_run ON schedules(next_run)",
];

const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS ormq (
        id BIGSERIAL PRIMARY KEY,
        key VARCHAR(100) NOT NULL,
        task_id VARCHAR(64) NOT NULL,
        name VARCHAR(255) NOT NULL,
        func VARCHAR(255) NOT NULL,
        hook VARCHAR(255),
        payload TEXT NOT NULL,
        lock TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_results (
        id VARCHAR(64) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        func VARCHAR(255) NOT NULL,
        hook VARCHAR(255),
        args TEXT NOT NULL DEFAULT '[]',
        kwargs TEXT NOT NULL DEFAULT '{}',
        result TEXT,
        "group" VARCHAR(255),
        started TIMESTAMPTZ NOT NULL,
        stopped TIMESTAMPTZ NOT NULL,
        success BOOLEAN NOT NULL DEFAULT TRUE,
        attempt_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255),
        func VARCHAR(255) NOT NULL,
        hook VARCHAR(255),
        args TEXT NOT NULL DEFAULT '[]',
        kwargs TEXT NOT NULL DEFAULT '{}',
        schedule_type VARCHAR(2) NOT NULL DEFAULT 'O',
        minutes INTEGER,
        cron VARCHAR(100),
        repeats INTEGER NOT NULL DEFAULT -1,
        next_run TIMESTAMPTZ NOT NULL,
        last_run TIMESTAMPTZ,
        cluster VARCHAR(100),
        task_id VARCHAR(64),
        success BOOLEAN
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ormq_key_lock ON ormq(key, lock)",
    "CREATE INDEX IF NOT EXISTS idx_task_results_success ON task_results(success)",
    "CREATE INDEX IF NOT EXISTS idx_task_results_stopped ON task_results(stopped)",
    r#"CREATE INDEX IF NOT EXISTS idx_task_results_group ON task_results("group")"#,
    "CREATE INDEX IF NOT EXISTS idx_schedules_next_run ON schedules(next_run)",
];

pub async fn migrate_sqlite(pool: &SqlitePool) -> QueueResult<()> {
    debug!("Running SQLite migrations");
    let context = OperationContext::new(RepositoryOperation::Migrate, "SQLite表结构");
    for statement in SQLITE_SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(&context)?;
    }
    info!("SQLite表结构已就绪");
    Ok(())
}

pub async fn migrate_postgres(pool: &PgPool) -> QueueResult<()> {
    debug!("Running PostgreSQL migrations");
    let context = OperationContext::new(RepositoryOperation::Migrate, "PostgreSQL表结构");
    for statement in POSTGRES_SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(&context)?;
    }
    info!("PostgreSQL表结构已就绪");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_sqlite_migrations_are_idempotent() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        migrate_sqlite(&pool).await.unwrap();
        migrate_sqlite(&pool).await.unwrap();

        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
        let tables: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        assert!(tables.contains(&"ormq".to_string()));
        assert!(tables.contains(&"task_results".to_string()));
        assert!(tables.contains(&"schedules".to_string()));
    }
}

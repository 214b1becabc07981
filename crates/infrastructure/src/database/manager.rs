use std::collections::BTreeMap;
use std::sync::Arc;

use ormq_config::{AppConfig, DatabaseConfig};
use ormq_domain::{
    BackendCapabilities, QueueRepository, ScheduleRepository, TaskResultRepository,
};
use ormq_errors::{QueueError, QueueResult};
use tracing::{debug, info};

use super::migrations::{migrate_postgres, migrate_sqlite};
use super::postgres::{
    PostgresQueueRepository, PostgresScheduleRepository, PostgresTaskResultRepository,
};
use super::sqlite::{SqliteQueueRepository, SqliteScheduleRepository, SqliteTaskResultRepository};
use crate::memory::{
    MemoryQueueRepository, MemoryScheduleRepository, MemoryStore, MemoryTaskResultRepository,
};

/// 根据连接串识别后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
    Memory,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else if url.starts_with("memory:") {
            DatabaseType::Memory
        } else {
            DatabaseType::SQLite
        }
    }

    /// 后端自身具备的能力，配置覆盖只能在此基础上降级
    pub fn native_capabilities(&self) -> BackendCapabilities {
        match self {
            DatabaseType::PostgreSQL | DatabaseType::SQLite => BackendCapabilities::RELATIONAL,
            DatabaseType::Memory => BackendCapabilities::DOCUMENT,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::PostgreSQL => write!(f, "postgresql"),
            DatabaseType::SQLite => write!(f, "sqlite"),
            DatabaseType::Memory => write!(f, "memory"),
        }
    }
}

/// 连接池
#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
    Memory(MemoryStore),
}

impl DatabasePool {
    pub async fn connect(config: &DatabaseConfig) -> QueueResult<Self> {
        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(config.acquire_timeout())
                    .idle_timeout(config.idle_timeout())
                    .connect(&config.url)
                    .await
                    .map_err(|e| QueueError::storage(format!("连接PostgreSQL失败: {e}")))?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let mut options = sqlx::sqlite::SqlitePoolOptions::new()
                    .acquire_timeout(config.acquire_timeout());
                // 内存库每个连接各自独立，只能保留唯一一条常驻连接
                if config.url.contains(":memory:") || config.url.contains("mode=memory") {
                    options = options
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None);
                } else {
                    options = options
                        .max_connections(config.max_connections)
                        .min_connections(config.min_connections)
                        .idle_timeout(config.idle_timeout());
                }
                let pool = options
                    .connect(&config.url)
                    .await
                    .map_err(|e| QueueError::storage(format!("连接SQLite失败: {e}")))?;
                Ok(DatabasePool::SQLite(pool))
            }
            DatabaseType::Memory => Ok(DatabasePool::Memory(MemoryStore::new())),
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
            DatabasePool::Memory(_) => DatabaseType::Memory,
        }
    }

    pub async fn health_check(&self) -> QueueResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::Memory(_) => {}
        }
        Ok(())
    }

    pub async fn migrate(&self) -> QueueResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => migrate_postgres(pool).await,
            DatabasePool::SQLite(pool) => migrate_sqlite(pool).await,
            DatabasePool::Memory(_) => Ok(()),
        }
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
            DatabasePool::Memory(_) => {}
        }
    }
}

/// 一个数据库别名对应的连接及其生效的能力
#[derive(Clone)]
pub struct DatabaseConnection {
    alias: String,
    pool: DatabasePool,
    capabilities: BackendCapabilities,
}

impl DatabaseConnection {
    pub async fn connect(alias: impl Into<String>, config: &DatabaseConfig) -> QueueResult<Self> {
        let alias = alias.into();
        let pool = DatabasePool::connect(config).await?;
        let capabilities = pool.database_type().native_capabilities().restrict(
            config.capabilities.atomic_claim,
            config.capabilities.boolean_filter,
        );
        info!(
            alias = %alias,
            backend = %pool.database_type(),
            atomic_claim = capabilities.atomic_claim,
            boolean_filter = capabilities.boolean_filter,
            "数据库连接已建立"
        );
        Ok(Self {
            alias,
            pool,
            capabilities,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    pub fn queue_repository(&self) -> Arc<dyn QueueRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresQueueRepository::with_capabilities(
                pool.clone(),
                self.capabilities,
            )),
            DatabasePool::SQLite(pool) => Arc::new(SqliteQueueRepository::with_capabilities(
                pool.clone(),
                self.capabilities,
            )),
            DatabasePool::Memory(store) => Arc::new(MemoryQueueRepository::with_capabilities(
                store.clone(),
                self.capabilities,
            )),
        }
    }

    pub fn result_repository(&self) -> Arc<dyn TaskResultRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(
                PostgresTaskResultRepository::with_capabilities(pool.clone(), self.capabilities),
            ),
            DatabasePool::SQLite(pool) => Arc::new(SqliteTaskResultRepository::with_capabilities(
                pool.clone(),
                self.capabilities,
            )),
            DatabasePool::Memory(store) => Arc::new(
                MemoryTaskResultRepository::with_capabilities(store.clone(), self.capabilities),
            ),
        }
    }

    pub fn schedule_repository(&self) -> Arc<dyn ScheduleRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(
                PostgresScheduleRepository::with_capabilities(pool.clone(), self.capabilities),
            ),
            DatabasePool::SQLite(pool) => Arc::new(SqliteScheduleRepository::with_capabilities(
                pool.clone(),
                self.capabilities,
            )),
            DatabasePool::Memory(store) => Arc::new(MemoryScheduleRepository::with_capabilities(
                store.clone(),
                self.capabilities,
            )),
        }
    }
}

/// 统一的数据库管理器，按别名持有连接
///
/// 代理、台账和调度各自通过别名取仓储，别名可以指向同一个库，也可以分开。
pub struct DatabaseManager {
    connections: BTreeMap<String, DatabaseConnection>,
}

impl DatabaseManager {
    pub async fn from_config(config: &AppConfig) -> QueueResult<Self> {
        let mut connections = BTreeMap::new();
        for (alias, database) in &config.databases {
            let connection = DatabaseConnection::connect(alias.clone(), database).await?;
            connections.insert(alias.clone(), connection);
        }
        debug!("共建立 {} 个数据库连接", connections.len());
        Ok(Self { connections })
    }

    /// 只有一个 `default` 别名的管理器
    pub async fn single(url: &str) -> QueueResult<Self> {
        let connection = DatabaseConnection::connect("default", &DatabaseConfig::with_url(url)).await?;
        let mut connections = BTreeMap::new();
        connections.insert("default".to_string(), connection);
        Ok(Self { connections })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn connection(&self, alias: &str) -> QueueResult<&DatabaseConnection> {
        self.connections
            .get(alias)
            .ok_or_else(|| QueueError::config_error(format!("未配置的数据库别名: {alias}")))
    }

    pub fn database_type(&self, alias: &str) -> QueueResult<DatabaseType> {
        Ok(self.connection(alias)?.database_type())
    }

    pub fn capabilities(&self, alias: &str) -> QueueResult<BackendCapabilities> {
        Ok(self.connection(alias)?.capabilities())
    }

    pub async fn migrate(&self) -> QueueResult<()> {
        for connection in self.connections.values() {
            connection.pool().migrate().await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> QueueResult<()> {
        for connection in self.connections.values() {
            connection.pool().health_check().await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        for connection in self.connections.values() {
            connection.pool().close().await;
        }
    }

    pub fn queue_repository(&self, alias: &str) -> QueueResult<Arc<dyn QueueRepository>> {
        Ok(self.connection(alias)?.queue_repository())
    }

    pub fn result_repository(&self, alias: &str) -> QueueResult<Arc<dyn TaskResultRepository>> {
        Ok(self.connection(alias)?.result_repository())
    }

    pub fn schedule_repository(&self, alias: &str) -> QueueResult<Arc<dyn ScheduleRepository>> {
        Ok(self.connection(alias)?.schedule_repository())
    }
}

//! 测试用存储
//!
//! SQLite 内存库只有一个连接，库随连接池一起销毁，测试之间互不影响。

use ormq_errors::QueueResult;
use ormq_infrastructure::DatabaseManager;

/// 测试使用的后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestBackend {
    Sqlite,
    Memory,
}

impl TestBackend {
    pub const ALL: [TestBackend; 2] = [TestBackend::Sqlite, TestBackend::Memory];

    pub fn url(&self) -> &'static str {
        match self {
            TestBackend::Sqlite => "sqlite::memory:",
            TestBackend::Memory => "memory:",
        }
    }

    /// 连接并建表，别名为 "default"
    pub async fn connect(&self) -> QueueResult<DatabaseManager> {
        let manager = DatabaseManager::single(self.url()).await?;
        manager.migrate().await?;
        Ok(manager)
    }
}

/// 测试日志，每个测试二进制调用一次即可
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

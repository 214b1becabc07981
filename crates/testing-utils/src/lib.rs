//! # ormq Testing Utils
//!
//! 工作区内共享的测试工具：
//!
//! - **Builders**: 调度、结果记录和任务信封的测试数据构造器
//! - **Mocks**: 可手动推进的 `FixedClock`，以及可注入失败的队列仓储包装
//! - **Fixtures**: 已建表的 SQLite 内存库与文档型内存后端
//!
//! ```toml
//! [dev-dependencies]
//! ormq-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod fixtures;
pub mod mocks;

pub use builders::*;
pub use fixtures::*;
pub use mocks::*;

//! 存储层：关系型（PostgreSQL / SQLite）与进程内文档存储三种后端的仓储实现

pub mod database;
pub mod error_handling;
pub mod memory;

pub use database::*;
pub use memory::*;

//! 仓储操作的错误上下文
//!
//! 为每次数据库访问附带实体与操作信息，出错时记录结构化日志再转换为 `QueueError`。

use ormq_errors::QueueError;
use sqlx::Error as SqlxError;
use std::fmt;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Claim,
    Migrate,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "检索"),
            RepositoryOperation::Claim => write!(f, "领取"),
            RepositoryOperation::Migrate => write!(f, "迁移"),
        }
    }
}

/// 一次仓储操作的上下文
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: RepositoryOperation,
    pub entity: &'static str,
    pub entity_id: Option<String>,
    pub additional_info: Option<String>,
}

impl OperationContext {
    pub fn new(operation: RepositoryOperation, entity: &'static str) -> Self {
        Self {
            operation,
            entity,
            entity_id: None,
            additional_info: None,
        }
    }

    pub fn with_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn with_additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    pub fn entity_description(&self) -> String {
        match &self.entity_id {
            Some(id) => format!("{} (ID: {})", self.entity, id),
            None => self.entity.to_string(),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    /// 记录数据库错误并转换；解码类错误归为序列化失败，其余视为存储不可用
    pub fn database_error(context: &OperationContext, err: SqlxError) -> QueueError {
        let converted = QueueError::from(err);
        match &converted {
            QueueError::SerializationFailure(_) => warn!(
                operation = %context.operation,
                entity = %context.entity_description(),
                additional_info = context.additional_info.as_deref().unwrap_or(""),
                error = %converted,
                "{}{}时数据解码失败",
                context.operation,
                context.entity
            ),
            _ => error!(
                operation = %context.operation,
                entity = %context.entity_description(),
                additional_info = context.additional_info.as_deref().unwrap_or(""),
                error = %converted,
                "{}{}失败",
                context.operation,
                context.entity
            ),
        }
        converted
    }

    pub fn log_operation_success(context: &OperationContext, details: Option<&str>) {
        debug!(
            operation = %context.operation,
            entity = %context.entity_description(),
            details = details.unwrap_or(""),
            "{}{}成功",
            context.operation,
            context.entity
        );
    }
}

/// 为 `sqlx` 结果附带上下文
pub trait DatabaseResultExt<T> {
    fn with_context(self, context: &OperationContext) -> Result<T, QueueError>;
}

impl<T> DatabaseResultExt<T> for Result<T, SqlxError> {
    fn with_context(self, context: &OperationContext) -> Result<T, QueueError> {
        self.map_err(|e| RepositoryErrorHelpers::database_error(context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_description() {
        let context = OperationContext::new(RepositoryOperation::Delete, "队列消息").with_id(42);
        assert_eq!(context.entity_description(), "队列消息 (ID: 42)");
        assert_eq!(context.operation.to_string(), "删除");
    }

    #[test]
    fn test_database_error_classification() {
        let context = OperationContext::new(RepositoryOperation::Read, "任务结果");
        let err = RepositoryErrorHelpers::database_error(&context, SqlxError::PoolTimedOut);
        assert!(matches!(err, QueueError::StorageUnavailable(_)));

        let err: Result<(), _> = Err(SqlxError::RowNotFound);
        assert!(err.with_context(&context).is_err());
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("存储不可用: {0}")]
    StorageUnavailable(String),
    #[error("租约冲突: 消息 {message_id} 已被其他Worker抢占")]
    LeaseConflict { message_id: i64 },
    #[error("无效的调度定义: {0}")]
    InvalidScheduleDefinition(String),
    #[error("序列化错误: {0}")]
    SerializationFailure(String),
    #[error("后端不支持该查询: {0}")]
    UnsupportedQuery(String),
    #[error("调度未找到: {id}")]
    ScheduleNotFound { id: i64 },
    #[error("任务结果未找到: {id}")]
    TaskResultNotFound { id: String },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

impl QueueError {
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::StorageUnavailable(msg.into())
    }
    pub fn invalid_schedule<S: Into<String>>(msg: S) -> Self {
        Self::InvalidScheduleDefinition(msg.into())
    }
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::SerializationFailure(msg.into())
    }
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedQuery(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn schedule_not_found(id: i64) -> Self {
        Self::ScheduleNotFound { id }
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QueueError::Internal(_) | QueueError::Configuration(_) | QueueError::UnsupportedQuery(_)
        )
    }
    /// 调用方的轮询/退避逻辑可以安全重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::StorageUnavailable(_) | QueueError::LeaseConflict { .. }
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            QueueError::StorageUnavailable(_) => "存储暂不可用，请稍后重试",
            QueueError::LeaseConflict { .. } => "消息已被其他Worker领取",
            QueueError::InvalidScheduleDefinition(_) => "调度配置有误",
            QueueError::SerializationFailure(_) => "任务参数无法编码或解码",
            QueueError::ScheduleNotFound { .. } => "请求的调度不存在",
            QueueError::TaskResultNotFound { .. } => "请求的任务记录不存在",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                QueueError::SerializationFailure(err.to_string())
            }
            other => QueueError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationFailure(err.to_string())
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;

use crate::*;

#[test]
fn test_queue_error_display() {
    let storage = QueueError::StorageUnavailable("connection refused".to_string());
    assert_eq!(storage.to_string(), "存储不可用: connection refused");

    let conflict = QueueError::LeaseConflict { message_id: 7 };
    assert_eq!(conflict.to_string(), "租约冲突: 消息 7 已被其他Worker抢占");

    let invalid = QueueError::InvalidScheduleDefinition("missing cron".to_string());
    assert_eq!(invalid.to_string(), "无效的调度定义: missing cron");

    let serial = QueueError::SerializationFailure("bad json".to_string());
    assert_eq!(serial.to_string(), "序列化错误: bad json");

    let not_found = QueueError::ScheduleNotFound { id: 42 };
    assert_eq!(not_found.to_string(), "调度未找到: 42");
}

#[test]
fn test_error_classification() {
    assert!(QueueError::storage("down").is_retryable());
    assert!(QueueError::LeaseConflict { message_id: 1 }.is_retryable());
    assert!(!QueueError::invalid_schedule("x").is_retryable());

    assert!(QueueError::config_error("x").is_fatal());
    assert!(QueueError::unsupported("x").is_fatal());
    assert!(!QueueError::storage("x").is_fatal());
}

#[test]
fn test_sqlx_error_conversion() {
    let err: QueueError = sqlx::Error::PoolTimedOut.into();
    assert!(matches!(err, QueueError::StorageUnavailable(_)));

    let err: QueueError = sqlx::Error::Decode("broken".into()).into();
    assert!(matches!(err, QueueError::SerializationFailure(_)));
}

#[test]
fn test_serde_error_conversion() {
    let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: QueueError = parse_err.into();
    assert!(matches!(err, QueueError::SerializationFailure(_)));
    assert_eq!(err.user_message(), "任务参数无法编码或解码");
}

#[test]
fn test_anyhow_conversion() {
    let err: QueueError = anyhow::anyhow!("boom").into();
    assert_eq!(err.to_string(), "内部错误: boom");
}

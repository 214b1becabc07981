//! ormq 的配置：数据库别名、代理、台账、调度、重新提交与日志

pub mod models;
pub mod validation;

pub use models::{
    AppConfig, AttemptPolicy, BrokerConfig, CapabilityOverrides, DatabaseConfig, ExhaustedPolicy,
    LedgerConfig, LogConfig, LogLevel, OutputFormat, ResubmitConfig, SchedulerConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 某个字段取值不合法
    #[error("配置校验失败: {0}")]
    Validation(String),

    /// 段之间相互引用不一致，例如别名不存在
    #[error("配置引用错误: {0}")]
    Reference(String),
}

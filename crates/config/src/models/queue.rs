use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 调度次数耗尽后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustedPolicy {
    /// 保留记录以供审计
    #[default]
    Retain,
    /// 自动删除
    Delete,
}

/// 重新提交失败任务时如何处理尝试次数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPolicy {
    /// 作为全新任务，从零计数
    #[default]
    Fresh,
    /// 视为同一逻辑任务的重试，延续原尝试次数
    CarryForward,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// 是否启用ORM代理；关闭时操作界面不展示队列
    pub enabled: bool,
    /// 队列表所在的数据库别名
    pub alias: String,
    /// 默认队列分区
    pub queue_key: String,
    /// 租约超时，超过后锁被视为遗弃
    pub lease_timeout_seconds: u64,
    /// 单次批量领取上限
    pub bulk: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alias: "default".to_string(),
            queue_key: "default".to_string(),
            lease_timeout_seconds: 60,
            bulk: 1,
        }
    }
}

impl ConfigValidator for BrokerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.alias, "broker.alias")?;
        ValidationUtils::validate_not_empty(&self.queue_key, "broker.queue_key")?;
        ValidationUtils::validate_seconds(self.lease_timeout_seconds, "broker.lease_timeout_seconds")?;
        ValidationUtils::validate_bounded(self.bulk as usize, "broker.bulk", 1000)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub alias: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            alias: "default".to_string(),
        }
    }
}

impl ConfigValidator for LedgerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.alias, "ledger.alias")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub alias: String,
    pub poll_interval_seconds: u64,
    pub exhausted_policy: ExhaustedPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alias: "default".to_string(),
            poll_interval_seconds: 30,
            exhausted_policy: ExhaustedPolicy::default(),
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.alias, "scheduler.alias")?;
        ValidationUtils::validate_seconds(self.poll_interval_seconds, "scheduler.poll_interval_seconds")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResubmitConfig {
    pub attempt_policy: AttemptPolicy,
}

impl ConfigValidator for ResubmitConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_validation() {
        let config = BrokerConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.lease_timeout_seconds = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.bulk = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.queue_key = " ".to_string();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_policy_serialization() {
        let json = serde_json::to_string(&AttemptPolicy::CarryForward).unwrap();
        assert_eq!(json, "\"carry_forward\"");
        let policy: ExhaustedPolicy = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(policy, ExhaustedPolicy::Delete);
    }
}

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{
    database::DatabaseConfig,
    logging::LogConfig,
    queue::{BrokerConfig, LedgerConfig, ResubmitConfig, SchedulerConfig},
};
use crate::validation::ConfigValidator;

/// 应用配置
///
/// `databases` 以别名为键；代理、台账和调度存储各自通过别名引用连接，
/// 因此队列表可以放在与台账不同的数据库上。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub databases: BTreeMap<String, DatabaseConfig>,
    pub broker: BrokerConfig,
    pub ledger: LedgerConfig,
    pub scheduler: SchedulerConfig,
    pub resubmit: ResubmitConfig,
    pub logging: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut databases = BTreeMap::new();
        databases.insert("default".to_string(), DatabaseConfig::default());
        Self {
            databases,
            broker: BrokerConfig::default(),
            ledger: LedgerConfig::default(),
            scheduler: SchedulerConfig::default(),
            resubmit: ResubmitConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载顺序：内置默认值 → TOML 文件（可选）→ `ORMQ__` 前缀的环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/ormq.toml", "ormq.toml", "/etc/ormq/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ORMQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn database(&self, alias: &str) -> Option<&DatabaseConfig> {
        self.databases.get(alias)
    }

    fn ensure_alias(&self, alias: &str, field: &str) -> crate::ConfigResult<()> {
        if self.databases.contains_key(alias) {
            Ok(())
        } else {
            Err(crate::ConfigError::Reference(format!(
                "{field} 引用了未配置的数据库别名 '{alias}'"
            )))
        }
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.databases.is_empty() {
            return Err(crate::ConfigError::Validation(
                "至少需要配置一个数据库".to_string(),
            ));
        }
        for database in self.databases.values() {
            database.validate()?;
        }
        self.broker.validate()?;
        self.ledger.validate()?;
        self.scheduler.validate()?;
        self.resubmit.validate()?;
        self.logging.validate()?;

        self.ensure_alias(&self.broker.alias, "broker.alias")?;
        self.ensure_alias(&self.ledger.alias, "ledger.alias")?;
        self.ensure_alias(&self.scheduler.alias, "scheduler.alias")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptPolicy, ExhaustedPolicy, LogLevel};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.lease_timeout_seconds, 60);
        assert_eq!(config.scheduler.exhausted_policy, ExhaustedPolicy::Retain);
        assert_eq!(config.resubmit.attempt_policy, AttemptPolicy::Fresh);
    }

    #[test]
    fn test_separate_broker_alias() {
        let config = AppConfig::from_toml(
            r#"
            [databases.default]
            url = "sqlite::memory:"

            [databases.queue]
            url = "postgres://localhost/queue"

            [broker]
            alias = "queue"
            lease_timeout_seconds = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.alias, "queue");
        assert_eq!(config.ledger.alias, "default");
        assert_eq!(config.database("queue").unwrap().url, "postgres://localhost/queue");
    }

    #[test]
    fn test_unknown_alias_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [databases.default]
            url = "sqlite::memory:"

            [ledger]
            alias = "missing"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [databases.default]
            url = "memory:"

            [scheduler]
            poll_interval_seconds = 5
            exhausted_policy = "delete"

            [resubmit]
            attempt_policy = "carry_forward"

            [logging]
            level = "debug"
            "#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.database("default").unwrap().url, "memory:");
        assert_eq!(config.scheduler.poll_interval_seconds, 5);
        assert_eq!(config.scheduler.exhausted_policy, ExhaustedPolicy::Delete);
        assert_eq!(config.resubmit.attempt_policy, AttemptPolicy::CarryForward);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }
}

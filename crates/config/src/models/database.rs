use std::time::Duration;

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// 支持的连接串前缀
pub const SUPPORTED_URL_PREFIXES: [&str; 4] = ["sqlite:", "postgres://", "postgresql://", "memory:"];

/// 手动降级后端能力，例如让关系型库也走回退路径
///
/// 只能关闭能力；对本身不支持的后端设为 `true` 不会生效。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOverrides {
    pub atomic_claim: Option<bool>,
    pub boolean_filter: Option<bool>,
}

/// 一个数据库别名的连接设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub capabilities: CapabilityOverrides,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://ormq.db?mode=rwc".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            capabilities: CapabilityOverrides::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.url, "database.url")?;
        if !SUPPORTED_URL_PREFIXES.iter().any(|p| self.url.starts_with(p)) {
            return Err(ConfigError::Validation(format!(
                "database.url 不受支持: {}，可用前缀 {:?}",
                self.url, SUPPORTED_URL_PREFIXES
            )));
        }

        ValidationUtils::validate_bounded(self.max_connections as usize, "database.max_connections", 1000)?;
        if self.min_connections > self.max_connections {
            return Err(ConfigError::Validation(format!(
                "database.min_connections ({}) 大于 max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        ValidationUtils::validate_seconds(self.connection_timeout_seconds, "database.connection_timeout_seconds")?;
        ValidationUtils::validate_seconds(self.idle_timeout_seconds, "database.idle_timeout_seconds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_backend_prefix_is_accepted() {
        for url in ["sqlite::memory:", "sqlite://q.db", "postgres://h/db", "postgresql://h/db", "memory:"] {
            assert!(DatabaseConfig::with_url(url).validate().is_ok(), "{url}");
        }
        assert!(DatabaseConfig::with_url("mysql://h/db").validate().is_err());
        assert!(DatabaseConfig::with_url("").validate().is_err());
    }

    #[test]
    fn test_pool_bounds() {
        let mut config = DatabaseConfig::with_url("postgres://h/db");
        config.max_connections = 0;
        assert!(config.validate().is_err());

        config.max_connections = 4;
        config.min_connections = 5;
        assert!(config.validate().is_err());

        config.min_connections = 4;
        config.connection_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_capability_overrides_from_toml() {
        let config: DatabaseConfig = toml::from_str(
            r#"
            url = "postgres://h/db"
            idle_timeout_seconds = 5

            [capabilities]
            boolean_filter = false
            "#,
        )
        .unwrap();
        assert_eq!(config.capabilities.boolean_filter, Some(false));
        assert_eq!(config.capabilities.atomic_claim, None);
        assert_eq!(config.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_connections, 10);
    }
}

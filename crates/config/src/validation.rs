// 配置校验：各配置段自检，AppConfig 另外检查别名引用

use crate::{ConfigError, ConfigResult};

/// 秒数配置的上限：一天
const MAX_SECONDS: u64 = 24 * 60 * 60;

pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(invalid(field, "不能为空"));
        }
        Ok(())
    }

    /// 租约超时、轮询间隔等秒数：(0, 86400]
    pub fn validate_seconds(seconds: u64, field: &str) -> ConfigResult<()> {
        if seconds == 0 || seconds > MAX_SECONDS {
            return Err(invalid(field, &format!("必须在 1..={MAX_SECONDS} 秒之间")));
        }
        Ok(())
    }

    /// 连接数、批量大小等计数：1..=max
    pub fn validate_bounded(value: usize, field: &str, max: usize) -> ConfigResult<()> {
        if !(1..=max).contains(&value) {
            return Err(invalid(field, &format!("必须在 1..={max} 之间")));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation(format!("{field} {reason}"))
}

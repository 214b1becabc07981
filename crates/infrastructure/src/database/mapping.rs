//! 行映射的公共工具
//!
//! 两种关系型后端都把 args / kwargs / result 存为 JSON 文本列。

use ormq_domain::{TaskArgs, TaskKwargs};
use ormq_errors::{QueueError, QueueResult};

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn args_to_json(args: &TaskArgs) -> QueueResult<String> {
        serde_json::to_string(args)
            .map_err(|e| QueueError::serialization(format!("序列化位置参数失败: {e}")))
    }

    pub fn kwargs_to_json(kwargs: &TaskKwargs) -> QueueResult<String> {
        serde_json::to_string(kwargs)
            .map_err(|e| QueueError::serialization(format!("序列化关键字参数失败: {e}")))
    }

    pub fn result_to_json(result: Option<&serde_json::Value>) -> QueueResult<Option<String>> {
        result
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| QueueError::serialization(format!("序列化任务结果失败: {e}")))
    }

    /// 空串和 NULL 都视为没有参数
    pub fn parse_args(text: Option<&str>) -> QueueResult<TaskArgs> {
        match text {
            None => Ok(TaskArgs::new()),
            Some(s) if s.trim().is_empty() => Ok(TaskArgs::new()),
            Some(s) => serde_json::from_str(s)
                .map_err(|e| QueueError::serialization(format!("解析位置参数失败: {e}"))),
        }
    }

    pub fn parse_kwargs(text: Option<&str>) -> QueueResult<TaskKwargs> {
        match text {
            None => Ok(TaskKwargs::new()),
            Some(s) if s.trim().is_empty() => Ok(TaskKwargs::new()),
            Some(s) => serde_json::from_str(s)
                .map_err(|e| QueueError::serialization(format!("解析关键字参数失败: {e}"))),
        }
    }

    pub fn parse_result(text: Option<&str>) -> QueueResult<Option<serde_json::Value>> {
        text.map(serde_json::from_str)
            .transpose()
            .map_err(|e| QueueError::serialization(format!("解析任务结果失败: {e}")))
    }

    /// LIKE 包含匹配的模式
    pub fn contains_pattern(search: &str) -> String {
        let escaped = search
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{escaped}%")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_and_kwargs_round_trip() {
        let args = vec![json!("a@x.com"), json!(3)];
        let text = MappingHelpers::args_to_json(&args).unwrap();
        assert_eq!(MappingHelpers::parse_args(Some(&text)).unwrap(), args);

        assert!(MappingHelpers::parse_args(None).unwrap().is_empty());
        assert!(MappingHelpers::parse_kwargs(Some("")).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_json_is_serialization_failure() {
        let err = MappingHelpers::parse_kwargs(Some("[1,")).unwrap_err();
        assert!(matches!(err, QueueError::SerializationFailure(_)));
    }

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(MappingHelpers::contains_pattern("send"), "%send%");
        assert_eq!(MappingHelpers::contains_pattern("100%_x"), "%100\\%\\_x%");
    }
}

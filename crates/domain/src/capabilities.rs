//! 存储后端能力描述
//!
//! 代理和台账在构造时根据能力标志选择一次查询策略，调用方不感知差异。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// 支持"条件更新并返回行"的单语句领取
    pub atomic_claim: bool,
    /// 布尔字段上的过滤结果可靠
    pub boolean_filter: bool,
}

impl BackendCapabilities {
    /// 关系型后端（PostgreSQL / SQLite）
    pub const RELATIONAL: Self = Self {
        atomic_claim: true,
        boolean_filter: true,
    };

    /// 文档型后端：只有单文档原子更新，布尔过滤不可靠
    pub const DOCUMENT: Self = Self {
        atomic_claim: false,
        boolean_filter: false,
    };

    /// 配置中的显式覆盖只能降级能力，不能声明后端不具备的能力
    pub fn restrict(self, atomic_claim: Option<bool>, boolean_filter: Option<bool>) -> Self {
        Self {
            atomic_claim: self.atomic_claim && atomic_claim.unwrap_or(true),
            boolean_filter: self.boolean_filter && boolean_filter.unwrap_or(true),
        }
    }
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self::RELATIONAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restrict_only_downgrades() {
        let caps = BackendCapabilities::RELATIONAL.restrict(Some(false), None);
        assert!(!caps.atomic_claim);
        assert!(caps.boolean_filter);

        let caps = BackendCapabilities::DOCUMENT.restrict(Some(true), Some(true));
        assert_eq!(caps, BackendCapabilities::DOCUMENT);
    }
}

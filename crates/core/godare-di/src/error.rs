//! 依赖注入错误类型
//!
//! 容器所有公开操作都通过 [`DIError`] 报告失败。错误中的类型键一律以字符串
//! 形式保存，这样错误类型本身不需要对键类型泛型化。

use thiserror::Error;

use crate::di::DependencyLifetime;

/// 工厂函数返回的错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 依赖注入操作的结果类型
pub type DIResult<T> = Result<T, DIError>;

/// 依赖注入错误
#[derive(Debug, Error)]
pub enum DIError {
    /// 类型未注册
    #[error("type not registered: {key}")]
    UnknownType {
        /// 类型键
        key: String,
    },

    /// 未经显式替换的重复注册
    #[error("type already registered: {key} (version {version})")]
    DuplicateRegistration {
        /// 类型键
        key: String,
        /// 当前注册版本
        version: u64,
    },

    /// 解析过程中检测到循环依赖
    ///
    /// `cycle` 从第一次进入的键开始，并以同一个键结束。
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// 循环路径
        cycle: Vec<String>,
    },

    /// 工厂函数构造实例失败
    #[error("factory for {key} failed: {source}")]
    Factory {
        /// 类型键
        key: String,
        /// 工厂返回的原始错误
        #[source]
        source: BoxError,
    },

    /// 实例无法转换为请求的类型
    #[error("type mismatch for {key}: expected {expected}")]
    TypeMismatch {
        /// 类型键
        key: String,
        /// 请求的 Rust 类型名
        expected: &'static str,
    },

    /// 调用方的上下文链中没有所需生命周期的边界
    #[error("no active {lifetime} context available for {key}")]
    ScopeNotFound {
        /// 类型键
        key: String,
        /// 所需的生命周期
        lifetime: DependencyLifetime,
    },

    /// 上下文已经结束
    #[error("lifetime context {context} has already ended")]
    ContextEnded {
        /// 上下文标识
        context: String,
    },

    /// 版本化替换时版本不匹配
    #[error("version conflict for {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// 类型键
        key: String,
        /// 调用方期望的版本
        expected: u64,
        /// 当前实际版本
        actual: u64,
    },

    /// 依赖图校验失败
    #[error("dependency validation failed: {message}")]
    ValidationFailed {
        /// 错误描述
        message: String,
    },

    /// 依赖链超过配置的最大深度
    #[error("resolution of {key} exceeded maximum depth {max_depth}")]
    DepthExceeded {
        /// 超限时正在解析的键
        key: String,
        /// 配置的最大深度
        max_depth: usize,
    },

    /// 配置加载或校验失败
    #[error("configuration error: {message}")]
    Config {
        /// 错误描述
        message: String,
    },
}

impl DIError {
    /// 构造 `UnknownType`
    pub fn unknown(key: impl ToString) -> Self {
        DIError::UnknownType {
            key: key.to_string(),
        }
    }

    /// 包装工厂错误
    pub fn factory(key: impl ToString, source: impl Into<BoxError>) -> Self {
        DIError::Factory {
            key: key.to_string(),
            source: source.into(),
        }
    }

    /// 是否为循环依赖错误
    pub fn is_circular_dependency(&self) -> bool {
        matches!(self, DIError::CircularDependency { .. })
    }

    /// 循环路径（仅循环依赖错误）
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            DIError::CircularDependency { cycle } => Some(cycle),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_dependency_message() {
        let err = DIError::CircularDependency {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: A -> B -> A");
        assert!(err.is_circular_dependency());
        assert_eq!(err.cycle().map(<[String]>::len), Some(3));
    }

    #[test]
    fn test_factory_error_keeps_source() {
        use std::error::Error as _;

        let err = DIError::factory("Database", "connection refused");
        assert!(err.to_string().contains("Database"));
        let source = err.source().expect("factory error should expose its source");
        assert_eq!(source.to_string(), "connection refused");
        assert!(!err.is_circular_dependency());
    }

    #[test]
    fn test_scope_not_found_mentions_lifetime() {
        let err = DIError::ScopeNotFound {
            key: "Cart".into(),
            lifetime: DependencyLifetime::Session,
        };
        assert_eq!(
            err.to_string(),
            "no active session context available for Cart"
        );
    }
}

//! 容器配置
//!
//! 支持代码构造、预设以及从 TOML / JSON 加载：
//!
//! ```toml
//! enable_performance_metrics = true
//! preload_singletons = false
//! max_resolution_depth = 32
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DIError, DIResult};

/// 容器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// 是否记录解析时间与缓存命中
    pub enable_performance_metrics: bool,
    /// `initialize` 时是否预先构造非延迟单例
    pub preload_singletons: bool,
    /// 依赖链的最大深度
    pub max_resolution_depth: usize,
    /// 估算内存占用时每个实例或注册项计入的字节数
    pub instance_size_estimate_bytes: u64,
    /// 是否为每次解析输出 debug 日志
    pub log_resolutions: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enable_performance_metrics: true,
            preload_singletons: true,
            max_resolution_depth: 64,
            instance_size_estimate_bytes: 1024,
            log_resolutions: false,
        }
    }
}

impl ContainerConfig {
    /// 严格模式：较浅的依赖链，逐次记录解析日志
    pub fn strict() -> Self {
        Self {
            max_resolution_depth: 16,
            log_resolutions: true,
            ..Self::default()
        }
    }

    /// 宽松模式：允许很深的依赖链
    pub fn lenient() -> Self {
        Self {
            max_resolution_depth: 256,
            ..Self::default()
        }
    }

    /// 性能模式：不预加载，不输出逐次日志
    pub fn performance() -> Self {
        Self {
            preload_singletons: false,
            log_resolutions: false,
            ..Self::default()
        }
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(text: &str) -> DIResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| DIError::Config {
            message: format!("invalid container config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> DIResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| DIError::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    /// 序列化为 TOML
    pub fn to_toml_string(&self) -> DIResult<String> {
        toml::to_string_pretty(self).map_err(|e| DIError::Config {
            message: format!("failed to serialize container config: {e}"),
        })
    }

    /// 从 JSON 文本解析
    pub fn from_json_str(text: &str) -> DIResult<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| DIError::Config {
            message: format!("invalid container config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为 JSON
    pub fn to_json_string(&self) -> DIResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| DIError::Config {
            message: format!("failed to serialize container config: {e}"),
        })
    }

    /// 校验配置
    pub fn validate(&self) -> DIResult<()> {
        if self.max_resolution_depth == 0 {
            return Err(DIError::Config {
                message: "max_resolution_depth must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

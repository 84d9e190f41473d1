//! GoDareDI 依赖注入容器
//!
//! 支持 Singleton / Scoped / Transient / Lazy 四种作用域，按
//! application → session → request 的上下文链管理 Scoped 实例，
//! 在构造任何实例之前检测循环依赖，并记录解析性能指标。
//!
//! ```
//! use std::sync::Arc;
//! use godare_di::prelude::*;
//!
//! struct Logger;
//! struct Service {
//!     logger: Arc<Logger>,
//! }
//!
//! let container = ContainerBuilder::<ServiceKey>::new()
//!     .singleton("Logger", [] as [&str; 0], |_| Ok(Logger))
//!     .scoped("Service", DependencyLifetime::Session, ["Logger"], |deps| {
//!         Ok(Service { logger: deps.get_at(0)? })
//!     })
//!     .build()?;
//!
//! let session = container.begin_session()?;
//! let service = container.resolve_as::<Service>(&"Service".into(), &session)?;
//! let logger = container.resolve_as::<Logger>(&"Logger".into(), &session)?;
//! assert!(Arc::ptr_eq(&service.logger, &logger));
//! # Ok::<(), godare_di::DIError>(())
//! ```

pub mod config;
pub mod di;
pub mod error;
pub mod logging;

pub use config::ContainerConfig;
pub use di::*;
pub use error::{BoxError, DIError, DIResult};
pub use logging::init_logging;

/// 框架版本
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 构建号，可在编译时通过 `GODARE_BUILD_NUMBER` 指定
pub const BUILD_NUMBER: &str = match option_env!("GODARE_BUILD_NUMBER") {
    Some(build) => build,
    None => "0",
};

/// 数值形式的版本号：major * 10000 + minor * 100 + patch
pub fn version_number() -> u32 {
    let mut parts = FRAMEWORK_VERSION
        .split(['.', '-', '+'])
        .map(|part| part.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    major * 10_000 + minor * 100 + patch
}

/// 常用类型
pub mod prelude {
    pub use crate::config::ContainerConfig;
    pub use crate::di::{
        Container, ContainerBuilder, ContainerModule, DependencyLifetime, DependencyMetadata,
        DependencyScope, Instance, LifetimeContext, PerformanceMetrics, Registration, ResetMode,
        ResolvedDependencies, ScopedProvider, ServiceKey, ServiceProvider, ServiceProviderExt,
    };
    pub use crate::error::{BoxError, DIError, DIResult};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_number_matches_package_version() {
        let expected: Vec<u32> = env!("CARGO_PKG_VERSION")
            .split('.')
            .take(3)
            .map(|p| p.split(['-', '+']).next().unwrap_or("0").parse().unwrap())
            .collect();
        assert_eq!(version_number(), expected[0] * 10_000 + expected[1] * 100 + expected[2]);
        assert!(!BUILD_NUMBER.is_empty());
    }
}

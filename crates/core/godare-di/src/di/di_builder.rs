//! 容器构建器
//!
//! 提供流式 API 收集注册项与配置，最后一次性构建 [`Container`]。
//! 注册错误（例如重复注册）推迟到 `build` 时报告。

use std::any::Any;

use log::debug;

use super::di_container::Container;
use super::di_service_descriptor::{
    DependencyLifetime, DependencyScope, Registration, ResolvedDependencies, ServiceKey, TypeKey,
};
use crate::config::ContainerConfig;
use crate::error::{BoxError, DIResult};

/// 一组相关注册的集合
pub trait ContainerModule<K: TypeKey = ServiceKey> {
    /// 模块名称，用于日志
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// 向构建器添加注册
    fn configure(&self, builder: ContainerBuilder<K>) -> ContainerBuilder<K>;
}

/// 容器构建器
pub struct ContainerBuilder<K: TypeKey = ServiceKey> {
    config: ContainerConfig,
    registrations: Vec<Registration<K>>,
    validate: bool,
}

impl<K: TypeKey> Default for ContainerBuilder<K> {
    fn default() -> Self {
        Self {
            config: ContainerConfig::default(),
            registrations: Vec::new(),
            validate: true,
        }
    }
}

impl<K: TypeKey> ContainerBuilder<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置容器配置
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// 构建时是否校验依赖图（默认开启）
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.validate = enable;
        self
    }

    /// 添加注册项
    pub fn register(mut self, registration: Registration<K>) -> Self {
        self.registrations.push(registration);
        self
    }

    /// 注册单例
    pub fn singleton<T, F, I>(self, key: impl Into<K>, dependencies: I, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ResolvedDependencies<K>) -> Result<T, BoxError> + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Into<K>,
    {
        self.register(
            Registration::new(key, DependencyScope::Singleton, factory).with_dependencies(dependencies),
        )
    }

    /// 注册按生命周期缓存的实例
    pub fn scoped<T, F, I>(
        self,
        key: impl Into<K>,
        lifetime: DependencyLifetime,
        dependencies: I,
        factory: F,
    ) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ResolvedDependencies<K>) -> Result<T, BoxError> + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Into<K>,
    {
        self.register(
            Registration::new(key, DependencyScope::Scoped, factory)
                .with_lifetime(lifetime)
                .with_dependencies(dependencies),
        )
    }

    /// 注册瞬时实例
    pub fn transient<T, F, I>(self, key: impl Into<K>, dependencies: I, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ResolvedDependencies<K>) -> Result<T, BoxError> + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Into<K>,
    {
        self.register(
            Registration::new(key, DependencyScope::Transient, factory).with_dependencies(dependencies),
        )
    }

    /// 注册延迟实例
    pub fn lazy<T, F, I>(
        self,
        key: impl Into<K>,
        lifetime: DependencyLifetime,
        dependencies: I,
        factory: F,
    ) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ResolvedDependencies<K>) -> Result<T, BoxError> + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Into<K>,
    {
        self.register(
            Registration::new(key, DependencyScope::Lazy, factory)
                .with_lifetime(lifetime)
                .with_dependencies(dependencies),
        )
    }

    /// 注册已构造好的单例
    pub fn instance<T: Any + Send + Sync>(self, key: impl Into<K>, value: T) -> Self {
        self.register(Registration::with_instance(key, value))
    }

    /// 应用模块
    pub fn module<M: ContainerModule<K> + ?Sized>(self, module: &M) -> Self {
        let before = self.registrations.len();
        let builder = module.configure(self);
        debug!(
            "Module {} added {} registrations",
            module.name(),
            builder.registrations.len().saturating_sub(before)
        );
        builder
    }

    /// 待注册的数量
    pub fn pending(&self) -> usize {
        self.registrations.len()
    }

    /// 构建容器
    pub fn build(self) -> DIResult<Container<K>> {
        let container = Container::with_config(self.config)?;
        for registration in self.registrations {
            container.register(registration)?;
        }
        if self.validate {
            container.validate()?;
        }
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DIError;

    struct Config {
        url: &'static str,
    }

    struct Database {
        url: &'static str,
    }

    struct StorageModule;

    impl ContainerModule for StorageModule {
        fn configure(&self, builder: ContainerBuilder) -> ContainerBuilder {
            builder
                .instance("Config", Config { url: "sqlite::memory:" })
                .singleton("Database", ["Config"], |deps| {
                    let config: std::sync::Arc<Config> = deps.get_at(0)?;
                    Ok(Database { url: config.url })
                })
        }
    }

    #[test]
    fn test_build_with_module() {
        let container = ContainerBuilder::<ServiceKey>::new()
            .module(&StorageModule)
            .transient("Counter", [] as [&str; 0], |_| Ok(0u64))
            .build()
            .unwrap();

        assert_eq!(container.registration_count(), 3);
        let db = container
            .resolve_as::<Database>(&"Database".into(), container.root_context())
            .unwrap();
        assert_eq!(db.url, "sqlite::memory:");
    }

    #[test]
    fn test_duplicate_registration_reported_at_build() {
        let builder = ContainerBuilder::<ServiceKey>::new()
            .instance("Config", 1u8)
            .instance("Config", 2u8);
        assert_eq!(builder.pending(), 2);
        assert!(matches!(
            builder.build(),
            Err(DIError::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_missing_dependency() {
        let result = ContainerBuilder::<ServiceKey>::new()
            .singleton("Service", ["Logger"], |_| Ok(()))
            .build();
        assert!(matches!(result, Err(DIError::ValidationFailed { .. })));

        let container = ContainerBuilder::<ServiceKey>::new()
            .with_validation(false)
            .singleton("Service", ["Logger"], |_| Ok(()))
            .build()
            .unwrap();
        assert!(container.is_registered(&"Service".into()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ContainerBuilder::<ServiceKey>::new()
            .config(ContainerConfig {
                max_resolution_depth: 0,
                ..ContainerConfig::default()
            })
            .build();
        assert!(matches!(result, Err(DIError::Config { .. })));
    }
}

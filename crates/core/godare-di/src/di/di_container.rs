//! 服务容器核心实现
//!
//! [`Container`] 组合注册表、作用域表、解析器与指标收集器，是对外的唯一入口。
//! 容器本身是一个共享句柄：克隆得到的是同一个容器，进程中不存在全局实例。

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use super::di_graph::DependencyGraph;
use super::di_metrics::{MetricsCollector, PerformanceMetrics};
use super::di_registry::ServiceRegistry;
use super::di_resolver::DependencyResolver;
use super::di_scope::{LifetimeContext, ScopeTable};
use super::di_service_descriptor::{
    DependencyLifetime, DependencyMetadata, DependencyScope, Instance, Registration,
    ResolvedDependencies, ServiceKey, TypeKey, downcast_instance,
};
use crate::config::ContainerConfig;
use crate::error::{BoxError, DIError, DIResult};

/// 重置范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// 销毁所有实例，保留注册与活动上下文
    Instances,
    /// 销毁所有实例与注册，结束除根以外的所有上下文
    Everything,
}

/// 容器统计信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStats {
    /// 已注册的类型数量
    pub registered_services: usize,
    /// 已构造并缓存的实例数量
    pub live_instances: usize,
    /// 活动上下文数量（含根上下文）
    pub active_contexts: usize,
    /// 是否已初始化
    pub initialized: bool,
}

struct ContainerInner<K: TypeKey> {
    config: ContainerConfig,
    registry: Arc<ServiceRegistry<K>>,
    scopes: Arc<ScopeTable<K>>,
    metrics: Arc<MetricsCollector<K>>,
    resolver: DependencyResolver<K>,
    root: LifetimeContext,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
}

/// 依赖注入容器
pub struct Container<K: TypeKey = ServiceKey> {
    inner: Arc<ContainerInner<K>>,
}

impl<K: TypeKey> Clone for Container<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: TypeKey> Default for Container<K> {
    fn default() -> Self {
        Self::build(ContainerConfig::default())
    }
}

impl<K: TypeKey> fmt::Debug for Container<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("stats", &self.stats())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<K: TypeKey> Container<K> {
    /// 使用默认配置创建容器
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定配置创建容器
    pub fn with_config(config: ContainerConfig) -> DIResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ContainerConfig) -> Self {
        let root = LifetimeContext::root();
        let registry = Arc::new(ServiceRegistry::new());
        let scopes = Arc::new(ScopeTable::new(&root));
        let metrics = Arc::new(MetricsCollector::new(config.enable_performance_metrics));
        let resolver = DependencyResolver::new(
            Arc::clone(&registry),
            Arc::clone(&scopes),
            Arc::clone(&metrics),
            &config,
        );

        Self {
            inner: Arc::new(ContainerInner {
                config,
                registry,
                scopes,
                metrics,
                resolver,
                root,
                initialized: AtomicBool::new(false),
                init_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// 初始化容器
    ///
    /// 仅第一次成功调用返回 `true`。配置了 `preload_singletons` 时会预加载
    /// 非延迟单例；预加载失败时容器保持未初始化状态，可以再次调用。
    /// 并发调用按顺序执行，后到者等待先到者的结果。
    pub fn initialize(&self) -> DIResult<bool> {
        let _guard = self.inner.init_lock.lock();
        if self.inner.initialized.load(Ordering::Acquire) {
            return Ok(false);
        }

        if self.inner.config.preload_singletons {
            self.preload()?;
        }
        self.inner.initialized.store(true, Ordering::Release);

        info!(
            "Container initialized ({} registrations, root context {})",
            self.inner.registry.len(),
            self.inner.root.id()
        );
        Ok(true)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// 注册新类型，返回版本号
    pub fn register(&self, registration: Registration<K>) -> DIResult<u64> {
        self.inner.registry.register(registration)
    }

    /// 显式替换注册，并丢弃该类型在所有上下文中的缓存实例
    pub fn replace(&self, registration: Registration<K>, expected_version: u64) -> DIResult<u64> {
        let key = registration.key().clone();
        let version = self.inner.registry.replace(registration, expected_version)?;
        let evicted = self.inner.scopes.evict(&key);
        if evicted > 0 {
            debug!("Evicted {evicted} cached instance slots of {key}");
        }
        Ok(version)
    }

    /// 注册工厂函数
    pub fn register_factory<T, F, I>(
        &self,
        key: impl Into<K>,
        scope: DependencyScope,
        dependencies: I,
        factory: F,
    ) -> DIResult<u64>
    where
        T: Any + Send + Sync,
        F: Fn(&ResolvedDependencies<K>) -> Result<T, BoxError> + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: Into<K>,
    {
        self.register(Registration::new(key, scope, factory).with_dependencies(dependencies))
    }

    /// 注册已经构造好的单例
    pub fn register_instance<T: Any + Send + Sync>(&self, key: impl Into<K>, value: T) -> DIResult<u64> {
        self.register(Registration::with_instance(key, value))
    }

    pub fn is_registered(&self, key: &K) -> bool {
        self.inner.registry.contains(key)
    }

    /// 注册元数据快照
    pub fn metadata(&self, key: &K) -> DIResult<DependencyMetadata> {
        self.inner.registry.metadata(key)
    }

    pub fn all_metadata(&self) -> Vec<DependencyMetadata> {
        self.inner.registry.all_metadata()
    }

    pub fn registration_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// 应用级根上下文
    pub fn root_context(&self) -> &LifetimeContext {
        &self.inner.root
    }

    /// 开始一个会话上下文
    pub fn begin_session(&self) -> DIResult<LifetimeContext> {
        self.open(self.inner.root.child(DependencyLifetime::Session, None))
    }

    /// 在父上下文下开始一个请求上下文
    pub fn begin_request(&self, parent: &LifetimeContext) -> DIResult<LifetimeContext> {
        self.open(parent.child(DependencyLifetime::Request, None))
    }

    /// 在父上下文下开始一个自定义边界
    pub fn begin_custom(
        &self,
        parent: &LifetimeContext,
        name: impl Into<String>,
    ) -> DIResult<LifetimeContext> {
        self.open(parent.child(DependencyLifetime::Custom, Some(name.into())))
    }

    fn open(&self, context: LifetimeContext) -> DIResult<LifetimeContext> {
        self.inner.scopes.open(&context)?;
        Ok(context)
    }

    /// 结束上下文及其后代，返回被销毁的实例数量
    pub fn end_context(&self, context: &LifetimeContext) -> usize {
        self.inner.scopes.close(context.id())
    }

    /// 上下文是否仍然活动
    pub fn is_context_active(&self, context: &LifetimeContext) -> bool {
        self.inner.scopes.is_active(context.id())
    }

    /// 在给定上下文中解析
    pub fn resolve(&self, key: &K, context: &LifetimeContext) -> DIResult<Instance> {
        self.inner.resolver.resolve(key, context)
    }

    /// 解析并转换为具体类型
    pub fn resolve_as<T: Any + Send + Sync>(&self, key: &K, context: &LifetimeContext) -> DIResult<Arc<T>> {
        downcast_instance(key, self.resolve(key, context)?)
    }

    /// 绑定到某个上下文的服务提供者
    pub fn scoped(&self, context: &LifetimeContext) -> ScopedProvider<K> {
        ScopedProvider {
            container: self.clone(),
            context: context.clone(),
        }
    }

    /// 预先构造所有非延迟单例
    ///
    /// 每个单例都会尝试一次，失败会被记录，全部尝试后返回第一个错误。
    /// 成功时返回构造的单例数量。
    pub fn preload(&self) -> DIResult<usize> {
        let mut candidates: Vec<_> = self
            .inner
            .registry
            .registrations()
            .into_iter()
            .filter(|reg| reg.scope() == DependencyScope::Singleton && !reg.is_lazy())
            .collect();
        candidates.sort_by_cached_key(|reg| reg.key().to_string());

        let mut loaded = 0;
        let mut first_error = None;
        for registration in candidates {
            match self.resolve(registration.key(), &self.inner.root) {
                Ok(_) => loaded += 1,
                Err(err) => {
                    warn!("Failed to preload {}: {err}", registration.key());
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                debug!("Preloaded {loaded} singletons");
                Ok(loaded)
            }
        }
    }

    /// 性能指标快照
    pub fn metrics(&self) -> PerformanceMetrics {
        let footprint = self.inner.scopes.live_instances() + self.inner.registry.len();
        let estimated = footprint as f64 * self.inner.config.instance_size_estimate_bytes as f64;
        self.inner.metrics.snapshot(estimated)
    }

    /// 指标收集器
    pub fn metrics_collector(&self) -> &MetricsCollector<K> {
        &self.inner.metrics
    }

    pub fn stats(&self) -> ContainerStats {
        ContainerStats {
            registered_services: self.inner.registry.len(),
            live_instances: self.inner.scopes.live_instances(),
            active_contexts: self.inner.scopes.active_contexts(),
            initialized: self.is_initialized(),
        }
    }

    /// 当前注册的依赖图快照
    pub fn dependency_graph(&self) -> DependencyGraph<K> {
        let registrations = self.inner.registry.registrations();
        DependencyGraph::from_registrations(registrations.iter().map(AsRef::as_ref))
    }

    /// 校验依赖图：不允许缺失的依赖与循环
    pub fn validate(&self) -> DIResult<()> {
        let graph = self.dependency_graph();

        let missing = graph.missing_dependencies();
        if !missing.is_empty() {
            let listed: Vec<String> = missing
                .iter()
                .map(|(owner, dep)| format!("{owner} -> {dep}"))
                .collect();
            return Err(DIError::ValidationFailed {
                message: format!("missing dependencies: {}", listed.join(", ")),
            });
        }

        if let Some(cycle) = graph.find_cycles().into_iter().next() {
            self.inner.metrics.record_circular_dependency();
            return Err(DIError::CircularDependency {
                cycle: cycle.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(())
    }

    /// 重置容器，返回被销毁的实例数量
    ///
    /// 指标计数器不受影响。
    pub fn reset(&self, mode: ResetMode) -> usize {
        let dropped = match mode {
            ResetMode::Instances => self.inner.scopes.clear_instances(),
            ResetMode::Everything => {
                let dropped = self.inner.scopes.clear_all();
                self.inner.registry.clear();
                self.inner.initialized.store(false, Ordering::Release);
                dropped
            }
        };
        info!("Container reset ({mode:?}, {dropped} instances dropped)");
        dropped
    }
}

/// 服务提供者：按类型键获取实例的最小能力
pub trait ServiceProvider<K: TypeKey> {
    /// 获取实例
    fn get_service(&self, key: &K) -> DIResult<Instance>;

    /// 类型是否已注册
    fn is_registered(&self, key: &K) -> bool;
}

/// ServiceProvider 扩展 trait，提供类型化的便捷方法
pub trait ServiceProviderExt<K: TypeKey>: ServiceProvider<K> {
    /// 获取必需的服务
    fn get_required<T: Any + Send + Sync>(&self, key: &K) -> DIResult<Arc<T>> {
        downcast_instance(key, self.get_service(key)?)
    }

    /// 获取可选的服务，未注册时返回 `None`
    fn get_optional<T: Any + Send + Sync>(&self, key: &K) -> DIResult<Option<Arc<T>>> {
        if !self.is_registered(key) {
            return Ok(None);
        }
        self.get_required(key).map(Some)
    }
}

impl<K: TypeKey, P: ServiceProvider<K> + ?Sized> ServiceProviderExt<K> for P {}

/// 容器在根上下文中提供服务
impl<K: TypeKey> ServiceProvider<K> for Container<K> {
    fn get_service(&self, key: &K) -> DIResult<Instance> {
        self.resolve(key, &self.inner.root)
    }

    fn is_registered(&self, key: &K) -> bool {
        Container::is_registered(self, key)
    }
}

/// 绑定到某个生命周期上下文的服务提供者
#[derive(Clone)]
pub struct ScopedProvider<K: TypeKey = ServiceKey> {
    container: Container<K>,
    context: LifetimeContext,
}

impl<K: TypeKey> ScopedProvider<K> {
    pub fn context(&self) -> &LifetimeContext {
        &self.context
    }

    /// 结束绑定的上下文
    pub fn end(self) -> usize {
        self.container.end_context(&self.context)
    }
}

impl<K: TypeKey> ServiceProvider<K> for ScopedProvider<K> {
    fn get_service(&self, key: &K) -> DIResult<Instance> {
        self.container.resolve(key, &self.context)
    }

    fn is_registered(&self, key: &K) -> bool {
        self.container.is_registered(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Logger;

    #[derive(Debug)]
    struct Service {
        logger: Arc<Logger>,
    }

    fn container() -> Container {
        let container = Container::new();
        container
            .register_factory("Logger", DependencyScope::Singleton, [] as [&str; 0], |_| Ok(Logger))
            .unwrap();
        container
            .register(
                Registration::new("Service", DependencyScope::Scoped, |deps| {
                    Ok(Service {
                        logger: deps.get_at(0)?,
                    })
                })
                .with_lifetime(DependencyLifetime::Session)
                .depends_on("Logger"),
            )
            .unwrap();
        container
    }

    #[test]
    fn test_container_creation() {
        let container: Container = Container::new();
        let stats = container.stats();
        assert_eq!(stats.registered_services, 0);
        assert_eq!(stats.live_instances, 0);
        assert_eq!(stats.active_contexts, 1);
        assert!(!stats.initialized);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let container = container();
        assert!(container.initialize().unwrap());
        assert!(!container.initialize().unwrap());
        // 预加载了 Logger，Service 是 Scoped 不参与预加载
        assert_eq!(container.stats().live_instances, 1);
    }

    #[test]
    fn test_scoped_provider() {
        let container = container();
        let session = container.begin_session().unwrap();
        let provider = container.scoped(&session);

        let service: Arc<Service> = provider.get_required(&"Service".into()).unwrap();
        let again: Arc<Service> = provider.get_required(&"Service".into()).unwrap();
        assert!(Arc::ptr_eq(&service, &again));
        assert!(provider.get_optional::<Logger>(&"Missing".into()).unwrap().is_none());

        assert_eq!(provider.end(), 1);
        assert!(!container.is_context_active(&session));
        assert!(matches!(
            container.resolve(&"Service".into(), &session),
            Err(DIError::ContextEnded { .. })
        ));
    }

    #[test]
    fn test_root_provider_rejects_session_scoped() {
        let container = container();
        assert!(matches!(
            container.get_service(&"Service".into()),
            Err(DIError::ScopeNotFound { .. })
        ));
        assert!(container.get_required::<Logger>(&"Logger".into()).is_ok());
    }

    #[test]
    fn test_replace_evicts_cached_instances() {
        let container = container();
        let root = container.root_context().clone();
        let first = container.resolve_as::<Logger>(&"Logger".into(), &root).unwrap();

        let version = container
            .replace(
                Registration::new("Logger", DependencyScope::Singleton, |_| Ok(Logger)),
                1,
            )
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(container.metadata(&"Logger".into()).unwrap().version, 2);

        let second = container.resolve_as::<Logger>(&"Logger".into(), &root).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_reset_everything() {
        let container = container();
        let session = container.begin_session().unwrap();
        container.resolve(&"Service".into(), &session).unwrap();
        assert_eq!(container.stats().live_instances, 2);

        assert_eq!(container.reset(ResetMode::Everything), 2);
        assert_eq!(container.registration_count(), 0);
        assert!(!container.is_context_active(&session));
        assert_eq!(container.stats().active_contexts, 1);
    }

    #[test]
    fn test_memory_estimate() {
        let container = Container::<ServiceKey>::with_config(ContainerConfig {
            instance_size_estimate_bytes: 100,
            ..ContainerConfig::default()
        })
        .unwrap();
        container.register_instance("Answer", 42u32).unwrap();
        container
            .resolve(&"Answer".into(), container.root_context())
            .unwrap();
        assert_eq!(container.metrics().memory_usage, 200.0);
    }
}

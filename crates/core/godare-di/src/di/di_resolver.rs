//! 依赖解析器
//!
//! 解析分三步进行：
//! 1. 在注册表的一次读锁内沿声明的依赖做深度优先遍历，得到解析计划。
//!    遍历使用本次调用独有的访问路径检测循环依赖，发现循环或缺失的类型时
//!    立即失败，此时还没有任何工厂被调用。已缓存的依赖直接采用，不再展开。
//! 2. 按槽地址顺序锁定计划中所有尚未缓存的实例槽，同一缓存键最多构造一次。
//! 3. 自底向上构造实例，新实例先暂存在本次调用中，根解析成功后才发布到槽；
//!    任何一步失败都丢弃暂存的实例，已有缓存保持不变。
//!
//! 构造期间只持有实例槽的锁，不持有注册表或槽表的锁。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace, warn};

use super::di_metrics::MetricsCollector;
use super::di_registry::{RegistryView, ServiceRegistry};
use super::di_scope::{
    InstanceKey, InstanceSlot, LifetimeContext, ScopeTable, SlotGuard, instance_key,
};
use super::di_service_descriptor::{Instance, Registration, ResolvedDependencies, TypeKey};
use crate::config::ContainerConfig;
use crate::error::{DIError, DIResult};

/// 当前调用链上正在解析的键
struct ResolutionPath<K> {
    stack: Vec<K>,
}

impl<K: TypeKey> ResolutionPath<K> {
    fn new() -> Self {
        Self { stack: Vec::new() }
    }

    fn contains(&self, key: &K) -> bool {
        self.stack.contains(key)
    }

    /// 从 `key` 首次出现处截取循环，并以 `key` 结尾
    fn cycle_to(&self, key: &K) -> Vec<String> {
        let start = self.stack.iter().position(|k| k == key).unwrap_or(0);
        self.stack[start..]
            .iter()
            .chain(std::iter::once(key))
            .map(ToString::to_string)
            .collect()
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }

    fn push(&mut self, key: K) {
        self.stack.push(key);
    }

    fn pop(&mut self) {
        self.stack.pop();
    }
}

/// 计划中的一个服务
struct PlannedService<K: TypeKey> {
    registration: Arc<Registration<K>>,
    /// 可缓存服务的实例槽
    slot: Option<Arc<InstanceSlot>>,
    /// 规划时已缓存的实例
    cached: Option<Instance>,
}

/// 解析计划：从根可达的全部注册项的一致快照
struct ResolutionPlan<K: TypeKey> {
    services: HashMap<K, PlannedService<K>>,
}

impl<K: TypeKey> ResolutionPlan<K> {
    fn service(&self, key: &K) -> DIResult<&PlannedService<K>> {
        self.services.get(key).ok_or_else(|| DIError::unknown(key))
    }
}

/// 一次解析锁定的实例槽与尚未发布的实例
struct Staging<'p, K: TypeKey> {
    guards: HashMap<K, SlotGuard<'p>>,
    staged: HashMap<K, Instance>,
}

impl<'p, K: TypeKey> Staging<'p, K> {
    /// 按槽地址顺序锁定计划中尚未缓存的槽
    fn lock(plan: &'p ResolutionPlan<K>) -> Self {
        let mut pending: Vec<(&K, &Arc<InstanceSlot>)> = plan
            .services
            .iter()
            .filter(|(_, service)| service.cached.is_none())
            .filter_map(|(key, service)| service.slot.as_ref().map(|slot| (key, slot)))
            .collect();
        pending.sort_by_key(|(_, slot)| Arc::as_ptr(*slot) as usize);

        let guards = pending
            .into_iter()
            .map(|(key, slot)| (key.clone(), slot.lock()))
            .collect();
        Self {
            guards,
            staged: HashMap::new(),
        }
    }

    /// 锁定前已由其他调用者构造的实例
    fn existing(&self, key: &K) -> Option<Instance> {
        self.guards.get(key).and_then(SlotGuard::get)
    }

    fn staged(&self, key: &K) -> Option<Instance> {
        self.staged.get(key).cloned()
    }

    fn stage(&mut self, key: &K, instance: &Instance) {
        self.staged.insert(key.clone(), Arc::clone(instance));
    }

    /// 发布暂存的实例，返回写入的槽数量
    fn publish(mut self) -> usize {
        let mut published = 0;
        for (key, instance) in self.staged.drain() {
            if let Some(guard) = self.guards.get_mut(&key) {
                if guard.publish(instance) {
                    published += 1;
                }
            }
        }
        published
    }
}

/// 单次解析的结果
pub(crate) struct Resolved {
    pub(crate) instance: Instance,
    pub(crate) cache_hit: bool,
}

impl Resolved {
    fn hit(instance: Instance) -> Self {
        Self {
            instance,
            cache_hit: true,
        }
    }

    fn constructed(instance: Instance) -> Self {
        Self {
            instance,
            cache_hit: false,
        }
    }
}

/// 依赖解析器
pub struct DependencyResolver<K: TypeKey> {
    registry: Arc<ServiceRegistry<K>>,
    scopes: Arc<ScopeTable<K>>,
    metrics: Arc<MetricsCollector<K>>,
    max_depth: usize,
    log_resolutions: bool,
}

impl<K: TypeKey> DependencyResolver<K> {
    pub fn new(
        registry: Arc<ServiceRegistry<K>>,
        scopes: Arc<ScopeTable<K>>,
        metrics: Arc<MetricsCollector<K>>,
        config: &ContainerConfig,
    ) -> Self {
        Self {
            registry,
            scopes,
            metrics,
            max_depth: config.max_resolution_depth,
            log_resolutions: config.log_resolutions,
        }
    }

    /// 解析类型键
    ///
    /// 成功时记录解析时间与是否命中缓存；循环依赖只增加循环计数。
    pub fn resolve(&self, key: &K, context: &LifetimeContext) -> DIResult<Instance> {
        let started = Instant::now();
        match self.resolve_root(key, context) {
            Ok(resolved) => {
                let elapsed = started.elapsed();
                self.metrics.record_resolution(key, elapsed, resolved.cache_hit);
                if self.log_resolutions {
                    debug!(
                        "Resolved {key} in {elapsed:?} ({})",
                        if resolved.cache_hit { "cached" } else { "constructed" }
                    );
                }
                Ok(resolved.instance)
            }
            Err(err) => {
                if err.is_circular_dependency() {
                    self.metrics.record_circular_dependency();
                    warn!("{err}");
                } else {
                    self.metrics.record_failure();
                    debug!("Failed to resolve {key}: {err}");
                }
                Err(err)
            }
        }
    }

    fn resolve_root(&self, key: &K, context: &LifetimeContext) -> DIResult<Resolved> {
        self.scopes.ensure_active(context)?;
        let registration = self.registry.lookup(key)?;
        self.registry.touch(key)?;

        let slot_key = instance_key(&registration, context)?;
        if slot_key.is_cached() {
            if let Some(instance) = self.scopes.cached(&slot_key) {
                return Ok(Resolved::hit(instance));
            }
        }

        let plan = self.plan(key, context)?;
        for dependency in plan.services.keys().filter(|dependency| *dependency != key) {
            self.registry.touch(dependency)?;
        }

        let mut staging = Staging::lock(&plan);
        let resolved = self.materialize(key, &plan, &mut staging)?;
        let published = staging.publish();
        trace!("Resolution of {key} published {published} instances");
        Ok(resolved)
    }

    /// 构建解析计划，同时检测循环依赖与缺失的类型
    fn plan(&self, root: &K, context: &LifetimeContext) -> DIResult<ResolutionPlan<K>> {
        let view = self.registry.view();
        let mut plan = ResolutionPlan {
            services: HashMap::new(),
        };
        let mut path = ResolutionPath::new();
        self.visit(&view, root, context, &mut path, &mut plan)?;
        Ok(plan)
    }

    fn visit(
        &self,
        view: &RegistryView<'_, K>,
        key: &K,
        context: &LifetimeContext,
        path: &mut ResolutionPath<K>,
        plan: &mut ResolutionPlan<K>,
    ) -> DIResult<()> {
        if path.contains(key) {
            return Err(DIError::CircularDependency {
                cycle: path.cycle_to(key),
            });
        }
        if plan.services.contains_key(key) {
            return Ok(());
        }
        if path.depth() >= self.max_depth {
            return Err(DIError::DepthExceeded {
                key: key.to_string(),
                max_depth: self.max_depth,
            });
        }

        let registration = view.get(key).ok_or_else(|| DIError::unknown(key))?;
        let slot = match instance_key(registration, context)? {
            InstanceKey::Uncached => None,
            slot_key => Some(self.scopes.slot(slot_key)?),
        };
        let cached = slot.as_ref().and_then(|slot| slot.peek());

        if cached.is_none() {
            path.push(key.clone());
            for dependency in registration.dependencies() {
                self.visit(view, dependency, context, path, plan)?;
            }
            path.pop();
        }

        plan.services.insert(
            key.clone(),
            PlannedService {
                registration: Arc::clone(registration),
                slot,
                cached,
            },
        );
        Ok(())
    }

    /// 按计划取得或构造实例
    fn materialize(
        &self,
        key: &K,
        plan: &ResolutionPlan<K>,
        staging: &mut Staging<'_, K>,
    ) -> DIResult<Resolved> {
        let service = plan.service(key)?;
        if let Some(instance) = &service.cached {
            return Ok(Resolved::hit(Arc::clone(instance)));
        }
        if service.slot.is_none() {
            let instance = self.construct(&service.registration, plan, staging)?;
            return Ok(Resolved::constructed(instance));
        }

        if let Some(instance) = staging.existing(key) {
            return Ok(Resolved::hit(instance));
        }
        if let Some(instance) = staging.staged(key) {
            return Ok(Resolved::constructed(instance));
        }
        let instance = self.construct(&service.registration, plan, staging)?;
        staging.stage(key, &instance);
        Ok(Resolved::constructed(instance))
    }

    fn construct(
        &self,
        registration: &Registration<K>,
        plan: &ResolutionPlan<K>,
        staging: &mut Staging<'_, K>,
    ) -> DIResult<Instance> {
        let mut entries = Vec::with_capacity(registration.dependencies().len());
        for dependency in registration.dependencies() {
            let resolved = self.materialize(dependency, plan, staging)?;
            entries.push((dependency.clone(), resolved.instance));
        }
        let dependencies = ResolvedDependencies::new(registration.key().clone(), entries);
        self.invoke(registration, &dependencies)
    }

    fn invoke(
        &self,
        registration: &Registration<K>,
        dependencies: &ResolvedDependencies<K>,
    ) -> DIResult<Instance> {
        registration.invoke(dependencies).map_err(|source| {
            warn!("Factory for {} failed: {source}", registration.key());
            DIError::factory(registration.key(), source)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{DependencyScope, ServiceKey};
    use crate::error::BoxError;

    fn resolver(config: &ContainerConfig) -> (DependencyResolver<ServiceKey>, LifetimeContext) {
        let root = LifetimeContext::root();
        let resolver = DependencyResolver::new(
            Arc::new(ServiceRegistry::new()),
            Arc::new(ScopeTable::new(&root)),
            Arc::new(MetricsCollector::new(true)),
            config,
        );
        (resolver, root)
    }

    fn register(
        resolver: &DependencyResolver<ServiceKey>,
        key: &'static str,
        scope: DependencyScope,
        deps: &[&'static str],
    ) {
        let registration = Registration::new(key, scope, |deps: &ResolvedDependencies<ServiceKey>| {
            Ok(deps.len())
        })
        .with_dependencies(deps.iter().copied());
        resolver.registry.register(registration).unwrap();
    }

    #[test]
    fn test_resolution_path_cycle() {
        let mut path = ResolutionPath::new();
        path.push("A".to_string());
        path.push("B".to_string());
        assert!(path.contains(&"A".to_string()));
        assert_eq!(path.cycle_to(&"A".to_string()), vec!["A", "B", "A"]);
        assert_eq!(path.cycle_to(&"B".to_string()), vec!["B", "B"]);
    }

    #[test]
    fn test_resolves_declared_dependencies_in_order() {
        let (resolver, root) = resolver(&ContainerConfig::default());
        register(&resolver, "A", DependencyScope::Singleton, &[]);
        register(&resolver, "B", DependencyScope::Transient, &["A"]);
        register(&resolver, "C", DependencyScope::Transient, &["A", "B"]);

        let c = resolver.resolve(&"C".into(), &root).unwrap();
        assert_eq!(*c.downcast::<usize>().unwrap(), 2);
    }

    #[test]
    fn test_cycle_fails_before_any_factory_runs() {
        let (resolver, root) = resolver(&ContainerConfig::default());
        register(&resolver, "Leaf", DependencyScope::Singleton, &[]);
        register(&resolver, "A", DependencyScope::Singleton, &["Leaf", "B"]);
        register(&resolver, "B", DependencyScope::Singleton, &["A"]);

        let err = resolver.resolve(&"A".into(), &root).unwrap_err();
        assert_eq!(err.cycle().unwrap(), ["A", "B", "A"]);
        assert_eq!(resolver.scopes.live_instances(), 0);
        assert_eq!(resolver.metrics.circular_dependency_count(), 1);
        assert_eq!(resolver.metrics.total_resolutions(), 0);
    }

    #[test]
    fn test_missing_transitive_dependency() {
        let (resolver, root) = resolver(&ContainerConfig::default());
        register(&resolver, "A", DependencyScope::Singleton, &["Ghost"]);
        let err = resolver.resolve(&"A".into(), &root).unwrap_err();
        assert!(matches!(err, DIError::UnknownType { ref key } if key == "Ghost"));
    }

    #[test]
    fn test_depth_limit() {
        let config = ContainerConfig {
            max_resolution_depth: 2,
            ..ContainerConfig::default()
        };
        let (resolver, root) = resolver(&config);
        register(&resolver, "A", DependencyScope::Transient, &["B"]);
        register(&resolver, "B", DependencyScope::Transient, &["C"]);
        register(&resolver, "C", DependencyScope::Transient, &[]);

        assert!(matches!(
            resolver.resolve(&"A".into(), &root),
            Err(DIError::DepthExceeded { max_depth: 2, .. })
        ));
        assert!(resolver.resolve(&"B".into(), &root).is_ok());
    }

    #[test]
    fn test_failed_sibling_discards_staged_instances() {
        let (resolver, root) = resolver(&ContainerConfig::default());
        register(&resolver, "Pool", DependencyScope::Singleton, &[]);
        register(&resolver, "Codec", DependencyScope::Singleton, &[]);
        let failing = Registration::new(
            "Broker",
            DependencyScope::Singleton,
            |_: &ResolvedDependencies<ServiceKey>| Err::<u8, BoxError>("unreachable".into()),
        );
        resolver.registry.register(failing).unwrap();
        register(&resolver, "Gateway", DependencyScope::Singleton, &["Pool", "Codec", "Broker"]);

        resolver.resolve(&"Pool".into(), &root).unwrap();
        assert_eq!(resolver.scopes.live_instances(), 1);

        let err = resolver.resolve(&"Gateway".into(), &root).unwrap_err();
        assert!(matches!(err, DIError::Factory { ref key, .. } if key == "Broker"));
        assert_eq!(resolver.scopes.live_instances(), 1);
        assert_eq!(resolver.metrics.snapshot(0.0).failed_resolutions, 1);
    }

    #[test]
    fn test_cached_dependency_is_not_expanded() {
        let (resolver, root) = resolver(&ContainerConfig::default());
        register(&resolver, "Leaf", DependencyScope::Singleton, &[]);
        register(&resolver, "Mid", DependencyScope::Singleton, &["Leaf"]);
        resolver.resolve(&"Mid".into(), &root).unwrap();

        // 注册图中出现 Mid -> Leaf -> Mid，但 Mid 已缓存
        resolver.scopes.evict(&"Leaf".into());
        let replaced = Registration::new(
            "Leaf",
            DependencyScope::Singleton,
            |deps: &ResolvedDependencies<ServiceKey>| Ok(deps.len() + 10),
        )
        .depends_on("Mid");
        resolver.registry.replace(replaced, 1).unwrap();
        register(&resolver, "Top", DependencyScope::Transient, &["Mid"]);

        assert!(resolver.resolve(&"Top".into(), &root).is_ok());
        let leaf = resolver.resolve(&"Leaf".into(), &root).unwrap();
        assert_eq!(*leaf.downcast::<usize>().unwrap(), 11);
        assert_eq!(resolver.metrics.circular_dependency_count(), 0);
    }
}

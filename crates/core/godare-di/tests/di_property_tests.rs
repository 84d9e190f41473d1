//! 依赖注入容器属性测试
//!
//! 使用 proptest 验证：
//! - 任意无环依赖图都能解析，且实例的依赖与声明一致
//! - 任意环都会被检测，且不影响成功解析计数
//! - 缓存命中率等于命中次数 / 成功解析次数
//! - Transient 每次解析都得到新实例

use std::sync::Arc;

use godare_di::prelude::*;
use proptest::prelude::*;

/// 记录自身键与依赖实例的节点
struct Node {
    key: String,
    children: Vec<Arc<Node>>,
}

fn key(i: usize) -> ServiceKey {
    ServiceKey::from(format!("N{i}"))
}

fn scope_of(choice: u8) -> DependencyScope {
    DependencyScope::ALL[usize::from(choice % 4)]
}

/// 按声明构建容器：节点 i 只依赖编号更小的节点
fn build_dag(spec: &[(u8, Vec<usize>)]) -> (Container, Vec<Vec<ServiceKey>>) {
    let container: Container = Container::new();
    let mut declared = Vec::with_capacity(spec.len());

    for (i, (scope, deps)) in spec.iter().enumerate() {
        let dep_keys: Vec<ServiceKey> = if i == 0 {
            Vec::new()
        } else {
            deps.iter().map(|d| key(d % i)).collect()
        };

        let own = key(i).to_string();
        let registration = Registration::new(key(i), scope_of(*scope), move |deps| {
            let children = deps
                .keys()
                .map(|k| deps.get::<Node>(k))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node {
                key: own.clone(),
                children,
            })
        })
        .with_dependencies(dep_keys.clone());
        container.register(registration).unwrap();
        declared.push(dep_keys);
    }
    (container, declared)
}

fn check_node(node: &Node, declared: &[Vec<ServiceKey>]) -> Result<(), TestCaseError> {
    let index: usize = node.key[1..].parse().unwrap();
    let expected: Vec<String> = declared[index].iter().map(ToString::to_string).collect();
    let actual: Vec<String> = node.children.iter().map(|c| c.key.clone()).collect();
    prop_assert_eq!(actual, expected);
    for child in &node.children {
        check_node(child, declared)?;
    }
    Ok(())
}

fn dag_strategy() -> impl Strategy<Value = Vec<(u8, Vec<usize>)>> {
    prop::collection::vec((0u8..4, prop::collection::vec(0usize..64, 0..4)), 1..12)
}

proptest! {
    #[test]
    fn prop_acyclic_graphs_resolve_with_declared_dependencies(spec in dag_strategy()) {
        let (container, declared) = build_dag(&spec);
        prop_assert!(container.validate().is_ok());

        let session = container.begin_session().unwrap();
        for i in 0..spec.len() {
            let node = container.resolve_as::<Node>(&key(i), &session).unwrap();
            prop_assert_eq!(&node.key, &key(i).to_string());
            check_node(&node, &declared)?;
        }
        prop_assert_eq!(container.metrics().total_resolutions, spec.len() as u64);
        prop_assert_eq!(container.metrics().circular_dependency_count, 0);
    }
}

proptest! {
    #[test]
    fn prop_cycles_are_detected(len in 1usize..8, start in 0usize..8, scope in 0u8..4) {
        let container: Container = Container::new();
        for i in 0..len {
            let registration = Registration::new(key(i), scope_of(scope), |_| Ok(()))
                .depends_on(key((i + 1) % len));
            container.register(registration).unwrap();
        }

        let session = container.begin_session().unwrap();
        let start = start % len;
        let err = container.resolve(&key(start), &session).unwrap_err();
        let cycle = err.cycle().unwrap();
        prop_assert_eq!(cycle.len(), len + 1);
        prop_assert_eq!(&cycle[0], &key(start).to_string());
        prop_assert_eq!(cycle.first(), cycle.last());

        let metrics = container.metrics();
        prop_assert_eq!(metrics.total_resolutions, 0);
        prop_assert_eq!(metrics.circular_dependency_count, 1);
        prop_assert_eq!(container.stats().live_instances, 0);
    }
}

proptest! {
    #[test]
    fn prop_cache_hit_rate_matches_observed_hits(ops in prop::collection::vec(0usize..6, 1..64)) {
        // 偶数键为单例，奇数键为瞬时
        let container: Container = Container::new();
        for i in 0..6 {
            let scope = if i % 2 == 0 { DependencyScope::Singleton } else { DependencyScope::Transient };
            container.register(Registration::new(key(i), scope, |_| Ok(0u8))).unwrap();
        }

        let mut seen = [false; 6];
        let mut hits = 0u64;
        for &op in &ops {
            container.resolve(&key(op), container.root_context()).unwrap();
            if op % 2 == 0 {
                if seen[op] {
                    hits += 1;
                }
                seen[op] = true;
            }
        }

        let metrics = container.metrics();
        let total = ops.len() as u64;
        prop_assert_eq!(metrics.total_resolutions, total);
        prop_assert_eq!(metrics.cache_hits, hits);
        prop_assert!((metrics.cache_hit_rate - hits as f64 / total as f64).abs() < 1e-9);
    }
}

proptest! {
    #[test]
    fn prop_transient_instances_are_distinct(count in 2usize..16) {
        let container: Container = Container::new();
        container
            .register(Registration::new("Fresh", DependencyScope::Transient, |_| Ok(String::new())))
            .unwrap();

        let instances: Vec<Instance> = (0..count)
            .map(|_| container.resolve(&"Fresh".into(), container.root_context()).unwrap())
            .collect();
        for (i, a) in instances.iter().enumerate() {
            for b in &instances[i + 1..] {
                prop_assert!(!Arc::ptr_eq(a, b));
            }
        }
        prop_assert_eq!(container.metrics().cache_hits, 0);
    }
}

proptest! {
    #[test]
    fn prop_ordinals_are_stable(ordinal in 0u8..8) {
        let scope = DependencyScope::try_from(ordinal);
        let lifetime = DependencyLifetime::try_from(ordinal);
        prop_assert_eq!(scope.is_ok(), ordinal < 4);
        prop_assert_eq!(lifetime.is_ok(), ordinal < 4);
        if let (Ok(scope), Ok(lifetime)) = (scope, lifetime) {
            prop_assert_eq!(scope.ordinal(), ordinal);
            prop_assert_eq!(serde_json::to_string(&lifetime).unwrap(), ordinal.to_string());
        }
    }
}

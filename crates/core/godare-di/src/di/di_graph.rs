//! 依赖图分析
//!
//! [`DependencyGraph`] 是注册表某一时刻的快照，只包含声明的依赖关系，
//! 不会构造任何实例。

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use serde::Serialize;

use super::di_service_descriptor::{DependencyLifetime, DependencyScope, Registration, TypeKey};
use crate::error::{DIError, DIResult};

/// 依赖图节点
#[derive(Debug, Clone)]
pub struct GraphNode<K> {
    pub key: K,
    pub scope: DependencyScope,
    pub lifetime: DependencyLifetime,
    pub lazy: bool,
    /// 声明的依赖，按声明顺序
    pub dependencies: Vec<K>,
}

/// 依赖图统计信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    /// 节点数
    pub nodes: usize,
    /// 边数（声明的依赖总数，含缺失的依赖）
    pub edges: usize,
    /// 平均依赖数
    pub average_dependencies: f64,
    /// 最长依赖链
    pub max_depth: usize,
    /// 循环数
    pub cycles: usize,
}

/// 依赖图
#[derive(Debug, Clone)]
pub struct DependencyGraph<K: TypeKey> {
    nodes: HashMap<K, GraphNode<K>>,
    /// 按键名排序的节点顺序，保证输出稳定
    order: Vec<K>,
}

impl<K: TypeKey> DependencyGraph<K> {
    /// 从注册项构建
    pub fn from_registrations<'a, I>(registrations: I) -> Self
    where
        I: IntoIterator<Item = &'a Registration<K>>,
    {
        let nodes: HashMap<K, GraphNode<K>> = registrations
            .into_iter()
            .map(|reg| {
                let node = GraphNode {
                    key: reg.key().clone(),
                    scope: reg.scope(),
                    lifetime: reg.lifetime(),
                    lazy: reg.is_lazy(),
                    dependencies: reg.dependencies().to_vec(),
                };
                (reg.key().clone(), node)
            })
            .collect();

        let mut order: Vec<K> = nodes.keys().cloned().collect();
        order.sort_by_cached_key(ToString::to_string);
        Self { nodes, order }
    }

    pub fn node(&self, key: &K) -> Option<&GraphNode<K>> {
        self.nodes.get(key)
    }

    /// 所有节点，按键名排序
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode<K>> {
        self.order.iter().filter_map(|key| self.nodes.get(key))
    }

    /// 所有边 `(依赖方, 被依赖方)`
    pub fn edges(&self) -> impl Iterator<Item = (&K, &K)> {
        self.nodes()
            .flat_map(|node| node.dependencies.iter().map(move |dep| (&node.key, dep)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 直接依赖 `key` 的节点
    pub fn dependents_of(&self, key: &K) -> Vec<&K> {
        self.nodes()
            .filter(|node| node.dependencies.contains(key))
            .map(|node| &node.key)
            .collect()
    }

    /// 声明了但未注册的依赖 `(依赖方, 缺失的键)`
    pub fn missing_dependencies(&self) -> Vec<(K, K)> {
        self.edges()
            .filter(|(_, dep)| !self.nodes.contains_key(*dep))
            .map(|(owner, dep)| (owner.clone(), dep.clone()))
            .collect()
    }

    /// 查找所有循环
    ///
    /// 每个循环只报告一次，路径以首个键结尾，例如 `[A, B, A]`。
    pub fn find_cycles(&self) -> Vec<Vec<K>> {
        let mut visited = HashSet::new();
        let mut seen = HashSet::new();
        let mut cycles = Vec::new();

        for key in &self.order {
            let mut path = Vec::new();
            self.collect_cycles(key, &mut path, &mut visited, &mut seen, &mut cycles);
        }
        cycles
    }

    fn collect_cycles(
        &self,
        key: &K,
        path: &mut Vec<K>,
        visited: &mut HashSet<K>,
        seen: &mut HashSet<Vec<String>>,
        cycles: &mut Vec<Vec<K>>,
    ) {
        if let Some(start) = path.iter().position(|k| k == key) {
            let mut cycle = path[start..].to_vec();
            if seen.insert(canonical_cycle(&cycle)) {
                cycle.push(key.clone());
                cycles.push(cycle);
            }
            return;
        }
        if visited.contains(key) {
            return;
        }
        let Some(node) = self.nodes.get(key) else {
            return;
        };

        path.push(key.clone());
        for dep in &node.dependencies {
            self.collect_cycles(dep, path, visited, seen, cycles);
        }
        path.pop();
        visited.insert(key.clone());
    }

    /// 拓扑排序，依赖在前
    ///
    /// 缺失的依赖不参与排序；存在循环时返回第一个循环。
    pub fn topological_order(&self) -> DIResult<Vec<K>> {
        let mut in_degree: HashMap<&K, usize> = HashMap::new();
        let mut dependents: HashMap<&K, Vec<&K>> = HashMap::new();

        for node in self.nodes() {
            let known: Vec<&K> = node
                .dependencies
                .iter()
                .filter(|dep| self.nodes.contains_key(*dep))
                .collect();
            in_degree.insert(&node.key, known.len());
            for dep in known {
                dependents.entry(dep).or_default().push(&node.key);
            }
        }

        let mut queue: VecDeque<&K> = self
            .order
            .iter()
            .filter(|key| in_degree.get(key) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = queue.pop_front() {
            order.push(current.clone());
            for dependent in dependents.get(current).into_iter().flatten().copied() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let cycle = self
                .find_cycles()
                .into_iter()
                .next()
                .unwrap_or_default()
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(DIError::CircularDependency { cycle });
        }
        Ok(order)
    }

    /// 依赖链深度：没有依赖为 0
    ///
    /// 未注册或位于循环上（或依赖某个循环）时返回 `None`。
    pub fn depth_of(&self, key: &K) -> Option<usize> {
        if !self.nodes.contains_key(key) {
            return None;
        }
        self.depth_inner(key, &mut HashMap::new(), &mut HashSet::new())
    }

    fn depth_inner(
        &self,
        key: &K,
        memo: &mut HashMap<K, Option<usize>>,
        visiting: &mut HashSet<K>,
    ) -> Option<usize> {
        if let Some(depth) = memo.get(key) {
            return *depth;
        }
        if !visiting.insert(key.clone()) {
            return None;
        }

        let mut depth = Some(0);
        if let Some(node) = self.nodes.get(key) {
            for dep in node.dependencies.iter().filter(|d| self.nodes.contains_key(*d)) {
                depth = match (depth, self.depth_inner(dep, memo, visiting)) {
                    (Some(current), Some(child)) => Some(current.max(child + 1)),
                    _ => None,
                };
            }
        }

        visiting.remove(key);
        memo.insert(key.clone(), depth);
        depth
    }

    /// 无循环部分的最长依赖链
    pub fn max_depth(&self) -> usize {
        let mut memo = HashMap::new();
        let mut visiting = HashSet::new();
        self.order
            .iter()
            .filter_map(|key| self.depth_inner(key, &mut memo, &mut visiting))
            .max()
            .unwrap_or(0)
    }

    /// 统计信息
    pub fn stats(&self) -> GraphStats {
        let edges = self.edges().count();
        GraphStats {
            nodes: self.nodes.len(),
            edges,
            average_dependencies: if self.nodes.is_empty() {
                0.0
            } else {
                edges as f64 / self.nodes.len() as f64
            },
            max_depth: self.max_depth(),
            cycles: self.find_cycles().len(),
        }
    }

    /// 导出为 Mermaid 流程图
    pub fn to_mermaid(&self) -> String {
        let mut ids: HashMap<&K, String> = HashMap::new();
        let mut out = String::from("graph TD\n");

        for (i, node) in self.nodes().enumerate() {
            let id = format!("n{i}");
            let _ = writeln!(
                out,
                "    {id}[\"{} ({}, {})\"]",
                escape_label(&node.key.to_string()),
                node.scope,
                node.lifetime
            );
            ids.insert(&node.key, id);
        }

        let mut missing = 0;
        for (_, dep) in self.edges() {
            if !ids.contains_key(dep) {
                let id = format!("m{missing}");
                missing += 1;
                let _ = writeln!(out, "    {id}[\"{} (missing)\"]", escape_label(&dep.to_string()));
                ids.insert(dep, id);
            }
        }

        for (from, to) in self.edges() {
            if let (Some(from), Some(to)) = (ids.get(from), ids.get(to)) {
                let _ = writeln!(out, "    {from} --> {to}");
            }
        }
        out
    }
}

/// 循环的规范形式：从最小键开始旋转，用于去重
fn canonical_cycle<K: TypeKey>(cycle: &[K]) -> Vec<String> {
    let names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    let start = names
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map_or(0, |(i, _)| i);
    names[start..].iter().chain(&names[..start]).cloned().collect()
}

fn escape_label(label: &str) -> String {
    label.replace('"', "#quot;")
}

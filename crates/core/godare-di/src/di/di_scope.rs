//! 作用域与生命周期管理
//!
//! - [`LifetimeContext`]：调用方在解析时传入的不透明上下文令牌，组成
//!   application → session → request 的父子链，`Custom` 边界可以挂在任意位置。
//! - [`instance_key`]：纯函数，根据注册项和上下文计算实例槽的缓存键。
//! - [`ScopeTable`]：保存实例槽以及活动上下文，上下文结束时销毁其实例。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use super::di_service_descriptor::{DependencyLifetime, DependencyScope, Instance, Registration, TypeKey};
use crate::error::{DIError, DIResult};

/// 上下文标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(Uuid);

impl ContextId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ContextNode {
    id: ContextId,
    lifetime: DependencyLifetime,
    name: Option<String>,
    parent: Option<LifetimeContext>,
}

/// 生命周期上下文
///
/// 克隆代价很低；同一上下文的所有克隆共享同一个标识。
#[derive(Clone)]
pub struct LifetimeContext {
    node: Arc<ContextNode>,
}

impl LifetimeContext {
    /// 应用级根上下文
    pub(crate) fn root() -> Self {
        Self {
            node: Arc::new(ContextNode {
                id: ContextId::new(),
                lifetime: DependencyLifetime::Application,
                name: None,
                parent: None,
            }),
        }
    }

    pub(crate) fn child(&self, lifetime: DependencyLifetime, name: Option<String>) -> Self {
        Self {
            node: Arc::new(ContextNode {
                id: ContextId::new(),
                lifetime,
                name,
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.node.id
    }

    /// 该上下文代表的边界
    pub fn lifetime(&self) -> DependencyLifetime {
        self.node.lifetime
    }

    /// 自定义边界的名称
    pub fn name(&self) -> Option<&str> {
        self.node.name.as_deref()
    }

    pub fn parent(&self) -> Option<&LifetimeContext> {
        self.node.parent.as_ref()
    }

    /// 从自身开始向上遍历上下文链
    pub fn ancestors(&self) -> impl Iterator<Item = &LifetimeContext> {
        std::iter::successors(Some(self), |ctx| ctx.parent())
    }

    /// 查找最近的给定生命周期边界
    pub fn boundary_for(&self, lifetime: DependencyLifetime) -> Option<ContextId> {
        self.ancestors()
            .find(|ctx| ctx.lifetime() == lifetime)
            .map(LifetimeContext::id)
    }
}

impl PartialEq for LifetimeContext {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for LifetimeContext {}

impl fmt::Debug for LifetimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeContext")
            .field("id", &self.id())
            .field("lifetime", &self.lifetime())
            .field("name", &self.name())
            .finish()
    }
}

/// 实例槽的缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceKey<K> {
    /// 与上下文无关的全局槽
    Global(K),
    /// 绑定到某个上下文边界的槽
    Contextual(K, ContextId),
    /// 不缓存
    Uncached,
}

impl<K> InstanceKey<K> {
    pub fn is_cached(&self) -> bool {
        !matches!(self, InstanceKey::Uncached)
    }

    fn context(&self) -> Option<ContextId> {
        match self {
            InstanceKey::Contextual(_, id) => Some(*id),
            _ => None,
        }
    }

    fn key(&self) -> Option<&K> {
        match self {
            InstanceKey::Global(k) | InstanceKey::Contextual(k, _) => Some(k),
            InstanceKey::Uncached => None,
        }
    }
}

/// 计算注册项在给定上下文下的实例槽键
///
/// 只计算标识，不构造实例，也没有副作用。
pub fn instance_key<K: TypeKey>(
    registration: &Registration<K>,
    context: &LifetimeContext,
) -> DIResult<InstanceKey<K>> {
    match registration.scope() {
        DependencyScope::Singleton => Ok(InstanceKey::Global(registration.key().clone())),
        DependencyScope::Transient => Ok(InstanceKey::Uncached),
        DependencyScope::Scoped | DependencyScope::Lazy => {
            let lifetime = registration.lifetime();
            context
                .boundary_for(lifetime)
                .map(|id| InstanceKey::Contextual(registration.key().clone(), id))
                .ok_or_else(|| DIError::ScopeNotFound {
                    key: registration.key().to_string(),
                    lifetime,
                })
        }
    }
}

/// 实例槽：最多保存一个实例
///
/// 构造期间调用方持有槽的守卫，同一槽的并发构造只会有一个成功，
/// 其余调用者等待后拿到胜出者的实例。构造失败时槽保持为空。
#[derive(Default)]
pub(crate) struct InstanceSlot {
    value: Mutex<Option<Instance>>,
}

impl InstanceSlot {
    pub(crate) fn get(&self) -> Option<Instance> {
        self.value.lock().clone()
    }

    /// 不阻塞地查看槽，槽正被锁定时返回 `None`
    pub(crate) fn peek(&self) -> Option<Instance> {
        self.value.try_lock().and_then(|value| (*value).clone())
    }

    /// 锁定槽，守卫释放前其他调用者无法读取或写入
    pub(crate) fn lock(&self) -> SlotGuard<'_> {
        SlotGuard {
            value: self.value.lock(),
        }
    }

    fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }
}

/// 已锁定的实例槽
pub(crate) struct SlotGuard<'a> {
    value: MutexGuard<'a, Option<Instance>>,
}

impl SlotGuard<'_> {
    pub(crate) fn get(&self) -> Option<Instance> {
        (*self.value).clone()
    }

    /// 写入实例，槽已填充时保留原实例
    pub(crate) fn publish(&mut self, instance: Instance) -> bool {
        if self.value.is_some() {
            return false;
        }
        *self.value = Some(instance);
        true
    }
}

struct ScopeState<K> {
    slots: HashMap<InstanceKey<K>, Arc<InstanceSlot>>,
    /// 活动上下文及其父上下文
    contexts: HashMap<ContextId, Option<ContextId>>,
}

/// 实例槽表与活动上下文登记
pub struct ScopeTable<K: TypeKey> {
    root: ContextId,
    state: Mutex<ScopeState<K>>,
}

impl<K: TypeKey> ScopeTable<K> {
    /// 以根上下文创建
    pub fn new(root: &LifetimeContext) -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(root.id(), None);
        Self {
            root: root.id(),
            state: Mutex::new(ScopeState {
                slots: HashMap::new(),
                contexts,
            }),
        }
    }

    /// 登记新上下文，父上下文必须仍然活动
    pub fn open(&self, context: &LifetimeContext) -> DIResult<()> {
        let mut state = self.state.lock();
        let parent = context.parent().map(LifetimeContext::id);
        if let Some(parent) = parent {
            if !state.contexts.contains_key(&parent) {
                return Err(DIError::ContextEnded {
                    context: parent.to_string(),
                });
            }
        }
        state.contexts.insert(context.id(), parent);
        debug!("Opened {} context {}", context.lifetime(), context.id());
        Ok(())
    }

    pub fn is_active(&self, id: ContextId) -> bool {
        self.state.lock().contexts.contains_key(&id)
    }

    /// 确认上下文仍然活动
    pub fn ensure_active(&self, context: &LifetimeContext) -> DIResult<()> {
        if self.is_active(context.id()) {
            Ok(())
        } else {
            Err(DIError::ContextEnded {
                context: context.id().to_string(),
            })
        }
    }

    /// 结束上下文及其所有后代，销毁它们的实例槽
    ///
    /// 根上下文不能结束。返回被销毁的已填充槽数量。
    pub fn close(&self, id: ContextId) -> usize {
        if id == self.root {
            return 0;
        }

        let mut state = self.state.lock();
        if !state.contexts.contains_key(&id) {
            return 0;
        }

        let mut closing = HashSet::from([id]);
        loop {
            let before = closing.len();
            for (child, parent) in &state.contexts {
                if parent.is_some_and(|p| closing.contains(&p)) {
                    closing.insert(*child);
                }
            }
            if closing.len() == before {
                break;
            }
        }

        state.contexts.retain(|ctx, _| !closing.contains(ctx));
        let mut dropped = 0;
        state.slots.retain(|key, slot| match key.context() {
            Some(ctx) if closing.contains(&ctx) => {
                if slot.is_filled() {
                    dropped += 1;
                }
                false
            }
            _ => true,
        });

        info!(
            "Ended context {id} ({} contexts, {dropped} instances dropped)",
            closing.len()
        );
        dropped
    }

    /// 已缓存的实例
    pub(crate) fn cached(&self, key: &InstanceKey<K>) -> Option<Instance> {
        let slot = self.state.lock().slots.get(key).cloned()?;
        slot.get()
    }

    /// 获取或创建实例槽
    ///
    /// 与上下文结束在同一把锁下完成，已结束上下文不会再产生新槽。
    pub(crate) fn slot(&self, key: InstanceKey<K>) -> DIResult<Arc<InstanceSlot>> {
        let mut state = self.state.lock();
        if let Some(ctx) = key.context() {
            if !state.contexts.contains_key(&ctx) {
                return Err(DIError::ContextEnded {
                    context: ctx.to_string(),
                });
            }
        }
        Ok(Arc::clone(state.slots.entry(key).or_default()))
    }

    /// 移除某个类型键的全部实例（所有上下文）
    pub fn evict(&self, key: &K) -> usize {
        let mut state = self.state.lock();
        let before = state.slots.len();
        state.slots.retain(|slot_key, _| slot_key.key() != Some(key));
        before - state.slots.len()
    }

    /// 已构造的实例数量
    pub fn live_instances(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| slot.is_filled())
            .count()
    }

    /// 活动上下文数量（含根上下文）
    pub fn active_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    /// 销毁所有实例槽，上下文保持活动
    pub fn clear_instances(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.slots.values().filter(|slot| slot.is_filled()).count();
        state.slots.clear();
        dropped
    }

    /// 销毁所有实例槽并结束除根以外的所有上下文
    pub fn clear_all(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.slots.values().filter(|slot| slot.is_filled()).count();
        state.slots.clear();
        let root = self.root;
        state.contexts.retain(|id, _| *id == root);
        dropped
    }
}

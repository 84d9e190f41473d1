//! 服务描述符
//!
//! 定义类型键、作用域与生命周期枚举、注册项以及对外暴露的元数据快照。

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, DIError, DIResult};

/// 已解析的实例
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 类型擦除后的工厂函数
pub type FactoryFn<K> =
    Arc<dyn Fn(&ResolvedDependencies<K>) -> Result<Instance, BoxError> + Send + Sync>;

/// 可用作注册键的类型
///
/// 对满足约束的任意类型自动实现，`ServiceKey`、`String`、`&'static str`
/// 以及自定义枚举都可以直接使用。
pub trait TypeKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> TypeKey for T where T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// 默认的字符串类型键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey(Cow<'static, str>);

impl ServiceKey {
    /// 从名称创建键
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// 以 Rust 类型名作为键
    pub fn of<T: ?Sized>() -> Self {
        Self(Cow::Borrowed(type_name::<T>()))
    }

    /// 键名称
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ServiceKey {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for ServiceKey {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// 依赖作用域：决定实例在多次解析之间如何共享
///
/// 序列化形式为固定序号 0–3。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DependencyScope {
    /// 整个容器内只有一个实例
    Singleton = 0,
    /// 每个匹配生命周期的上下文一个实例
    Scoped = 1,
    /// 每次解析都创建新实例
    Transient = 2,
    /// 首次访问时才构造，之后按声明的生命周期缓存
    Lazy = 3,
}

impl DependencyScope {
    /// 所有作用域，按序号排列
    pub const ALL: [DependencyScope; 4] = [
        DependencyScope::Singleton,
        DependencyScope::Scoped,
        DependencyScope::Transient,
        DependencyScope::Lazy,
    ];

    /// 稳定序号
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// 名称
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyScope::Singleton => "singleton",
            DependencyScope::Scoped => "scoped",
            DependencyScope::Transient => "transient",
            DependencyScope::Lazy => "lazy",
        }
    }

    /// 该作用域的实例是否会被缓存
    pub fn is_cached(self) -> bool {
        !matches!(self, DependencyScope::Transient)
    }
}

impl fmt::Display for DependencyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DependencyScope> for u8 {
    fn from(scope: DependencyScope) -> Self {
        scope.ordinal()
    }
}

impl TryFrom<u8> for DependencyScope {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DependencyScope::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| format!("invalid dependency scope ordinal: {value}"))
    }
}

/// 依赖生命周期：限定 Scoped 实例有效范围的执行上下文边界
///
/// 序列化形式为固定序号 0–3。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DependencyLifetime {
    /// 应用级，即容器根上下文
    Application = 0,
    /// 会话级
    Session = 1,
    /// 请求级
    Request = 2,
    /// 调用方自定义的边界
    Custom = 3,
}

impl DependencyLifetime {
    /// 所有生命周期，按序号排列
    pub const ALL: [DependencyLifetime; 4] = [
        DependencyLifetime::Application,
        DependencyLifetime::Session,
        DependencyLifetime::Request,
        DependencyLifetime::Custom,
    ];

    /// 稳定序号
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// 名称
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyLifetime::Application => "application",
            DependencyLifetime::Session => "session",
            DependencyLifetime::Request => "request",
            DependencyLifetime::Custom => "custom",
        }
    }
}

impl fmt::Display for DependencyLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DependencyLifetime> for u8 {
    fn from(lifetime: DependencyLifetime) -> Self {
        lifetime.ordinal()
    }
}

impl TryFrom<u8> for DependencyLifetime {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DependencyLifetime::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| format!("invalid dependency lifetime ordinal: {value}"))
    }
}

/// 传给工厂函数的已解析依赖，顺序与声明顺序一致
pub struct ResolvedDependencies<K: TypeKey> {
    owner: K,
    entries: Vec<(K, Instance)>,
}

impl<K: TypeKey> ResolvedDependencies<K> {
    pub(crate) fn new(owner: K, entries: Vec<(K, Instance)>) -> Self {
        Self { owner, entries }
    }

    /// 正在构造的注册键
    pub fn owner(&self) -> &K {
        &self.owner
    }

    /// 按键获取依赖并转换为具体类型
    pub fn get<T: Any + Send + Sync>(&self, key: &K) -> DIResult<Arc<T>> {
        let instance = self
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, instance)| Arc::clone(instance))
            .ok_or_else(|| DIError::unknown(key))?;
        downcast_instance(key, instance)
    }

    /// 按声明位置获取依赖
    pub fn get_at<T: Any + Send + Sync>(&self, index: usize) -> DIResult<Arc<T>> {
        let (key, instance) = self.entries.get(index).ok_or_else(|| DIError::ValidationFailed {
            message: format!(
                "{} declares {} dependencies, index {index} is out of range",
                self.owner,
                self.entries.len()
            ),
        })?;
        downcast_instance(key, Arc::clone(instance))
    }

    /// 未转换的实例
    pub fn instance(&self, key: &K) -> Option<&Instance> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, i)| i)
    }

    /// 依赖的键，按声明顺序
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 将实例转换为具体类型
pub fn downcast_instance<K: fmt::Display, T: Any + Send + Sync>(
    key: &K,
    instance: Instance,
) -> DIResult<Arc<T>> {
    instance.downcast::<T>().map_err(|_| DIError::TypeMismatch {
        key: key.to_string(),
        expected: type_name::<T>(),
    })
}

/// 注册项：类型键、工厂、作用域、生命周期与声明的依赖
pub struct Registration<K: TypeKey> {
    key: K,
    scope: DependencyScope,
    lifetime: DependencyLifetime,
    lazy: bool,
    dependencies: Vec<K>,
    factory: FactoryFn<K>,
}

impl<K: TypeKey> Registration<K> {
    /// 创建注册项，工厂返回具体类型
    pub fn new<T, F>(key: impl Into<K>, scope: DependencyScope, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ResolvedDependencies<K>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let factory: FactoryFn<K> = Arc::new(
            move |deps: &ResolvedDependencies<K>| -> Result<Instance, BoxError> {
                factory(deps).map(|value| Arc::new(value) as Instance)
            },
        );
        Self::with_factory(key, scope, factory)
    }

    /// 使用类型擦除的工厂创建注册项
    pub fn with_factory(key: impl Into<K>, scope: DependencyScope, factory: FactoryFn<K>) -> Self {
        Self {
            key: key.into(),
            scope,
            lifetime: DependencyLifetime::Application,
            lazy: scope == DependencyScope::Lazy,
            dependencies: Vec::new(),
            factory,
        }
    }

    /// 注册一个已经构造好的单例
    pub fn with_instance<T: Any + Send + Sync>(key: impl Into<K>, value: T) -> Self {
        let instance: Instance = Arc::new(value);
        let factory: FactoryFn<K> = Arc::new(
            move |_: &ResolvedDependencies<K>| -> Result<Instance, BoxError> {
                Ok(Arc::clone(&instance))
            },
        );
        Self::with_factory(key, DependencyScope::Singleton, factory)
    }

    /// 设置生命周期
    pub fn with_lifetime(mut self, lifetime: DependencyLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// 设置依赖列表（保持顺序）
    pub fn with_dependencies<I>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<K>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// 追加一个依赖
    pub fn depends_on(mut self, dependency: impl Into<K>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// 标记是否延迟构造
    ///
    /// 延迟的单例不参与预加载。`Lazy` 作用域始终为延迟。
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy || self.scope == DependencyScope::Lazy;
        self
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn scope(&self) -> DependencyScope {
        self.scope
    }

    pub fn lifetime(&self) -> DependencyLifetime {
        self.lifetime
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn dependencies(&self) -> &[K] {
        &self.dependencies
    }

    pub(crate) fn invoke(&self, deps: &ResolvedDependencies<K>) -> Result<Instance, BoxError> {
        (self.factory)(deps)
    }
}

impl<K: TypeKey> fmt::Debug for Registration<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .field("lifetime", &self.lifetime)
            .field("lazy", &self.lazy)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// 注册元数据的只读快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyMetadata {
    /// 类型键
    #[serde(rename = "type")]
    pub type_key: String,
    pub scope: DependencyScope,
    pub lifetime: DependencyLifetime,
    pub lazy: bool,
    /// 声明的依赖，按声明顺序
    pub dependencies: Vec<String>,
    pub registration_time: DateTime<Utc>,
    /// 最近一次解析时间，从未解析时为 `None`
    pub last_accessed: Option<DateTime<Utc>>,
    /// 注册版本，显式替换时递增
    pub version: u64,
}

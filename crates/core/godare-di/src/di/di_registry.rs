//! 服务注册表
//!
//! 保存每个类型键的注册项与元数据（注册时间、最近访问时间、版本）。
//! 注册表只负责存取，不做任何解析。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::{RwLock, RwLockReadGuard};

use super::di_service_descriptor::{DependencyMetadata, Registration, TypeKey};
use crate::error::{DIError, DIResult};

/// 注册表中的一条记录
struct RegistryEntry<K: TypeKey> {
    registration: Arc<Registration<K>>,
    registration_time: DateTime<Utc>,
    last_accessed: Option<DateTime<Utc>>,
    version: u64,
}

impl<K: TypeKey> RegistryEntry<K> {
    fn new(registration: Registration<K>, version: u64) -> Self {
        Self {
            registration: Arc::new(registration),
            registration_time: Utc::now(),
            last_accessed: None,
            version,
        }
    }

    fn metadata(&self) -> DependencyMetadata {
        let registration = &self.registration;
        DependencyMetadata {
            type_key: registration.key().to_string(),
            scope: registration.scope(),
            lifetime: registration.lifetime(),
            lazy: registration.is_lazy(),
            dependencies: registration
                .dependencies()
                .iter()
                .map(ToString::to_string)
                .collect(),
            registration_time: self.registration_time,
            last_accessed: self.last_accessed,
            version: self.version,
        }
    }
}

/// 服务注册表
///
/// 所有修改都在同一把写锁下完成，并发注册同一个键时先到者成功，
/// `last_accessed` 的并发更新以最后写入为准。
pub struct ServiceRegistry<K: TypeKey> {
    entries: RwLock<HashMap<K, RegistryEntry<K>>>,
}

impl<K: TypeKey> Default for ServiceRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TypeKey> ServiceRegistry<K> {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 注册新类型，返回版本号 1
    pub fn register(&self, registration: Registration<K>) -> DIResult<u64> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(registration.key()) {
            return Err(DIError::DuplicateRegistration {
                key: registration.key().to_string(),
                version: existing.version,
            });
        }

        debug!(
            "Registered {} (scope: {}, lifetime: {}, dependencies: {:?})",
            registration.key(),
            registration.scope(),
            registration.lifetime(),
            registration.dependencies()
        );
        entries.insert(registration.key().clone(), RegistryEntry::new(registration, 1));
        Ok(1)
    }

    /// 显式替换已有注册
    ///
    /// `expected_version` 必须等于当前版本；键不存在时期望版本为 0，
    /// 此时等同于首次注册。返回新版本号。
    pub fn replace(&self, registration: Registration<K>, expected_version: u64) -> DIResult<u64> {
        let mut entries = self.entries.write();
        let actual = entries.get(registration.key()).map_or(0, |e| e.version);
        if actual != expected_version {
            return Err(DIError::VersionConflict {
                key: registration.key().to_string(),
                expected: expected_version,
                actual,
            });
        }

        let version = actual + 1;
        debug!("Replaced {} (version {actual} -> {version})", registration.key());
        entries.insert(
            registration.key().clone(),
            RegistryEntry::new(registration, version),
        );
        Ok(version)
    }

    /// 查找注册项
    pub fn lookup(&self, key: &K) -> DIResult<Arc<Registration<K>>> {
        self.entries
            .read()
            .get(key)
            .map(|entry| Arc::clone(&entry.registration))
            .ok_or_else(|| DIError::unknown(key))
    }

    /// 更新最近访问时间
    pub fn touch(&self, key: &K) -> DIResult<()> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key).ok_or_else(|| DIError::unknown(key))?;
        entry.last_accessed = Some(Utc::now());
        Ok(())
    }

    /// 元数据快照
    pub fn metadata(&self, key: &K) -> DIResult<DependencyMetadata> {
        self.entries
            .read()
            .get(key)
            .map(RegistryEntry::metadata)
            .ok_or_else(|| DIError::unknown(key))
    }

    /// 所有注册的元数据，按类型键排序
    pub fn all_metadata(&self) -> Vec<DependencyMetadata> {
        let mut all: Vec<_> = self.entries.read().values().map(RegistryEntry::metadata).collect();
        all.sort_by(|a, b| a.type_key.cmp(&b.type_key));
        all
    }

    /// 当前版本，未注册时为 `None`
    pub fn version(&self, key: &K) -> Option<u64> {
        self.entries.read().get(key).map(|e| e.version)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 所有注册项
    pub fn registrations(&self) -> Vec<Arc<Registration<K>>> {
        self.entries
            .read()
            .values()
            .map(|e| Arc::clone(&e.registration))
            .collect()
    }

    /// 在一次读锁内观察注册表，用于需要一致快照的遍历
    pub(crate) fn view(&self) -> RegistryView<'_, K> {
        RegistryView {
            entries: self.entries.read(),
        }
    }

    /// 清空注册表
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// 注册表的只读视图，持有读锁
pub(crate) struct RegistryView<'a, K: TypeKey> {
    entries: RwLockReadGuard<'a, HashMap<K, RegistryEntry<K>>>,
}

impl<K: TypeKey> RegistryView<'_, K> {
    pub(crate) fn get(&self, key: &K) -> Option<&Arc<Registration<K>>> {
        self.entries.get(key).map(|e| &e.registration)
    }
}

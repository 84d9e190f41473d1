//! 解析性能指标
//!
//! 计数器只增不减，平均解析时间是每次记录样本后更新的滑动均值。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::di_service_descriptor::TypeKey;

/// 性能指标快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// 平均解析时间
    pub average_resolution_time: Duration,
    /// 缓存命中率（命中次数 / 成功解析次数）
    pub cache_hit_rate: f64,
    /// 估算的内存占用（字节）
    pub memory_usage: f64,
    /// 成功解析次数
    pub total_resolutions: u64,
    /// 检测到的循环依赖次数
    pub circular_dependency_count: u64,
    /// 缓存命中次数
    pub cache_hits: u64,
    /// 缓存未命中次数
    pub cache_misses: u64,
    /// 失败的解析次数（不含循环依赖）
    pub failed_resolutions: u64,
}

#[derive(Debug, Default)]
struct LatencyStats {
    samples: u64,
    mean_nanos: f64,
}

impl LatencyStats {
    fn record(&mut self, elapsed: Duration) {
        self.samples += 1;
        let sample = elapsed.as_nanos() as f64;
        self.mean_nanos += (sample - self.mean_nanos) / self.samples as f64;
    }

    fn mean(&self) -> Duration {
        Duration::from_nanos(self.mean_nanos.round() as u64)
    }
}

/// 指标收集器
pub struct MetricsCollector<K: TypeKey> {
    enabled: bool,
    total_resolutions: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    failed_resolutions: AtomicU64,
    circular_dependencies: AtomicU64,
    latency: Mutex<LatencyStats>,
    per_key: Mutex<HashMap<K, u64>>,
}

impl<K: TypeKey> MetricsCollector<K> {
    /// 创建收集器
    ///
    /// 关闭时仍然统计循环依赖，但不记录解析样本。
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            total_resolutions: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            failed_resolutions: AtomicU64::new(0),
            circular_dependencies: AtomicU64::new(0),
            latency: Mutex::new(LatencyStats::default()),
            per_key: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 记录一次成功解析
    pub fn record_resolution(&self, key: &K, elapsed: Duration, cache_hit: bool) {
        if !self.enabled {
            return;
        }
        // 总数最后更新，快照里的命中数以总数为上限
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.lock().record(elapsed);
        *self.per_key.lock().entry(key.clone()).or_insert(0) += 1;
        self.total_resolutions.fetch_add(1, Ordering::Release);
    }

    /// 记录一次失败的解析
    pub fn record_failure(&self) {
        if self.enabled {
            self.failed_resolutions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 记录一次循环依赖
    pub fn record_circular_dependency(&self) {
        self.circular_dependencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_resolutions(&self) -> u64 {
        self.total_resolutions.load(Ordering::Acquire)
    }

    pub fn circular_dependency_count(&self) -> u64 {
        self.circular_dependencies.load(Ordering::Relaxed)
    }

    /// 每个键的成功解析次数，按次数降序
    pub fn resolution_counts(&self) -> Vec<(K, u64)> {
        let mut counts: Vec<_> = self
            .per_key
            .lock()
            .iter()
            .map(|(k, n)| (k.clone(), *n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));
        counts
    }

    /// 生成快照
    ///
    /// `estimated_bytes` 由容器根据实例与注册数量估算。
    pub fn snapshot(&self, estimated_bytes: f64) -> PerformanceMetrics {
        let total = self.total_resolutions.load(Ordering::Acquire);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_hit_rate = if total == 0 {
            0.0
        } else {
            hits.min(total) as f64 / total as f64
        };

        PerformanceMetrics {
            average_resolution_time: self.latency.lock().mean(),
            cache_hit_rate,
            memory_usage: estimated_bytes,
            total_resolutions: total,
            circular_dependency_count: self.circular_dependencies.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            failed_resolutions: self.failed_resolutions.load(Ordering::Relaxed),
        }
    }
}

/// 应用全局状态

use std::sync::Arc;

use crate::config::CoreConfig;
use crate::db::{memory::MemoryStore, SharedStore};
use crate::metrics::Metrics;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 键值存储 - 集群状态的唯一权威来源
    store: SharedStore,
    /// 核心组件参数
    core: Arc<CoreConfig>,
    metrics: Metrics,
}

impl AppState {
    pub fn new(store: SharedStore, core: CoreConfig, metrics: Metrics) -> Self {
        Self {
            store,
            core: Arc::new(core),
            metrics,
        }
    }

    /// 基于内存存储的状态，供开发与测试使用
    pub fn in_memory(core: CoreConfig) -> prometheus::Result<Self> {
        Ok(Self::new(Arc::new(MemoryStore::new()), core, Metrics::new()?))
    }

    /// 获取存储（克隆）
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn core(&self) -> &CoreConfig {
        &self.core
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

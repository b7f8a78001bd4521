/// 宿主机数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{current_schema_version, BackendType, HypervisorStatus};

/// 存储池（卷组），内嵌在宿主机记录中，随宿主机一起原子更新
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoragePool {
    pub vg_name: String,
    pub backend: BackendType,
    /// 总容量 (GB)
    pub vg_cap: u64,
    /// 剩余容量 (GB)
    pub free_cap: u64,
}

impl StoragePool {
    pub fn new(vg_name: impl Into<String>, backend: BackendType, vg_cap: u64) -> Self {
        Self {
            vg_name: vg_name.into(),
            backend,
            vg_cap,
            free_cap: vg_cap,
        }
    }
}

/// 一笔容量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub hypervisor: String,
    pub cpu: u32,
    pub memory_mb: u64,
    pub pool: Option<String>,
    pub storage_gb: u64,
}

impl Reservation {
    pub fn new(
        hypervisor: impl Into<String>,
        cpu: u32,
        memory_mb: u64,
        pool: Option<String>,
        storage_gb: u64,
    ) -> Self {
        Self {
            hypervisor: hypervisor.into(),
            cpu,
            memory_mb,
            pool,
            storage_gb,
        }
    }

    /// 只涉及 CPU / 内存
    pub fn compute(hypervisor: impl Into<String>, cpu: u32, memory_mb: u64) -> Self {
        Self::new(hypervisor, cpu, memory_mb, None, 0)
    }

    /// 只涉及存储池
    pub fn storage(hypervisor: impl Into<String>, pool: impl Into<String>, storage_gb: u64) -> Self {
        Self::new(hypervisor, 0, 0, Some(pool.into()), storage_gb)
    }

    pub fn is_empty(&self) -> bool {
        self.cpu == 0 && self.memory_mb == 0 && self.storage_gb == 0
    }
}

/// 宿主机模型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hypervisor {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub name: String,
    pub ip: String,
    pub port: u16,

    // 资源信息
    pub cpu: u32,
    /// 内存总量 (MB)
    pub memory: u64,
    pub free_cpu: u32,
    pub free_memory: u64,

    #[serde(default)]
    pub status: HypervisorStatus,
    #[serde(default)]
    pub storage_pools: Vec<StoragePool>,

    #[serde(default)]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Hypervisor {
    /// 新登记的宿主机：剩余容量等于总容量
    pub fn new(
        name: impl Into<String>,
        ip: impl Into<String>,
        port: u16,
        cpu: u32,
        memory: u64,
        storage_pools: Vec<StoragePool>,
    ) -> Self {
        Self {
            schema_version: current_schema_version(),
            name: name.into(),
            ip: ip.into(),
            port,
            cpu,
            memory,
            free_cpu: cpu,
            free_memory: memory,
            status: HypervisorStatus::Halted,
            storage_pools,
            registered_at: None,
            last_heartbeat: None,
        }
    }

    pub fn pool(&self, vg_name: &str) -> Option<&StoragePool> {
        self.storage_pools.iter().find(|p| p.vg_name == vg_name)
    }

    pub fn pool_mut(&mut self, vg_name: &str) -> Option<&mut StoragePool> {
        self.storage_pools.iter_mut().find(|p| p.vg_name == vg_name)
    }

    /// 容量不变式：0 <= free <= total（CPU、内存、每个存储池）
    pub fn capacity_consistent(&self) -> bool {
        self.free_cpu <= self.cpu
            && self.free_memory <= self.memory
            && self.storage_pools.iter().all(|p| p.free_cap <= p.vg_cap)
    }

    pub fn is_running(&self) -> bool {
        self.status == HypervisorStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_hypervisor_is_fully_free() {
        let hv = Hypervisor::new(
            "hv1",
            "10.0.0.1",
            16509,
            64,
            65536,
            vec![StoragePool::new("vg0", BackendType::Lvm, 2000)],
        );
        assert_eq!(hv.free_cpu, 64);
        assert_eq!(hv.free_memory, 65536);
        assert_eq!(hv.pool("vg0").unwrap().free_cap, 2000);
        assert!(hv.capacity_consistent());
        assert!(!hv.is_running());
    }

    #[test]
    fn test_optional_fields_default_on_decode() {
        let raw = r#"{
            "name": "hv1", "ip": "10.0.0.1", "port": 16509,
            "cpu": 8, "memory": 16384, "free_cpu": 8, "free_memory": 16384
        }"#;
        let hv: Hypervisor = serde_json::from_str(raw).unwrap();
        assert_eq!(hv.status, HypervisorStatus::Halted);
        assert!(hv.storage_pools.is_empty());
        assert_eq!(hv.schema_version, super::super::SCHEMA_VERSION);
    }
}

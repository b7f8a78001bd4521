/// 宿主机 DTO

use common::models::{BackendType, Hypervisor, HypervisorStatus, StoragePool};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 存储池规格
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoragePoolDto {
    #[validate(length(min = 1, max = 128))]
    pub vg_name: String,
    pub backend: BackendType,
    pub vg_cap: u64,
}

/// 登记宿主机 DTO
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterHypervisorDto {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(min = 1, max = 45))]
    pub ip: String,

    pub port: u16,

    #[validate(range(min = 1))]
    pub cpu: u32,

    #[validate(range(min = 1))]
    pub memory: u64,

    #[serde(default)]
    #[validate]
    pub storage_pools: Vec<StoragePoolDto>,

    /// 初始状态，默认 halted，等待健康上报
    #[serde(default)]
    pub status: Option<HypervisorStatus>,
}

impl RegisterHypervisorDto {
    pub fn into_record(self) -> Hypervisor {
        let pools = self
            .storage_pools
            .into_iter()
            .map(|p| StoragePool::new(p.vg_name, p.backend, p.vg_cap))
            .collect();
        let mut hv = Hypervisor::new(self.name, self.ip, self.port, self.cpu, self.memory, pools);
        hv.status = self.status.unwrap_or_default();
        hv
    }
}

/// 健康上报 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorStatusDto {
    pub status: HypervisorStatus,
}

/// 宿主机容量摘要
#[derive(Debug, Serialize, Deserialize)]
pub struct HypervisorStatsResponse {
    pub total_hypervisors: usize,
    pub running_hypervisors: usize,
    pub total_cpu: u64,
    pub free_cpu: u64,
    pub total_memory: u64,
    pub free_memory: u64,
    pub total_storage_gb: u64,
    pub free_storage_gb: u64,
}

impl HypervisorStatsResponse {
    pub fn from_records(hvs: &[Hypervisor]) -> Self {
        Self {
            total_hypervisors: hvs.len(),
            running_hypervisors: hvs.iter().filter(|h| h.is_running()).count(),
            total_cpu: hvs.iter().map(|h| h.cpu as u64).sum(),
            free_cpu: hvs.iter().map(|h| h.free_cpu as u64).sum(),
            total_memory: hvs.iter().map(|h| h.memory).sum(),
            free_memory: hvs.iter().map(|h| h.free_memory).sum(),
            total_storage_gb: hvs
                .iter()
                .flat_map(|h| h.storage_pools.iter())
                .map(|p| p.vg_cap)
                .sum(),
            free_storage_gb: hvs
                .iter()
                .flat_map(|h| h.storage_pools.iter())
                .map(|p| p.free_cap)
                .sum(),
        }
    }
}

/// 调度器
///
/// 机器放置：在所有 running 宿主机中，选择同时满足 CPU、内存、存储三项需求
/// 且剩余内存最多的一台（内存通常是虚拟化的瓶颈资源），再在其上选择
/// 剩余容量最多的匹配存储池。
/// 存储卷放置：在所有匹配后端类型的存储池中选择剩余容量最多的一个。
/// 相同条件下按宿主机名、存储池名的字典序取最小者，结果确定。

use common::keys;
use common::models::{BackendType, Hypervisor, StoragePool};
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::db;

/// 放置请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub cpu: u32,
    pub memory_mb: u64,
    pub storage_gb: u64,
    /// 限定存储池后端
    pub backend: Option<BackendType>,
    /// 限定存储池名（例如镜像模板所在卷组）
    pub pool_name: Option<String>,
}

/// 放置结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub hypervisor: String,
    pub pool: Option<String>,
}

impl PlacementRequest {
    fn pool_matches(&self, pool: &StoragePool) -> bool {
        self.backend.map_or(true, |b| pool.backend == b)
            && self.pool_name.as_deref().map_or(true, |n| pool.vg_name == n)
            && pool.free_cap >= self.storage_gb
    }

    fn describe(&self) -> String {
        format!(
            "cpu={}, memory={}MB, storage={}GB, backend={}, pool={}",
            self.cpu,
            self.memory_mb,
            self.storage_gb,
            self.backend.map(|b| b.as_str()).unwrap_or("any"),
            self.pool_name.as_deref().unwrap_or("any"),
        )
    }
}

/// 剩余容量最多的匹配存储池；同容量取名字小的
fn best_pool<'a>(hv: &'a Hypervisor, req: &PlacementRequest) -> Option<&'a StoragePool> {
    hv.storage_pools
        .iter()
        .filter(|p| req.pool_matches(p))
        .max_by(|a, b| {
            a.free_cap
                .cmp(&b.free_cap)
                .then_with(|| b.vg_name.cmp(&a.vg_name))
        })
}

/// 机器放置（纯函数）
pub fn select_host(hypervisors: &[Hypervisor], req: &PlacementRequest) -> Result<Placement> {
    let needs_storage = req.storage_gb > 0;

    let best = hypervisors
        .iter()
        .filter(|hv| hv.is_running())
        .filter(|hv| hv.free_cpu >= req.cpu && hv.free_memory >= req.memory_mb)
        .filter_map(|hv| {
            if needs_storage {
                best_pool(hv, req).map(|pool| (hv, Some(pool)))
            } else {
                Some((hv, None))
            }
        })
        .max_by(|(a, _), (b, _)| {
            a.free_memory
                .cmp(&b.free_memory)
                .then_with(|| b.name.cmp(&a.name))
        });

    match best {
        Some((hv, pool)) => Ok(Placement {
            hypervisor: hv.name.clone(),
            pool: pool.map(|p| p.vg_name.clone()),
        }),
        None => Err(Error::NoCapacityAvailable(format!(
            "没有宿主机能满足 {}",
            req.describe()
        ))),
    }
}

/// 存储卷放置（纯函数）
pub fn select_pool(hypervisors: &[Hypervisor], req: &PlacementRequest) -> Result<Placement> {
    let best = hypervisors
        .iter()
        .filter(|hv| hv.is_running())
        .flat_map(|hv| {
            hv.storage_pools
                .iter()
                .filter(|p| req.pool_matches(p))
                .map(move |p| (hv, p))
        })
        .max_by(|(ha, pa), (hb, pb)| {
            pa.free_cap
                .cmp(&pb.free_cap)
                .then_with(|| hb.name.cmp(&ha.name))
                .then_with(|| pb.vg_name.cmp(&pa.vg_name))
        });

    match best {
        Some((hv, pool)) => Ok(Placement {
            hypervisor: hv.name.clone(),
            pool: Some(pool.vg_name.clone()),
        }),
        None => Err(Error::NoCapacityAvailable(format!(
            "没有存储池能满足 {}",
            req.describe()
        ))),
    }
}

pub struct SchedulerService {
    state: AppState,
}

impl SchedulerService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    async fn snapshot(&self) -> Result<Vec<Hypervisor>> {
        let mut hvs: Vec<Hypervisor> =
            db::list_records(self.state.store().as_ref(), keys::HYPERVISOR_PREFIX).await?;
        hvs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hvs)
    }

    pub async fn place_vm(&self, req: &PlacementRequest) -> Result<Placement> {
        let hvs = self.snapshot().await?;
        debug!("调度机器: {} (候选宿主机 {} 台)", req.describe(), hvs.len());
        let result = select_host(&hvs, req);
        self.record("vm", &result);
        if let Ok(ref p) = result {
            info!("机器放置到 {} (pool={:?})", p.hypervisor, p.pool);
        }
        result
    }

    pub async fn place_volume(&self, req: &PlacementRequest) -> Result<Placement> {
        let hvs = self.snapshot().await?;
        debug!("调度存储卷: {}", req.describe());
        let result = select_pool(&hvs, req);
        self.record("volume", &result);
        if let Ok(ref p) = result {
            info!("存储卷放置到 {} (pool={:?})", p.hypervisor, p.pool);
        }
        result
    }

    /// 只统计成功放置与容量不足；存储故障等错误不计入放置失败
    fn record(&self, kind: &str, result: &Result<Placement>) {
        match result {
            Ok(_) => self.state.metrics().placement(kind, true),
            Err(Error::NoCapacityAvailable(_)) => self.state.metrics().placement(kind, false),
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::HypervisorStatus;

    fn hv(name: &str, free_cpu: u32, free_memory: u64, pools: Vec<StoragePool>) -> Hypervisor {
        let mut hv = Hypervisor::new(name, "10.0.0.1", 16509, 64, 65536, pools);
        hv.free_cpu = free_cpu;
        hv.free_memory = free_memory;
        hv.status = HypervisorStatus::Running;
        hv
    }

    fn pool(name: &str, backend: BackendType, free: u64) -> StoragePool {
        let mut p = StoragePool::new(name, backend, 2000);
        p.free_cap = free;
        p
    }

    fn vm_request(cpu: u32, memory_mb: u64) -> PlacementRequest {
        PlacementRequest {
            cpu,
            memory_mb,
            ..Default::default()
        }
    }

    #[test]
    fn test_best_fit_by_memory() {
        let hvs = vec![
            hv("hv1", 64, 65536, vec![]),
            hv("hv2", 64, 32768, vec![]),
        ];
        let p = select_host(&hvs, &vm_request(4, 8192)).unwrap();
        assert_eq!(p.hypervisor, "hv1");
        assert_eq!(p.pool, None);
    }

    #[test]
    fn test_tie_broken_by_name() {
        let hvs = vec![
            hv("hv-b", 8, 16384, vec![]),
            hv("hv-a", 8, 16384, vec![]),
            hv("hv-c", 8, 16384, vec![]),
        ];
        for _ in 0..5 {
            assert_eq!(select_host(&hvs, &vm_request(1, 1024)).unwrap().hypervisor, "hv-a");
        }
    }

    #[test]
    fn test_all_dimensions_required() {
        // hv1 内存最多但 CPU 不够；hv2 存储不够；只有 hv3 全部满足
        let hvs = vec![
            hv("hv1", 1, 65536, vec![pool("vg0", BackendType::Lvm, 2000)]),
            hv("hv2", 32, 49152, vec![pool("vg0", BackendType::Lvm, 10)]),
            hv("hv3", 32, 16384, vec![pool("vg0", BackendType::Lvm, 500)]),
        ];
        let req = PlacementRequest {
            cpu: 4,
            memory_mb: 8192,
            storage_gb: 100,
            ..Default::default()
        };
        let p = select_host(&hvs, &req).unwrap();
        assert_eq!(p.hypervisor, "hv3");
        assert_eq!(p.pool.as_deref(), Some("vg0"));
    }

    #[test]
    fn test_no_capacity_available() {
        let hvs = vec![hv("hv1", 2, 65536, vec![]), hv("hv2", 2, 32768, vec![])];
        let err = select_host(&hvs, &vm_request(4, 1024)).unwrap_err();
        assert!(matches!(err, Error::NoCapacityAvailable(_)));
    }

    #[test]
    fn test_only_running_hypervisors() {
        let mut halted = hv("hv1", 64, 65536, vec![]);
        halted.status = HypervisorStatus::Halted;
        let mut broken = hv("hv2", 64, 65536, vec![]);
        broken.status = HypervisorStatus::Error;
        let hvs = vec![halted, broken, hv("hv3", 4, 4096, vec![])];
        assert_eq!(select_host(&hvs, &vm_request(2, 2048)).unwrap().hypervisor, "hv3");
    }

    #[test]
    fn test_pool_choice_respects_backend_and_name() {
        let hvs = vec![hv(
            "hv1",
            64,
            65536,
            vec![
                pool("ssd0", BackendType::Ssd, 300),
                pool("vg0", BackendType::Lvm, 800),
                pool("vg1", BackendType::Lvm, 900),
            ],
        )];
        let mut req = PlacementRequest {
            cpu: 1,
            memory_mb: 1024,
            storage_gb: 50,
            backend: Some(BackendType::Lvm),
            pool_name: None,
        };
        assert_eq!(select_host(&hvs, &req).unwrap().pool.as_deref(), Some("vg1"));

        req.pool_name = Some("vg0".to_string());
        assert_eq!(select_host(&hvs, &req).unwrap().pool.as_deref(), Some("vg0"));

        req.backend = Some(BackendType::Ssd);
        assert!(select_host(&hvs, &req).is_err());
    }

    #[test]
    fn test_volume_placement_picks_largest_free_pool() {
        let hvs = vec![
            hv("hv1", 0, 0, vec![pool("vg0", BackendType::Qcow2, 100)]),
            hv("hv2", 0, 0, vec![pool("vg0", BackendType::Qcow2, 700), pool("vg1", BackendType::Lvm, 1900)]),
            hv("hv3", 0, 0, vec![pool("vg9", BackendType::Qcow2, 700)]),
        ];
        let req = PlacementRequest {
            storage_gb: 50,
            backend: Some(BackendType::Qcow2),
            ..Default::default()
        };
        let p = select_pool(&hvs, &req).unwrap();
        assert_eq!(p.hypervisor, "hv2");
        assert_eq!(p.pool.as_deref(), Some("vg0"));

        let too_big = PlacementRequest {
            storage_gb: 5000,
            backend: Some(BackendType::Qcow2),
            ..Default::default()
        };
        assert!(matches!(select_pool(&hvs, &too_big), Err(Error::NoCapacityAvailable(_))));
    }

    #[test]
    fn test_deterministic_across_input_order() {
        let a = hv("hv1", 16, 32768, vec![]);
        let b = hv("hv2", 16, 32768, vec![]);
        let req = vm_request(2, 2048);
        let first = select_host(&[a.clone(), b.clone()], &req).unwrap();
        let second = select_host(&[b, a], &req).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_only_capacity_shortfalls_count_as_placement_failures() {
        let state = crate::services::test_support::state_with(vec![]).await;
        let service = SchedulerService::new(state.clone());

        let err = service.place_vm(&vm_request(1, 1024)).await.unwrap_err();
        assert!(matches!(err, Error::NoCapacityAvailable(_)));
        assert_eq!(state.metrics().placement_failures_for("vm"), 1);

        service.record("vm", &Err(Error::StoreUnavailable("redis down".to_string())));
        assert_eq!(state.metrics().placement_failures_for("vm"), 1);
    }
}

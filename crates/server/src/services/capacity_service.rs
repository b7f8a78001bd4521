/// 容量记账服务
///
/// 宿主机记录上的剩余 CPU / 内存 / 存储池容量只通过这里修改，
/// 每次扣减或归还都是对宿主机记录的一次 CAS。

use common::keys;
use common::models::Hypervisor;
use common::{Error, Result};
use tracing::{info, warn};

pub use common::models::Reservation;

use crate::app_state::AppState;
use crate::db::{self, Update};

/// 在快照上扣减；不满足时返回 `InsufficientCapacity`，快照不变
pub fn debit(hv: &mut Hypervisor, r: &Reservation) -> Result<()> {
    if hv.free_cpu < r.cpu {
        return Err(Error::InsufficientCapacity(format!(
            "宿主机 {} CPU 不足: 需要 {}, 剩余 {}",
            hv.name, r.cpu, hv.free_cpu
        )));
    }
    if hv.free_memory < r.memory_mb {
        return Err(Error::InsufficientCapacity(format!(
            "宿主机 {} 内存不足: 需要 {} MB, 剩余 {} MB",
            hv.name, r.memory_mb, hv.free_memory
        )));
    }
    if r.storage_gb > 0 {
        let pool_name = r.pool.as_deref().ok_or_else(|| {
            Error::InvalidArgument("存储预留必须指定存储池".to_string())
        })?;
        let name = hv.name.clone();
        let pool = hv
            .pool_mut(pool_name)
            .ok_or_else(|| Error::NotFound(format!("宿主机 {} 上的存储池 {}", name, pool_name)))?;
        if pool.free_cap < r.storage_gb {
            return Err(Error::InsufficientCapacity(format!(
                "宿主机 {} 存储池 {} 容量不足: 需要 {} GB, 剩余 {} GB",
                name, pool_name, r.storage_gb, pool.free_cap
            )));
        }
        pool.free_cap -= r.storage_gb;
    }
    hv.free_cpu -= r.cpu;
    hv.free_memory -= r.memory_mb;
    Ok(())
}

/// 在快照上归还；结果不会超过总量
pub fn credit(hv: &mut Hypervisor, r: &Reservation) -> Result<()> {
    let free_cpu = hv.free_cpu.saturating_add(r.cpu);
    let free_memory = hv.free_memory.saturating_add(r.memory_mb);
    if free_cpu > hv.cpu || free_memory > hv.memory {
        warn!(
            "宿主机 {} 归还后超过总量 (cpu {}/{}, memory {}/{})，按总量截断",
            hv.name, free_cpu, hv.cpu, free_memory, hv.memory
        );
    }
    if r.storage_gb > 0 {
        let pool_name = r.pool.as_deref().ok_or_else(|| {
            Error::InvalidArgument("存储归还必须指定存储池".to_string())
        })?;
        let name = hv.name.clone();
        let pool = hv
            .pool_mut(pool_name)
            .ok_or_else(|| Error::NotFound(format!("宿主机 {} 上的存储池 {}", name, pool_name)))?;
        let free_cap = pool.free_cap.saturating_add(r.storage_gb);
        if free_cap > pool.vg_cap {
            warn!("存储池 {}/{} 归还后超过总量，按总量截断", name, pool_name);
        }
        pool.free_cap = free_cap.min(pool.vg_cap);
    }
    hv.free_cpu = free_cpu.min(hv.cpu);
    hv.free_memory = free_memory.min(hv.memory);
    Ok(())
}

pub struct CapacityService {
    state: AppState,
}

impl CapacityService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 扣减容量，返回扣减后的宿主机快照
    pub async fn reserve(&self, r: &Reservation) -> Result<Hypervisor> {
        let hv = self.apply(r, debit).await?;
        info!(
            "容量已预留: hv={}, cpu={}, memory={}MB, pool={:?}, storage={}GB, 剩余 cpu={} memory={}MB",
            r.hypervisor, r.cpu, r.memory_mb, r.pool, r.storage_gb, hv.free_cpu, hv.free_memory
        );
        Ok(hv)
    }

    /// 归还容量，返回归还后的宿主机快照
    ///
    /// 调用方必须先通过资源自身的状态转换取得这笔容量的归还权，
    /// 这里不做去重
    pub async fn release(&self, r: &Reservation) -> Result<Hypervisor> {
        let hv = self.apply(r, credit).await?;
        info!(
            "容量已归还: hv={}, cpu={}, memory={}MB, pool={:?}, storage={}GB",
            r.hypervisor, r.cpu, r.memory_mb, r.pool, r.storage_gb
        );
        Ok(hv)
    }

    async fn apply<F>(&self, r: &Reservation, op: F) -> Result<Hypervisor>
    where
        F: Fn(&mut Hypervisor, &Reservation) -> Result<()> + Send + Sync,
    {
        let key = keys::hypervisor(&r.hypervisor);
        let store = self.state.store();
        db::update_record(
            store.as_ref(),
            &key,
            self.state.core().cas_max_retries,
            |current: Option<Hypervisor>| {
                let mut hv = current.ok_or_else(|| Error::NotFound(format!("宿主机 {}", r.hypervisor)))?;
                op(&mut hv, r)?;
                Ok(Update::Write(hv.clone(), hv))
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use common::models::{BackendType, HypervisorStatus, StoragePool};
    use futures::future::join_all;

    async fn state_with(hvs: Vec<Hypervisor>) -> AppState {
        let state = AppState::in_memory(CoreConfig::default()).unwrap();
        for hv in hvs {
            db::create_record(state.store().as_ref(), &keys::hypervisor(&hv.name), &hv)
                .await
                .unwrap();
        }
        state
    }

    fn hv(name: &str, cpu: u32, memory: u64) -> Hypervisor {
        let mut hv = Hypervisor::new(
            name,
            "10.0.0.1",
            16509,
            cpu,
            memory,
            vec![StoragePool::new("vg0", BackendType::Lvm, 1000)],
        );
        hv.status = HypervisorStatus::Running;
        hv
    }

    async fn load(state: &AppState, name: &str) -> Hypervisor {
        db::require_record(state.store().as_ref(), &keys::hypervisor(name))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reserve_then_release_restores_capacity() {
        let state = state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = CapacityService::new(state.clone());
        let before = load(&state, "hv1").await;

        let r = Reservation::new("hv1", 4, 8192, Some("vg0".to_string()), 50);
        let after = service.reserve(&r).await.unwrap();
        assert_eq!(after.free_cpu, 60);
        assert_eq!(after.free_memory, 57344);
        assert_eq!(after.pool("vg0").unwrap().free_cap, 950);

        service.release(&r).await.unwrap();
        assert_eq!(load(&state, "hv1").await, before);
    }

    #[tokio::test]
    async fn test_insufficient_capacity_leaves_record_untouched() {
        let state = state_with(vec![hv("hv1", 4, 4096)]).await;
        let service = CapacityService::new(state.clone());
        let before = load(&state, "hv1").await;

        for r in [
            Reservation::compute("hv1", 8, 1024),
            Reservation::compute("hv1", 1, 8192),
            Reservation::storage("hv1", "vg0", 5000),
        ] {
            let err = service.reserve(&r).await.unwrap_err();
            assert!(matches!(err, Error::InsufficientCapacity(_)), "{:?}", err);
        }
        assert_eq!(load(&state, "hv1").await, before);
    }

    #[tokio::test]
    async fn test_unknown_hypervisor_and_pool() {
        let state = state_with(vec![hv("hv1", 4, 4096)]).await;
        let service = CapacityService::new(state);
        let err = service.reserve(&Reservation::compute("nope", 1, 1)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = service
            .reserve(&Reservation::storage("hv1", "vg9", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_release_never_exceeds_totals() {
        let state = state_with(vec![hv("hv1", 4, 4096)]).await;
        let service = CapacityService::new(state.clone());
        let hv = service
            .release(&Reservation::new("hv1", 2, 1024, Some("vg0".to_string()), 10))
            .await
            .unwrap();
        assert_eq!(hv.free_cpu, 4);
        assert_eq!(hv.free_memory, 4096);
        assert_eq!(hv.pool("vg0").unwrap().free_cap, 1000);
        assert!(hv.capacity_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversubscribe() {
        let core = CoreConfig {
            cas_max_retries: 1000,
            ..CoreConfig::default()
        };
        let state = AppState::in_memory(core).unwrap();
        let record = hv("hv1", 10, 100_000);
        db::create_record(state.store().as_ref(), &keys::hypervisor("hv1"), &record)
            .await
            .unwrap();

        let handles = (0..20).map(|_| {
            let state = state.clone();
            tokio::spawn(async move {
                CapacityService::new(state)
                    .reserve(&Reservation::compute("hv1", 1, 1024))
                    .await
            })
        });
        let results = join_all(handles).await;
        let ok = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        assert_eq!(ok, 10);

        let after = load(&state, "hv1").await;
        assert_eq!(after.free_cpu, 0);
        assert_eq!(after.free_memory, 100_000 - 10 * 1024);
        assert!(after.capacity_consistent());
    }
}

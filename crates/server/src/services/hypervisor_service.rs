/// 宿主机管理服务

use chrono::Utc;
use common::keys;
use common::models::{Hypervisor, HypervisorStatus, VirtualMachine, Volume, VolumeStatus};
use common::{Error, Result};
use tracing::info;
use validator::Validate;

use crate::app_state::AppState;
use crate::db::models::hypervisor::{HypervisorStatsResponse, RegisterHypervisorDto};
use crate::db::{self, Update};

pub struct HypervisorService {
    state: AppState,
}

impl HypervisorService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 登记宿主机
    pub async fn register_hypervisor(&self, dto: RegisterHypervisorDto) -> Result<Hypervisor> {
        dto.validate()
            .map_err(|e| Error::InvalidArgument(format!("宿主机参数无效: {}", e)))?;
        if !common::utils::validate_ip_address(&dto.ip) {
            return Err(Error::InvalidArgument(format!("无效的 IP 地址: {}", dto.ip)));
        }

        let mut hv = dto.into_record();
        let mut pools: Vec<&str> = hv.storage_pools.iter().map(|p| p.vg_name.as_str()).collect();
        pools.sort_unstable();
        if pools.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::InvalidArgument(format!("宿主机 {} 存储池名称重复", hv.name)));
        }
        hv.registered_at = Some(Utc::now());

        db::create_record(self.state.store().as_ref(), &keys::hypervisor(&hv.name), &hv).await?;
        info!(
            "宿主机已登记: {} ({}:{}), cpu={}, memory={}MB, {} 个存储池",
            hv.name,
            hv.ip,
            hv.port,
            hv.cpu,
            hv.memory,
            hv.storage_pools.len()
        );
        Ok(hv)
    }

    pub async fn get_hypervisor(&self, name: &str) -> Result<Hypervisor> {
        db::require_record(self.state.store().as_ref(), &keys::hypervisor(name)).await
    }

    pub async fn list_hypervisors(&self) -> Result<Vec<Hypervisor>> {
        db::list_records(self.state.store().as_ref(), keys::HYPERVISOR_PREFIX).await
    }

    /// 健康上报：更新状态与心跳时间
    pub async fn set_status(&self, name: &str, status: HypervisorStatus) -> Result<Hypervisor> {
        let hv = db::update_record(
            self.state.store().as_ref(),
            &keys::hypervisor(name),
            self.state.core().cas_max_retries,
            |current: Option<Hypervisor>| {
                let mut hv = current.ok_or_else(|| Error::NotFound(format!("宿主机 {}", name)))?;
                hv.status = status;
                hv.last_heartbeat = Some(Utc::now());
                Ok(Update::Write(hv.clone(), hv))
            },
        )
        .await?;
        info!("宿主机 {} 状态: {}", name, status.as_str());
        Ok(hv)
    }

    /// 注销宿主机；仍有机器或存储卷引用时拒绝
    pub async fn unregister_hypervisor(&self, name: &str) -> Result<()> {
        let store = self.state.store();
        let machines: Vec<VirtualMachine> =
            db::list_records(store.as_ref(), keys::MACHINE_PREFIX).await?;
        if let Some(vm) = machines
            .iter()
            .find(|vm| !vm.status.is_terminal() && vm.hypervisor.as_deref() == Some(name))
        {
            return Err(Error::Conflict(format!("宿主机 {} 上还有机器 {}", name, vm.key)));
        }
        let volumes: Vec<Volume> = db::list_records(store.as_ref(), keys::VOLUME_PREFIX).await?;
        if let Some(volume) = volumes
            .iter()
            .find(|v| v.status == VolumeStatus::Active && v.hypervisor == name)
        {
            return Err(Error::Conflict(format!("宿主机 {} 上还有存储卷 {}", name, volume.key)));
        }

        if !store.delete(&keys::hypervisor(name)).await? {
            return Err(Error::NotFound(format!("宿主机 {}", name)));
        }
        info!("宿主机 {} 已注销", name);
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<HypervisorStatsResponse> {
        Ok(HypervisorStatsResponse::from_records(&self.list_hypervisors().await?))
    }
}

/// 存储卷与镜像模板服务

use chrono::Utc;
use common::keys;
use common::models::constants::VOLUME_KEY_PREFIX;
use common::models::{ImageTemplate, VirtualMachine, Volume, VolumeKind, VolumeStatus};
use common::{Error, Result};
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::db::models::volume::CreateVolumeDto;
use crate::db::{self, Update};

use super::capacity_service::{CapacityService, Reservation};
use super::scheduler::{PlacementRequest, SchedulerService};
use super::sequence_service::{counters, SequenceService};

pub struct StorageService {
    state: AppState,
}

impl StorageService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 创建独立存储卷：选池、预留、写记录
    pub async fn create_volume(&self, dto: CreateVolumeDto) -> Result<Volume> {
        let template = match dto.os_template.as_deref() {
            Some(name) => Some(self.get_template(name).await?),
            None => None,
        };
        if template.is_some() && dto.kind != VolumeKind::Os {
            return Err(Error::InvalidArgument("只有系统盘可以从镜像模板克隆".to_string()));
        }

        let placement = SchedulerService::new(self.state.clone())
            .place_volume(&PlacementRequest {
                storage_gb: dto.size_gb,
                backend: Some(dto.backend.unwrap_or_else(|| dto.volume_type.into())),
                pool_name: template.as_ref().map(|t| t.vg_name.clone()),
                ..Default::default()
            })
            .await?;
        let vg_name = placement
            .pool
            .ok_or_else(|| Error::Internal("存储卷放置结果缺少存储池".to_string()))?;

        let key = SequenceService::new(self.state.clone())
            .mint_key(VOLUME_KEY_PREFIX, counters::VOLUME)
            .await?;
        let reservation = Reservation::storage(placement.hypervisor.clone(), vg_name.clone(), dto.size_gb);
        let capacity = CapacityService::new(self.state.clone());
        capacity.reserve(&reservation).await?;

        let volume = Volume {
            schema_version: common::models::SCHEMA_VERSION,
            path: Some(Volume::device_path(dto.volume_type, &vg_name, &key)),
            lv_name: key.clone(),
            key,
            kind: dto.kind,
            volume_type: dto.volume_type,
            size_gb: dto.size_gb,
            hypervisor: placement.hypervisor,
            vg_name,
            persistent: dto.persistent,
            template: dto.template,
            clone_source: template.map(|t| t.clone_source()),
            attached_to: None,
            owns_capacity: true,
            status: VolumeStatus::Active,
            created_at: Utc::now(),
        };

        if let Err(e) = self.register_volume(&volume).await {
            if let Err(re) = capacity.release(&reservation).await {
                error!("存储卷 {} 写入失败后归还容量也失败: {}", volume.key, re);
            }
            return Err(e);
        }

        info!(
            "存储卷已创建: {} ({} GB) @ {}/{}",
            volume.key, volume.size_gb, volume.hypervisor, volume.vg_name
        );
        Ok(volume)
    }

    /// 写入卷记录（容量由调用方预留）
    pub async fn register_volume(&self, volume: &Volume) -> Result<()> {
        db::create_record(self.state.store().as_ref(), &keys::volume(&volume.key), volume).await
    }

    pub async fn get_volume(&self, key: &str) -> Result<Volume> {
        db::require_record(self.state.store().as_ref(), &keys::volume(key)).await
    }

    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        db::list_records(self.state.store().as_ref(), keys::VOLUME_PREFIX).await
    }

    /// 删除独立存储卷
    ///
    /// 转为 Deleted 的同时用 CAS 取走 `owns_capacity`，取到的一方负责归还；
    /// 归还失败时把标记放回，重试会再次归还。归还成功后才移除记录
    pub async fn delete_volume(&self, key: &str) -> Result<()> {
        let store = self.state.store();
        let record_key = keys::volume(key);
        let retries = self.state.core().cas_max_retries;

        let credit = db::update_record(store.as_ref(), &record_key, retries, |current: Option<Volume>| {
            let mut volume = current.ok_or_else(|| Error::NotFound(format!("存储卷 {}", key)))?;
            if let Some(owner) = &volume.attached_to {
                return Err(Error::Conflict(format!("存储卷 {} 仍挂载在 {} 上", key, owner)));
            }
            if volume.status == VolumeStatus::Deleted && !volume.owns_capacity {
                return Ok(Update::Keep(None));
            }
            volume.status = VolumeStatus::Deleted;
            let credit = volume
                .owns_capacity
                .then(|| Reservation::storage(volume.hypervisor.clone(), volume.vg_name.clone(), volume.size_gb));
            volume.owns_capacity = false;
            Ok(Update::Write(volume, credit))
        })
        .await?;

        if let Some(r) = credit {
            if let Err(e) = CapacityService::new(self.state.clone()).release(&r).await {
                self.return_credit(key).await;
                return Err(e);
            }
        }

        db::update_record(store.as_ref(), &record_key, retries, |current: Option<Volume>| {
            Ok(match current {
                Some(v) if v.status == VolumeStatus::Deleted && !v.owns_capacity => Update::Delete(()),
                _ => Update::Keep(()),
            })
        })
        .await?;

        info!("存储卷 {} 已删除", key);
        Ok(())
    }

    /// 归还失败后把容量归还权放回已删除的卷记录
    async fn return_credit(&self, key: &str) {
        let restored = db::update_record(
            self.state.store().as_ref(),
            &keys::volume(key),
            self.state.core().cas_max_retries,
            |current: Option<Volume>| {
                Ok(match current {
                    Some(mut v) if v.status == VolumeStatus::Deleted && !v.owns_capacity => {
                        v.owns_capacity = true;
                        Update::Write(v, true)
                    }
                    _ => Update::Keep(false),
                })
            },
        )
        .await;
        match restored {
            Ok(true) => warn!("存储卷 {} 容量归还失败，保留归还权等待重试", key),
            Ok(false) => error!("存储卷 {} 记录已变化，无法保留容量归还权", key),
            Err(e) => error!("存储卷 {} 容量归还失败且无法保留归还权: {}", key, e),
        }
    }

    /// 直接移除卷记录，不涉及容量；用于回滚刚写入的机器磁盘
    pub async fn remove_record(&self, key: &str) -> Result<()> {
        self.state.store().delete(&keys::volume(key)).await?;
        Ok(())
    }

    /// 机器销毁后处理其磁盘：持久卷解除挂载并独立持有容量，非持久卷移除
    pub async fn detach_from_machine(&self, vm: &VirtualMachine) -> Result<()> {
        let store = self.state.store();
        let retries = self.state.core().cas_max_retries;

        for attachment in &vm.storage {
            let key = keys::volume(&attachment.volume_key);
            if !attachment.persistent {
                self.remove_record(&attachment.volume_key).await?;
                continue;
            }
            let detached = db::update_record(store.as_ref(), &key, retries, |current: Option<Volume>| {
                Ok(match current {
                    Some(mut v) if v.attached_to.as_deref() == Some(vm.key.as_str()) => {
                        v.attached_to = None;
                        Update::Write(v, true)
                    }
                    _ => Update::Keep(false),
                })
            })
            .await?;
            if detached {
                info!("持久卷 {} 已从 {} 解除挂载", attachment.volume_key, vm.key);
            } else {
                warn!("持久卷 {} 不存在或未挂载在 {} 上", attachment.volume_key, vm.key);
            }
        }
        Ok(())
    }

    /// 登记镜像模板
    pub async fn register_template(&self, template: ImageTemplate) -> Result<ImageTemplate> {
        if template.os_variant.is_empty() || template.vg_name.is_empty() || template.lv_name.is_empty() {
            return Err(Error::InvalidArgument("镜像模板字段不能为空".to_string()));
        }
        db::create_record(
            self.state.store().as_ref(),
            &keys::template(&template.os_variant),
            &template,
        )
        .await?;
        info!("镜像模板已登记: {} -> {}", template.os_variant, template.clone_source());
        Ok(template)
    }

    pub async fn get_template(&self, os_variant: &str) -> Result<ImageTemplate> {
        db::require_record(self.state.store().as_ref(), &keys::template(os_variant)).await
    }

    pub async fn list_templates(&self) -> Result<Vec<ImageTemplate>> {
        db::list_records(self.state.store().as_ref(), keys::TEMPLATE_PREFIX).await
    }
}

/// 集群编排
///
/// 创建：按声明顺序逐个放置成员，每一步写入都记录撤销动作；
/// 任一步失败或请求被取消时逆序撤销，返回第一个错误。
/// 批量启停与销毁：逐个成员执行，失败只记录不中断。

use chrono::Utc;
use common::models::{
    Allocation, ClusterSpec, MachineKind, MemberSpec, NicSpec, StorageAttachment, VirtualMachine,
    VmStatus, Volume, VolumeKind, VolumeStatus,
};
use common::models::constants::VOLUME_KEY_PREFIX;
use common::utils::{generate_id, mac_from_uuid, validate_mac_address};
use common::{BatchReport, Error, MemberFailure, Result};
use std::collections::HashSet;
use tracing::{error, info, warn};
use validator::Validate;

use crate::app_state::AppState;

use super::capacity_service::{CapacityService, Reservation};
use super::context::OpContext;
use super::lifecycle::{self, Effect};
use super::network_service::NetworkService;
use super::scheduler::{PlacementRequest, SchedulerService};
use super::sequence_service::{counters, SequenceService};
use super::storage_service::StorageService;
use super::vm_service::VmService;

/// 已生效、需要在失败时撤销的写入
#[derive(Debug)]
enum Undo {
    DeleteVolume(String),
    DeleteMachine(String),
    Release(Reservation),
}

/// 批量生命周期操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    Start,
    Stop,
    Destroy,
}

impl BatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOp::Start => "start",
            BatchOp::Stop => "stop",
            BatchOp::Destroy => "destroy",
        }
    }
}

pub struct ClusterService {
    state: AppState,
}

impl ClusterService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 创建集群，全部成员进入 Provisioning 或全部回滚
    pub async fn create_cluster(&self, spec: ClusterSpec, ctx: &OpContext) -> Result<Vec<VirtualMachine>> {
        spec.validate()
            .map_err(|e| Error::InvalidArgument(format!("集群规格无效: {}", e)))?;
        let mut names = HashSet::new();
        if let Some(dup) = spec.members.iter().find(|m| !names.insert(m.name.as_str())) {
            return Err(Error::InvalidArgument(format!("成员名称重复: {}", dup.name)));
        }

        let vms = VmService::new(self.state.clone());
        if !vms.cluster_members(&spec.name).await?.is_empty() {
            return Err(Error::AlreadyExists(format!("集群 {}", spec.name)));
        }

        info!("开始创建集群 {}: {} 个成员", spec.name, spec.members.len());
        let mut undo = Vec::new();
        let mut created = Vec::with_capacity(spec.members.len());
        for member in &spec.members {
            match self.create_member(&spec.name, member, ctx, &mut undo).await {
                Ok(vm) => created.push(vm),
                Err(e) => {
                    warn!("集群 {} 成员 {} 创建失败，开始回滚: {}", spec.name, member.name, e);
                    self.rollback(undo).await;
                    return Err(e);
                }
            }
        }

        info!("集群 {} 创建完成", spec.name);
        Ok(created)
    }

    /// 向集群添加单台服务器，失败时同样回滚
    pub async fn create_server(
        &self,
        cluster: &str,
        member: MemberSpec,
        ctx: &OpContext,
    ) -> Result<VirtualMachine> {
        member
            .validate()
            .map_err(|e| Error::InvalidArgument(format!("服务器规格无效: {}", e)))?;
        let existing = VmService::new(self.state.clone()).cluster_members(cluster).await?;
        if existing.iter().any(|vm| vm.name == member.name) {
            return Err(Error::AlreadyExists(format!("集群 {} 中的 {}", cluster, member.name)));
        }

        let mut undo = Vec::new();
        match self.create_member(cluster, &member, ctx, &mut undo).await {
            Ok(vm) => Ok(vm),
            Err(e) => {
                warn!("服务器 {}/{} 创建失败，开始回滚: {}", cluster, member.name, e);
                self.rollback(undo).await;
                Err(e)
            }
        }
    }

    async fn create_member(
        &self,
        cluster: &str,
        member: &MemberSpec,
        ctx: &OpContext,
        undo: &mut Vec<Undo>,
    ) -> Result<VirtualMachine> {
        let sequences = SequenceService::new(self.state.clone());
        let storage = StorageService::new(self.state.clone());
        let vms = VmService::new(self.state.clone());

        let total_storage_gb = member.total_storage_gb()?;
        let transient_storage_gb = member.transient_storage_gb()?;

        ctx.check("allocate key")?;
        let counter = match member.kind {
            MachineKind::Vm => counters::VM,
            MachineKind::Server => counters::SERVER,
        };
        let key = sequences.mint_key(member.kind.key_prefix(), counter).await?;
        let uuid = generate_id();

        ctx.check("resolve template")?;
        let template = match member.os_template.as_deref() {
            Some(name) => Some(storage.get_template(name).await?),
            None => None,
        };

        ctx.check("resolve networks")?;
        let nics = self.resolve_nics(&member.nics, &uuid).await?;

        ctx.check("place")?;
        let placement = SchedulerService::new(self.state.clone())
            .place_vm(&PlacementRequest {
                cpu: member.cpu,
                memory_mb: member.memory_mb,
                storage_gb: total_storage_gb,
                backend: member.storage_backend,
                pool_name: template.as_ref().map(|t| t.vg_name.clone()),
            })
            .await?;

        ctx.check("console port")?;
        let port = sequences.next_console_port(&placement.hypervisor).await?;

        let mut attachments = Vec::with_capacity(member.disks.len());
        for (index, disk) in member.disks.iter().enumerate() {
            ctx.check("create volume")?;
            let vg_name = placement
                .pool
                .clone()
                .ok_or_else(|| Error::Internal(format!("机器 {} 有磁盘但放置结果缺少存储池", key)))?;
            let volume_key = sequences.mint_key(VOLUME_KEY_PREFIX, counters::VOLUME).await?;
            let clone_source = match (disk.kind, &template) {
                (VolumeKind::Os, Some(t)) => Some(t.clone_source()),
                _ => None,
            };
            let volume = Volume {
                schema_version: common::models::SCHEMA_VERSION,
                path: Some(Volume::device_path(disk.volume_type, &vg_name, &volume_key)),
                lv_name: volume_key.clone(),
                key: volume_key.clone(),
                kind: disk.kind,
                volume_type: disk.volume_type,
                size_gb: disk.size_gb,
                hypervisor: placement.hypervisor.clone(),
                vg_name,
                persistent: disk.persistent,
                template: false,
                clone_source,
                attached_to: Some(key.clone()),
                owns_capacity: disk.persistent,
                status: VolumeStatus::Active,
                created_at: Utc::now(),
            };
            storage.register_volume(&volume).await?;
            undo.push(Undo::DeleteVolume(volume_key.clone()));
            attachments.push(StorageAttachment {
                volume_key,
                device: device_name(index)?,
                kind: disk.kind,
                persistent: disk.persistent,
                size_gb: disk.size_gb,
            });
        }

        ctx.check("register machine")?;
        let vm = VirtualMachine {
            schema_version: common::models::SCHEMA_VERSION,
            key: key.clone(),
            name: member.name.clone(),
            cluster: cluster.to_string(),
            kind: member.kind,
            uuid,
            hypervisor: Some(placement.hypervisor.clone()),
            port: Some(port),
            allocation: Some(Allocation {
                hypervisor: placement.hypervisor.clone(),
                pool: placement.pool.clone(),
                cpu: member.cpu,
                memory_mb: member.memory_mb,
                storage_gb: transient_storage_gb,
                compute_held: false,
                storage_held: false,
            }),
            status: VmStatus::Registered,
            cpu: member.cpu,
            memory_mb: member.memory_mb,
            storage: attachments,
            nics,
            private_ip: member.private_ip.clone(),
            public_ip: member.public_ip.clone(),
            os_template: member.os_template.clone(),
            comment: member.comment.clone(),
            playbook: member.playbook.clone(),
            flagged: false,
            last_error: None,
            pending_credit: None,
            created_at: Utc::now(),
            started_at: None,
            updated_at: None,
        };
        vms.register(&vm).await?;
        undo.push(Undo::DeleteMachine(key.clone()));

        ctx.check("assign host")?;
        let reservation = lifecycle::debit_for(&vm, Effect::DebitAll)?;
        let vm = vms.assign_host(&key).await?;
        if let Some(r) = reservation {
            undo.push(Undo::Release(r));
        }

        info!(
            "成员 {}/{} -> {} @ {}:{}",
            cluster, member.name, key, placement.hypervisor, port
        );
        Ok(vm)
    }

    /// 校验网卡引用的网络并补全 MAC 地址
    async fn resolve_nics(&self, nics: &[NicSpec], uuid: &str) -> Result<Vec<NicSpec>> {
        let networks = NetworkService::new(self.state.clone());
        let mut resolved = Vec::with_capacity(nics.len());
        for (index, nic) in nics.iter().enumerate() {
            networks.get_network(&nic.network_id).await?;
            let mac_address = match &nic.mac_address {
                Some(mac) if !validate_mac_address(mac) => {
                    return Err(Error::InvalidArgument(format!("无效的 MAC 地址: {}", mac)));
                }
                Some(mac) => mac.clone(),
                None => mac_from_uuid(uuid, index),
            };
            resolved.push(NicSpec {
                network_id: nic.network_id.clone(),
                mac_address: Some(mac_address),
                ip_address: nic.ip_address.clone(),
            });
        }
        Ok(resolved)
    }

    /// 逆序撤销；撤销失败只记录日志，继续处理剩余步骤
    async fn rollback(&self, undo: Vec<Undo>) {
        self.state.metrics().rollback();
        let capacity = CapacityService::new(self.state.clone());
        let storage = StorageService::new(self.state.clone());
        let vms = VmService::new(self.state.clone());

        for step in undo.into_iter().rev() {
            let result = match &step {
                Undo::Release(r) => capacity.release(r).await.map(|_| ()),
                Undo::DeleteMachine(key) => vms.remove_record(key).await,
                Undo::DeleteVolume(key) => storage.remove_record(key).await,
            };
            match result {
                Ok(()) => info!("回滚: {:?}", step),
                Err(e) => error!("回滚步骤失败，需要人工处理: {:?}: {}", step, e),
            }
        }
    }

    pub async fn start_cluster(&self, name: &str, ctx: &OpContext) -> Result<BatchReport> {
        self.run_batch(name, BatchOp::Start, ctx).await
    }

    pub async fn stop_cluster(&self, name: &str, ctx: &OpContext) -> Result<BatchReport> {
        self.run_batch(name, BatchOp::Stop, ctx).await
    }

    pub async fn destroy_cluster(&self, name: &str, ctx: &OpContext) -> Result<BatchReport> {
        self.run_batch(name, BatchOp::Destroy, ctx).await
    }

    /// 逐个成员执行；有失败成员时返回 `PartialBatchFailure`
    async fn run_batch(&self, name: &str, op: BatchOp, ctx: &OpContext) -> Result<BatchReport> {
        let vms = VmService::new(self.state.clone());
        let members = vms.cluster_members(name).await?;
        if members.is_empty() {
            return Err(Error::NotFound(format!("集群 {}", name)));
        }

        info!("集群 {} 批量 {}: {} 个成员", name, op.as_str(), members.len());
        let mut report = BatchReport::default();
        for vm in members {
            if let Err(e) = ctx.check(op.as_str()) {
                report.failed.push(MemberFailure {
                    key: vm.key,
                    error: e.to_string(),
                });
                continue;
            }
            let result = match op {
                BatchOp::Start => vms.start(&vm.key).await,
                BatchOp::Stop => vms.stop(&vm.key).await,
                BatchOp::Destroy => vms.destroy(&vm.key).await,
            };
            match result {
                Ok(_) => report.succeeded.push(vm.key),
                Err(e) => {
                    warn!("集群 {} 成员 {} {} 失败: {}", name, vm.key, op.as_str(), e);
                    report.failed.push(MemberFailure {
                        key: vm.key,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !report.failed.is_empty() {
            self.state
                .metrics()
                .batch_failures(op.as_str(), report.failed.len());
        }
        info!(
            "集群 {} 批量 {} 完成: 成功 {}, 失败 {}",
            name,
            op.as_str(),
            report.succeeded.len(),
            report.failed.len()
        );
        report.into_result()
    }
}

/// 第 `index` 块磁盘的设备名：vda, vdb, ...
fn device_name(index: usize) -> Result<String> {
    let letter = u8::try_from(index)
        .ok()
        .filter(|i| *i < 26)
        .map(|i| (b'a' + i) as char)
        .ok_or_else(|| Error::InvalidArgument("单台机器最多 26 块磁盘".to_string()))?;
    Ok(format!("vd{}", letter))
}

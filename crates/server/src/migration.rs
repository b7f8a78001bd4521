/// 旧格式记录迁移
///
/// 存储中可能残留三种旧记录：
/// - 旧版宿主机：`node` 字段、数字状态、单个扁平卷组 (`vg`/`vgCap`/`freeCap`/`storageType`)
/// - `mactl` 虚拟机：camelCase 字段、数字状态、内嵌磁盘列表
/// - `mactl2` 服务器：`memoryMB`、`volumes`、`nics`、`template`、`ansiblePlaybook`、字符串状态
///
/// 转换函数都是纯函数；`run_migration` 负责扫描存储并用 CAS 写回。
/// 已带 `schema_version` 的记录视为规范格式，跳过。

use chrono::{DateTime, Utc};
use common::keys;
use common::models::{
    Allocation, BackendType, Hypervisor, HypervisorStatus, MachineKind, NicSpec, StorageAttachment,
    StoragePool, VirtualMachine, VmStatus, Volume, VolumeKind, VolumeStatus, VolumeType,
    SCHEMA_VERSION,
};
use common::{Error, MemberFailure, Result};
use common::utils::sum_storage_gb;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::{self, KvStore};

/// 旧版宿主机记录
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyHypervisor {
    pub node: String,
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    pub cpu: u32,
    pub memory: u64,
    #[serde(default)]
    pub free_cpu: Option<u32>,
    #[serde(default)]
    pub free_memory: Option<u64>,
    /// 0 = halted, 1 = error, 2 = running
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub vg: Option<String>,
    #[serde(default)]
    pub vg_cap: u64,
    #[serde(default)]
    pub free_cap: Option<u64>,
    #[serde(default)]
    pub storage_type: Option<String>,
}

/// `mactl` 内嵌磁盘
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDisk {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default, rename = "type")]
    pub disk_type: Option<String>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub vg: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// `mactl` 虚拟机记录
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMactlVm {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub hypervisor: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// 0..=6 依次为 registered, provisioning, running, stopped, deleting, deleted, error
    #[serde(default)]
    pub status: i64,
    pub cpu: u32,
    pub memory: u64,
    #[serde(default)]
    pub storage: Vec<LegacyDisk>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub os_template: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// `mactl2` 服务器卷
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyServerVolume {
    pub key: String,
    pub size: u64,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default, rename = "type")]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub vg: Option<String>,
    #[serde(default)]
    pub lv: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyNic {
    pub network: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// `mactl2` 服务器记录
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMactl2Server {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub hypervisor: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
    pub cpu: u32,
    #[serde(rename = "memoryMB")]
    pub memory_mb: u64,
    #[serde(default)]
    pub volumes: Vec<LegacyServerVolume>,
    #[serde(default)]
    pub nics: Vec<LegacyNic>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub ansible_playbook: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// 迁移后的机器及其拆分出的卷记录
#[derive(Debug, Clone, PartialEq)]
pub struct MigratedMachine {
    pub machine: VirtualMachine,
    pub volumes: Vec<Volume>,
}

fn hypervisor_status(code: i64) -> Result<HypervisorStatus> {
    match code {
        0 => Ok(HypervisorStatus::Halted),
        1 => Ok(HypervisorStatus::Error),
        2 => Ok(HypervisorStatus::Running),
        other => Err(Error::InvalidArgument(format!("未知的宿主机状态码: {}", other))),
    }
}

fn vm_status_code(code: i64) -> Result<VmStatus> {
    match code {
        0 => Ok(VmStatus::Registered),
        1 => Ok(VmStatus::Provisioning),
        2 => Ok(VmStatus::Running),
        3 => Ok(VmStatus::Stopped),
        4 => Ok(VmStatus::Deleting),
        5 => Ok(VmStatus::Deleted),
        6 => Ok(VmStatus::Error),
        other => Err(Error::InvalidArgument(format!("未知的机器状态码: {}", other))),
    }
}

fn vm_status_name(name: &str) -> Result<VmStatus> {
    serde_json::from_value(Value::String(name.to_ascii_lowercase()))
        .map_err(|_| Error::InvalidArgument(format!("未知的机器状态: {}", name)))
}

fn volume_kind(raw: Option<&str>) -> VolumeKind {
    match raw {
        Some(k) if k.eq_ignore_ascii_case("os") => VolumeKind::Os,
        _ => VolumeKind::Data,
    }
}

fn volume_type(raw: Option<&str>) -> VolumeType {
    match raw {
        Some(t) if t.eq_ignore_ascii_case("qcow2") => VolumeType::Qcow2,
        _ => VolumeType::Lvm,
    }
}

/// 旧版宿主机 -> 规范记录
pub fn migrate_hypervisor(legacy: LegacyHypervisor) -> Result<Hypervisor> {
    let backend = match legacy.storage_type.as_deref() {
        Some(t) => t.parse::<BackendType>()?,
        None => BackendType::Lvm,
    };
    let pools = match legacy.vg {
        Some(vg) if !vg.is_empty() => {
            let mut pool = StoragePool::new(vg, backend, legacy.vg_cap);
            pool.free_cap = legacy.free_cap.unwrap_or(legacy.vg_cap).min(legacy.vg_cap);
            vec![pool]
        }
        _ => vec![],
    };

    let mut hv = Hypervisor::new(legacy.node, legacy.ip, legacy.port, legacy.cpu, legacy.memory, pools);
    hv.free_cpu = legacy.free_cpu.unwrap_or(legacy.cpu).min(legacy.cpu);
    hv.free_memory = legacy.free_memory.unwrap_or(legacy.memory).min(legacy.memory);
    hv.status = hypervisor_status(legacy.status)?;
    Ok(hv)
}

/// 按状态推断旧记录持有的容量
fn allocation_for(
    status: VmStatus,
    hypervisor: &Option<String>,
    pool: Option<String>,
    cpu: u32,
    memory_mb: u64,
    transient_gb: u64,
) -> Option<Allocation> {
    let hypervisor = hypervisor.clone()?;
    let compute_held = matches!(
        status,
        VmStatus::Provisioning | VmStatus::Running | VmStatus::Deleting
    );
    let storage_held = transient_gb > 0
        && pool.is_some()
        && matches!(
            status,
            VmStatus::Provisioning | VmStatus::Running | VmStatus::Stopped | VmStatus::Deleting
        );
    Some(Allocation {
        hypervisor,
        pool,
        cpu,
        memory_mb,
        storage_gb: transient_gb,
        compute_held,
        storage_held,
    })
}

struct DiskParts<'a> {
    key: &'a str,
    size_gb: u64,
    kind: VolumeKind,
    volume_type: VolumeType,
    persistent: bool,
    vg: Option<&'a str>,
    lv: Option<&'a str>,
    path: Option<&'a str>,
}

fn split_disks(
    owner: &str,
    hypervisor: &Option<String>,
    created_at: DateTime<Utc>,
    disks: &[DiskParts<'_>],
) -> (Vec<StorageAttachment>, Vec<Volume>, Option<String>) {
    let mut attachments = Vec::with_capacity(disks.len());
    let mut volumes = Vec::new();
    let pool = disks.iter().find_map(|d| d.vg).map(str::to_string);

    for (index, d) in disks.iter().enumerate() {
        attachments.push(StorageAttachment {
            volume_key: d.key.to_string(),
            device: format!("vd{}", (b'a' + (index % 26) as u8) as char),
            kind: d.kind,
            persistent: d.persistent,
            size_gb: d.size_gb,
        });
        let (Some(hv), Some(vg)) = (hypervisor.as_deref(), d.vg) else {
            warn!("{} 的磁盘 {} 缺少位置信息，只保留挂载关系", owner, d.key);
            continue;
        };
        let lv = d.lv.unwrap_or(d.key);
        volumes.push(Volume {
            schema_version: SCHEMA_VERSION,
            key: d.key.to_string(),
            kind: d.kind,
            volume_type: d.volume_type,
            size_gb: d.size_gb,
            path: Some(
                d.path
                    .map(str::to_string)
                    .unwrap_or_else(|| Volume::device_path(d.volume_type, vg, lv)),
            ),
            hypervisor: hv.to_string(),
            vg_name: vg.to_string(),
            lv_name: lv.to_string(),
            persistent: d.persistent,
            template: false,
            clone_source: None,
            attached_to: Some(owner.to_string()),
            owns_capacity: d.persistent,
            status: VolumeStatus::Active,
            created_at,
        });
    }
    (attachments, volumes, pool)
}

/// `mactl` 虚拟机 -> 规范记录
pub fn migrate_mactl_vm(legacy: LegacyMactlVm) -> Result<MigratedMachine> {
    let status = vm_status_code(legacy.status)?;
    let created_at = legacy.created_at.unwrap_or_else(Utc::now);
    let disks: Vec<DiskParts<'_>> = legacy
        .storage
        .iter()
        .map(|d| DiskParts {
            key: &d.name,
            size_gb: d.size,
            kind: volume_kind(d.kind.as_deref()),
            volume_type: volume_type(d.disk_type.as_deref()),
            persistent: d.persistent,
            vg: d.vg.as_deref(),
            lv: None,
            path: d.path.as_deref(),
        })
        .collect();
    let transient_gb = sum_storage_gb(disks.iter().filter(|d| !d.persistent).map(|d| d.size_gb))?;
    let (storage, volumes, pool) = split_disks(&legacy.key, &legacy.hypervisor, created_at, &disks);

    let machine = VirtualMachine {
        schema_version: SCHEMA_VERSION,
        allocation: allocation_for(
            status,
            &legacy.hypervisor,
            pool,
            legacy.cpu,
            legacy.memory,
            transient_gb,
        ),
        key: legacy.key,
        name: legacy.name,
        cluster: legacy.cluster,
        kind: MachineKind::Vm,
        uuid: legacy.uuid,
        hypervisor: legacy.hypervisor,
        port: legacy.port,
        status,
        cpu: legacy.cpu,
        memory_mb: legacy.memory,
        storage,
        nics: vec![],
        private_ip: legacy.private_ip,
        public_ip: legacy.public_ip,
        os_template: legacy.os_template,
        comment: legacy.comment.unwrap_or_default(),
        playbook: None,
        flagged: status == VmStatus::Error,
        last_error: None,
        pending_credit: None,
        created_at,
        started_at: legacy.started_at,
        updated_at: None,
    };
    Ok(MigratedMachine { machine, volumes })
}

/// `mactl2` 服务器 -> 规范记录
pub fn migrate_mactl2_server(legacy: LegacyMactl2Server) -> Result<MigratedMachine> {
    let status = match legacy.status.as_deref() {
        Some(s) => vm_status_name(s)?,
        None => VmStatus::Registered,
    };
    let created_at = legacy.created_at.unwrap_or_else(Utc::now);
    let disks: Vec<DiskParts<'_>> = legacy
        .volumes
        .iter()
        .map(|v| DiskParts {
            key: &v.key,
            size_gb: v.size,
            kind: volume_kind(v.kind.as_deref()),
            volume_type: volume_type(v.volume_type.as_deref()),
            persistent: v.persistent,
            vg: v.vg.as_deref(),
            lv: v.lv.as_deref(),
            path: v.path.as_deref(),
        })
        .collect();
    let transient_gb = sum_storage_gb(disks.iter().filter(|d| !d.persistent).map(|d| d.size_gb))?;
    let (storage, volumes, pool) = split_disks(&legacy.key, &legacy.hypervisor, created_at, &disks);

    let machine = VirtualMachine {
        schema_version: SCHEMA_VERSION,
        allocation: allocation_for(
            status,
            &legacy.hypervisor,
            pool,
            legacy.cpu,
            legacy.memory_mb,
            transient_gb,
        ),
        key: legacy.key,
        name: legacy.name,
        cluster: legacy.cluster,
        kind: MachineKind::Server,
        uuid: legacy.uuid,
        hypervisor: legacy.hypervisor,
        port: legacy.port,
        status,
        cpu: legacy.cpu,
        memory_mb: legacy.memory_mb,
        storage,
        nics: legacy
            .nics
            .into_iter()
            .map(|n| NicSpec {
                network_id: n.network,
                mac_address: n.mac,
                ip_address: n.ip,
            })
            .collect(),
        private_ip: legacy.private_ip,
        public_ip: legacy.public_ip,
        os_template: legacy.template,
        comment: legacy.comment.unwrap_or_default(),
        playbook: legacy.ansible_playbook,
        flagged: status == VmStatus::Error,
        last_error: None,
        pending_credit: None,
        created_at,
        started_at: None,
        updated_at: None,
    };
    Ok(MigratedMachine { machine, volumes })
}

/// 一条记录的迁移结果
#[derive(Debug, Clone, PartialEq)]
pub enum Migrated {
    Hypervisor(Hypervisor),
    Machine(MigratedMachine),
}

/// 识别并转换一条记录；规范格式或未知前缀返回 `None`
pub fn migrate_record(key: &str, raw: &[u8]) -> Result<Option<Migrated>> {
    let value: Value = serde_json::from_slice(raw)?;
    if value.get("schema_version").is_some() {
        return Ok(None);
    }

    if key.starts_with(keys::HYPERVISOR_PREFIX) {
        let legacy: LegacyHypervisor = serde_json::from_value(value)?;
        return Ok(Some(Migrated::Hypervisor(migrate_hypervisor(legacy)?)));
    }
    if key.starts_with(keys::MACHINE_PREFIX) {
        let migrated = if value.get("memoryMB").is_some() {
            migrate_mactl2_server(serde_json::from_value(value)?)?
        } else {
            migrate_mactl_vm(serde_json::from_value(value)?)?
        };
        return Ok(Some(Migrated::Machine(migrated)));
    }
    Ok(None)
}

/// 迁移统计
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: Vec<String>,
    pub volumes_created: Vec<String>,
    pub failed: Vec<MemberFailure>,
}

/// 扫描宿主机与机器前缀并写回迁移结果
///
/// 每条记录以读到的原始字节作为 CAS 期望值，期间被并发修改的记录计为失败，
/// 重新运行即可。`dry_run` 只统计不写入。
pub async fn run_migration(store: &dyn KvStore, dry_run: bool) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for prefix in [keys::HYPERVISOR_PREFIX, keys::MACHINE_PREFIX] {
        for (key, raw) in store.list_prefix(prefix).await? {
            report.scanned += 1;
            let migrated = match migrate_record(&key, &raw) {
                Ok(Some(m)) => m,
                Ok(None) => {
                    debug!("跳过规范记录 {}", key);
                    continue;
                }
                Err(e) => {
                    warn!("记录 {} 无法迁移: {}", key, e);
                    report.failed.push(MemberFailure {
                        key,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if dry_run {
                info!("[dry-run] 将迁移 {}", key);
                report.migrated.push(key);
                continue;
            }

            match write_back(store, &key, &raw, migrated, &mut report.volumes_created).await {
                Ok(()) => {
                    info!("已迁移 {}", key);
                    report.migrated.push(key);
                }
                Err(e) => {
                    warn!("写回 {} 失败: {}", key, e);
                    report.failed.push(MemberFailure {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    info!(
        "迁移完成: 扫描 {}, 迁移 {}, 新建卷 {}, 失败 {}",
        report.scanned,
        report.migrated.len(),
        report.volumes_created.len(),
        report.failed.len()
    );
    Ok(report)
}

async fn write_back(
    store: &dyn KvStore,
    key: &str,
    raw: &[u8],
    migrated: Migrated,
    volumes_created: &mut Vec<String>,
) -> Result<()> {
    let encoded = match migrated {
        Migrated::Hypervisor(hv) => db::encode(&hv)?,
        Migrated::Machine(m) => {
            for volume in &m.volumes {
                match db::create_record(store, &keys::volume(&volume.key), volume).await {
                    Ok(()) => volumes_created.push(volume.key.clone()),
                    Err(Error::AlreadyExists(_)) => debug!("卷 {} 已存在", volume.key),
                    Err(e) => return Err(e),
                }
            }
            db::encode(&m.machine)?
        }
    };

    if store.compare_and_swap(key, Some(raw), Some(encoded)).await? {
        Ok(())
    } else {
        Err(Error::Contention(key.to_string()))
    }
}

/// 虚拟机 / 服务器数据模型
///
/// `mactl` 的虚拟机与 `mactl2` 的服务器合并为同一份记录，用 `kind` 区分

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{current_schema_version, MachineKind, Reservation, VmStatus, VolumeKind};

/// 机器在宿主机上持有的容量
///
/// `compute_held` / `storage_held` 记录哪些部分仍被扣减，
/// 只有拥有该笔容量的状态转换才会把对应标记清除并归还容量
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    pub hypervisor: String,
    #[serde(default)]
    pub pool: Option<String>,
    pub cpu: u32,
    pub memory_mb: u64,
    /// 非持久卷占用的存储 (GB)
    #[serde(default)]
    pub storage_gb: u64,
    #[serde(default)]
    pub compute_held: bool,
    #[serde(default)]
    pub storage_held: bool,
}

/// 挂载到机器上的存储卷（弱引用，只保存键）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageAttachment {
    pub volume_key: String,
    pub device: String,
    #[serde(default)]
    pub kind: VolumeKind,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub size_gb: u64,
}

/// 网卡规格
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NicSpec {
    pub network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// 虚拟机 / 服务器记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualMachine {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub key: String,
    pub name: String,
    pub cluster: String,
    #[serde(default)]
    pub kind: MachineKind,
    pub uuid: String,

    // 调度结果
    #[serde(default)]
    pub hypervisor: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub allocation: Option<Allocation>,

    #[serde(default)]
    pub status: VmStatus,

    // 配置信息
    pub cpu: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub storage: Vec<StorageAttachment>,
    #[serde(default)]
    pub nics: Vec<NicSpec>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub os_template: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub playbook: Option<String>,

    /// 进入 Error 状态后等待运维处理
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    /// 状态已提交但尚未归还给宿主机的容量，下一次操作前补还
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_credit: Option<Reservation>,

    // 时间戳
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl VirtualMachine {
    /// 持久卷的容量在机器销毁后转由存储卷自身持有
    pub fn persistent_volumes(&self) -> impl Iterator<Item = &StorageAttachment> {
        self.storage.iter().filter(|s| s.persistent)
    }

    pub fn transient_volumes(&self) -> impl Iterator<Item = &StorageAttachment> {
        self.storage.iter().filter(|s| !s.persistent)
    }

    pub fn holds_capacity(&self) -> bool {
        self.allocation
            .as_ref()
            .map(|a| a.compute_held || a.storage_held)
            .unwrap_or(false)
    }
}

/// 共享数据模型
///
/// 定义集群状态在键值存储中的规范记录结构（每种实体一份）

use serde::{Deserialize, Serialize};

pub mod hypervisor;
pub mod machine;
pub mod network;
pub mod request;
pub mod sequence;
pub mod volume;

pub use hypervisor::{Hypervisor, Reservation, StoragePool};
pub use machine::{Allocation, NicSpec, StorageAttachment, VirtualMachine};
pub use network::{DhcpRange, ForwardMode, NetworkMetadata, VirtualNetwork};
pub use request::{ClusterSpec, DiskSpec, MemberSpec};
pub use sequence::{ImageTemplate, SequenceCounter};
pub use volume::Volume;

/// 当前规范记录版本
///
/// 缺少 `schema_version` 字段的记录视为旧格式，由迁移工具转换
pub const SCHEMA_VERSION: u32 = 2;

pub(crate) fn current_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// 宿主机状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorStatus {
    #[default]
    Halted,
    Error,
    Running,
}

impl HypervisorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HypervisorStatus::Halted => "halted",
            HypervisorStatus::Error => "error",
            HypervisorStatus::Running => "running",
        }
    }
}

/// 虚拟机 / 服务器状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    #[default]
    Registered,
    Provisioning,
    Running,
    Stopped,
    Deleting,
    Deleted,
    Error,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Registered => "registered",
            VmStatus::Provisioning => "provisioning",
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
            VmStatus::Deleting => "deleting",
            VmStatus::Deleted => "deleted",
            VmStatus::Error => "error",
        }
    }

    /// 终态：不再接受任何生命周期事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, VmStatus::Deleted)
    }
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 机器类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MachineKind {
    #[default]
    Vm,
    Server,
}

impl MachineKind {
    /// 资源键前缀
    pub fn key_prefix(&self) -> &'static str {
        match self {
            MachineKind::Vm => "VM",
            MachineKind::Server => "SRV",
        }
    }
}

/// 存储池后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Lvm,
    Qcow2,
    Hdd,
    Ssd,
    Nvme,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Lvm => "lvm",
            BackendType::Qcow2 => "qcow2",
            BackendType::Hdd => "hdd",
            BackendType::Ssd => "ssd",
            BackendType::Nvme => "nvme",
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lvm" => Ok(BackendType::Lvm),
            "qcow2" => Ok(BackendType::Qcow2),
            "hdd" => Ok(BackendType::Hdd),
            "ssd" => Ok(BackendType::Ssd),
            "nvme" => Ok(BackendType::Nvme),
            other => Err(crate::Error::InvalidArgument(format!("未知的存储后端类型: {}", other))),
        }
    }
}

/// 存储卷用途
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    Os,
    #[default]
    Data,
}

/// 存储卷格式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    #[default]
    Lvm,
    Qcow2,
}

impl From<VolumeType> for BackendType {
    fn from(t: VolumeType) -> Self {
        match t {
            VolumeType::Lvm => BackendType::Lvm,
            VolumeType::Qcow2 => BackendType::Qcow2,
        }
    }
}

/// 存储卷状态：只有持有容量与已释放两种
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    #[default]
    Active,
    Deleted,
}

/// 常量定义
pub mod constants {
    /// 默认 Server 端口
    pub const DEFAULT_SERVER_PORT: u16 = 3000;

    /// 默认 CAS 重试上限
    pub const DEFAULT_CAS_MAX_RETRIES: u32 = 10;

    /// 默认控制台端口起始值
    pub const DEFAULT_CONSOLE_PORT_START: u64 = 5900;

    /// 资源键中序列号的最小位数
    pub const KEY_SEQUENCE_WIDTH: usize = 6;

    /// 存储卷键前缀
    pub const VOLUME_KEY_PREFIX: &str = "VOL";

    /// 网络 ID 前缀
    pub const NETWORK_KEY_PREFIX: &str = "NET";
}

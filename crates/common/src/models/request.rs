/// 集群创建请求

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{BackendType, MachineKind, NicSpec, VolumeKind, VolumeType};
use crate::errors::Result;
use crate::utils::sum_storage_gb;

/// 磁盘规格
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DiskSpec {
    #[serde(default)]
    pub kind: VolumeKind,
    #[serde(default)]
    pub volume_type: VolumeType,
    /// 单盘上限 1 PiB
    #[validate(range(min = 1, max = 1048576))]
    pub size_gb: u64,
    #[serde(default)]
    pub persistent: bool,
}

/// 集群成员（虚拟机或服务器）
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MemberSpec {
    #[validate(length(min = 1, max = 63))]
    pub name: String,
    #[serde(default)]
    pub kind: MachineKind,
    #[validate(range(min = 1))]
    pub cpu: u32,
    #[validate(range(min = 1))]
    pub memory_mb: u64,
    #[serde(default)]
    #[validate]
    pub disks: Vec<DiskSpec>,
    /// 限定存储池后端；为空时任何后端均可
    #[serde(default)]
    pub storage_backend: Option<BackendType>,
    #[serde(default)]
    pub os_template: Option<String>,
    #[serde(default)]
    pub nics: Vec<NicSpec>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub playbook: Option<String>,
}

impl MemberSpec {
    /// 机器需要在单个存储池上占用的总容量 (GB)
    pub fn total_storage_gb(&self) -> Result<u64> {
        sum_storage_gb(self.disks.iter().map(|d| d.size_gb))
    }

    /// 机器自身分配中持有的存储（持久卷除外的部分在销毁时归还）
    pub fn transient_storage_gb(&self) -> Result<u64> {
        sum_storage_gb(self.disks.iter().filter(|d| !d.persistent).map(|d| d.size_gb))
    }
}

/// 集群规格：成员按声明顺序放置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClusterSpec {
    #[validate(length(min = 1, max = 63))]
    pub name: String,
    #[validate(length(min = 1))]
    #[validate]
    pub members: Vec<MemberSpec>,
}

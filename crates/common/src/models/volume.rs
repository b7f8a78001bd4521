/// 存储卷数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{current_schema_version, BackendType, VolumeKind, VolumeStatus, VolumeType};

/// 存储卷模型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub key: String,
    #[serde(default)]
    pub kind: VolumeKind,
    #[serde(default)]
    pub volume_type: VolumeType,
    pub size_gb: u64,
    #[serde(default)]
    pub path: Option<String>,

    // 位置
    pub hypervisor: String,
    pub vg_name: String,
    pub lv_name: String,

    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub template: bool,
    /// 系统盘的克隆源 (vg/lv)
    #[serde(default)]
    pub clone_source: Option<String>,

    /// 挂载该卷的机器键
    #[serde(default)]
    pub attached_to: Option<String>,
    /// 为 true 时容量由卷自身持有；否则计入所属机器的分配
    #[serde(default)]
    pub owns_capacity: bool,

    #[serde(default)]
    pub status: VolumeStatus,
    pub created_at: DateTime<Utc>,
}

impl Volume {
    /// 宿主机上的设备路径
    pub fn device_path(volume_type: VolumeType, vg_name: &str, lv_name: &str) -> String {
        match volume_type {
            VolumeType::Lvm => format!("/dev/{}/{}", vg_name, lv_name),
            VolumeType::Qcow2 => format!("/var/lib/{}/{}.qcow2", vg_name, lv_name),
        }
    }

    pub fn backend(&self) -> BackendType {
        self.volume_type.into()
    }
}

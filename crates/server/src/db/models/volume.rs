/// 存储卷 DTO

use common::models::{BackendType, VolumeKind, VolumeType};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 创建独立存储卷 DTO
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateVolumeDto {
    #[serde(default)]
    pub kind: VolumeKind,
    #[serde(default)]
    pub volume_type: VolumeType,
    #[validate(range(min = 1, max = 1048576))]
    pub size_gb: u64,
    /// 限定存储池后端（hdd/ssd/nvme 等介质标签）；为空时与卷格式一致
    #[serde(default)]
    pub backend: Option<BackendType>,
    #[serde(default = "default_persistent")]
    pub persistent: bool,
    #[serde(default)]
    pub template: bool,
    /// 系统盘从该镜像模板克隆
    #[serde(default)]
    pub os_template: Option<String>,
}

fn default_persistent() -> bool {
    true
}

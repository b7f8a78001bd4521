/// 网络 DTO

use common::models::{DhcpRange, ForwardMode};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 创建网络 DTO
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateNetworkDto {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Linux 网桥名最长 15 个字符
    #[validate(length(min = 1, max = 15))]
    pub bridge: String,
    #[serde(default)]
    pub forward_mode: ForwardMode,
    #[serde(default)]
    pub dhcp: Option<DhcpRange>,
    #[serde(default)]
    pub nat: bool,
}

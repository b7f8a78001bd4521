/// 虚拟网络数据模型

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::current_schema_version;

/// 网络转发模式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    #[default]
    Nat,
    Route,
    Bridge,
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkMetadata {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// DHCP 地址段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DhcpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl DhcpRange {
    pub fn is_valid(&self) -> bool {
        u32::from(self.start) <= u32::from(self.end)
    }
}

/// 虚拟网络模型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualNetwork {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub id: String,
    pub metadata: NetworkMetadata,
    pub bridge: String,
    #[serde(default)]
    pub forward_mode: ForwardMode,
    #[serde(default)]
    pub dhcp: Option<DhcpRange>,
    #[serde(default)]
    pub nat: bool,
}

/// 虚拟机 / 服务器 DTO

use common::models::MemberSpec;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 创建单台服务器 DTO
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateServerDto {
    #[validate(length(min = 1, max = 63))]
    pub cluster: String,
    #[validate]
    pub member: MemberSpec,
}

/// 列表查询参数
#[derive(Debug, Default, Deserialize)]
pub struct ListMachinesQuery {
    pub cluster: Option<String>,
    pub hypervisor: Option<String>,
    pub status: Option<String>,
}

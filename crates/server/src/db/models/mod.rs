/// 请求 / 响应 DTO
///
/// 持久化记录的规范结构定义在 `common::models`，这里只放 API 边界上的形状

pub mod hypervisor;
pub mod network;
pub mod sequence;
pub mod vm;
pub mod volume;

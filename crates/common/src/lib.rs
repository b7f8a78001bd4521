/// Easy VM Cloud - 公共库
///
/// 提供集群核心、REST 服务与迁移工具共享的类型、错误处理、键布局与工具函数

pub mod errors;
pub mod keys;
pub mod models;
pub mod utils;

// 重新导出常用类型
pub use errors::{BatchReport, Error, MemberFailure, Result};

/// 序列计数器与镜像模板

use serde::{Deserialize, Serialize};

/// 命名序列计数器
///
/// `next` 是下一次要发放的值，发放后前进 `step`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceCounter {
    pub name: String,
    pub start: u64,
    pub step: u64,
    pub next: u64,
}

impl SequenceCounter {
    pub fn new(name: impl Into<String>, start: u64, step: u64) -> Self {
        Self {
            name: name.into(),
            start,
            step,
            next: start,
        }
    }
}

/// 系统镜像模板：操作系统变体 -> 克隆源 (卷组, 逻辑卷)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageTemplate {
    pub os_variant: String,
    pub vg_name: String,
    pub lv_name: String,
}

impl ImageTemplate {
    pub fn clone_source(&self) -> String {
        format!("{}/{}", self.vg_name, self.lv_name)
    }
}

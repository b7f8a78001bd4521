use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    #[error("存储后端不可用: {0}")]
    StoreUnavailable(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源已存在: {0}")]
    AlreadyExists(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 目标宿主机上剩余容量不足以完成预留
    #[error("容量不足: {0}")]
    InsufficientCapacity(String),

    /// 没有任何宿主机/存储池能同时满足 CPU、内存、存储需求
    #[error("没有可用容量: {0}")]
    NoCapacityAvailable(String),

    #[error("序列号生成冲突，重试耗尽: {0}")]
    SequenceContention(String),

    #[error("并发更新冲突，重试耗尽: {0}")]
    Contention(String),

    #[error("非法状态转换: 状态 {from} 不接受事件 {event}")]
    InvalidTransition { from: String, event: String },

    #[error("批量操作部分失败: {} 个成员失败", .0.failed.len())]
    PartialBatchFailure(BatchReport),

    /// 资源仍被引用，无法执行操作
    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("操作已取消: {0}")]
    Cancelled(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl Error {
    /// 是否为调用方可以整体重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::SequenceContention(_) | Error::Contention(_)
        )
    }
}

/// 批量生命周期操作中单个成员的结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberFailure {
    pub key: String,
    pub error: String,
}

/// 批量生命周期操作结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<MemberFailure>,
}

impl BatchReport {
    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.key.as_str()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// 有失败成员时转换为 `PartialBatchFailure`
    pub fn into_result(self) -> Result<BatchReport> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::PartialBatchFailure(self))
        }
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_report_into_result() {
        let ok = BatchReport {
            succeeded: vec!["VM-000001".to_string()],
            failed: vec![],
        };
        assert!(ok.into_result().is_ok());

        let partial = BatchReport {
            succeeded: vec!["VM-000001".to_string()],
            failed: vec![MemberFailure {
                key: "VM-000002".to_string(),
                error: "boom".to_string(),
            }],
        };
        match partial.into_result() {
            Err(Error::PartialBatchFailure(report)) => {
                assert_eq!(report.failed_keys(), vec!["VM-000002"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::StoreUnavailable("down".into()).is_transient());
        assert!(Error::SequenceContention("/seq/vm".into()).is_transient());
        assert!(!Error::NoCapacityAvailable("full".into()).is_transient());
    }
}

/// 请求级上下文：取消信号与截止时间
///
/// 协调器在每个步骤之间检查一次；步骤内部的存储调用不会被中途打断，
/// 这样撤销日志总能准确反映已经生效的写入。

use common::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// 不可取消、无截止时间
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 在进入 `step` 之前调用
    pub fn check(&self, step: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("请求已取消 ({})", step)));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Cancelled(format!("请求超过截止时间 ({})", step)));
            }
        }
        Ok(())
    }
}

/// 序列号生成服务
///
/// 每个命名计数器保存在 `/seq/<name>`，通过 CAS 前进，
/// 保证同一计数器发放的值严格递增且不会重复。

use common::keys;
use common::models::SequenceCounter;
use common::utils::format_key;
use common::{Error, Result};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::db::{self, Update};

/// 机器与资源键使用的计数器名
pub mod counters {
    pub const VM: &str = "vm";
    pub const SERVER: &str = "server";
    pub const VOLUME: &str = "volume";
    pub const NETWORK: &str = "network";
}

pub struct SequenceService {
    state: AppState,
}

impl SequenceService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 创建计数器，已存在时返回 `AlreadyExists`
    pub async fn create_sequence(&self, name: &str, start: u64, step: u64) -> Result<SequenceCounter> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("计数器名称不能为空".to_string()));
        }
        if step == 0 {
            return Err(Error::InvalidArgument("计数器步长必须大于 0".to_string()));
        }
        let counter = SequenceCounter::new(name, start, step);
        db::create_record(self.state.store().as_ref(), &keys::sequence(name), &counter).await?;
        info!("序列计数器 {} 已创建: start={}, step={}", name, start, step);
        Ok(counter)
    }

    /// 查看计数器当前状态
    pub async fn peek(&self, name: &str) -> Result<Option<SequenceCounter>> {
        db::get_record(self.state.store().as_ref(), &keys::sequence(name)).await
    }

    /// 取下一个值；计数器不存在时按配置的默认起始值与步长创建
    pub async fn next(&self, name: &str) -> Result<u64> {
        let core = self.state.core();
        self.next_seeded(name, core.sequence_start, core.sequence_step).await
    }

    /// 宿主机控制台端口
    pub async fn next_console_port(&self, hypervisor: &str) -> Result<u16> {
        let start = self.state.core().console_port_start;
        let value = self
            .next_seeded(&keys::console_port_counter(hypervisor), start, 1)
            .await?;
        u16::try_from(value)
            .map_err(|_| Error::Internal(format!("宿主机 {} 的控制台端口已耗尽", hypervisor)))
    }

    /// 生成资源键，例如 `VM-000042`
    pub async fn mint_key(&self, prefix: &str, counter: &str) -> Result<String> {
        Ok(format_key(prefix, self.next(counter).await?))
    }

    async fn next_seeded(&self, name: &str, start: u64, step: u64) -> Result<u64> {
        let key = keys::sequence(name);
        let store = self.state.store();
        let value = db::update_record(
            store.as_ref(),
            &key,
            self.state.core().cas_max_retries,
            |current: Option<SequenceCounter>| {
                let mut counter = current.unwrap_or_else(|| SequenceCounter::new(name, start, step));
                let value = counter.next;
                counter.next = value
                    .checked_add(counter.step)
                    .ok_or_else(|| Error::Internal(format!("序列计数器 {} 溢出", name)))?;
                Ok(Update::Write(counter, value))
            },
        )
        .await
        .map_err(|e| match e {
            Error::Contention(key) => Error::SequenceContention(key),
            other => other,
        })?;

        debug!("序列 {} 发放 {}", name, value);
        Ok(value)
    }
}

/// 测试用的故障注入存储
///
/// 包装 `MemoryStore`，可以让指定键的写操作返回 `StoreUnavailable`，
/// 让接下来的若干次 CAS 失败以模拟并发冲突，
/// 或者在某个键被写入若干次后触发取消以模拟客户端中途断开

use async_trait::async_trait;
use common::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::memory::MemoryStore;
use super::KvStore;

#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_keys: Arc<Mutex<HashSet<String>>>,
    lost_cas: Arc<Mutex<u32>>,
    cancel_on: Arc<Mutex<Option<CancelOnWrite>>>,
}

struct CancelOnWrite {
    key: String,
    remaining: u32,
    token: CancellationToken,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后对该键的所有写操作都失败
    pub async fn fail_writes_to(&self, key: &str) {
        self.failing_keys.lock().await.insert(key.to_string());
    }

    pub async fn heal(&self, key: &str) {
        self.failing_keys.lock().await.remove(key);
    }

    /// 接下来 `n` 次 CAS 直接返回 false
    pub async fn lose_next_cas(&self, n: u32) {
        *self.lost_cas.lock().await = n;
    }

    /// 对 `key` 的第 `n` 次成功写入之后取消 `token`
    pub async fn cancel_after_writes(&self, key: &str, n: u32, token: CancellationToken) {
        *self.cancel_on.lock().await = Some(CancelOnWrite {
            key: key.to_string(),
            remaining: n,
            token,
        });
    }

    async fn written(&self, key: &str) {
        let mut slot = self.cancel_on.lock().await;
        if let Some(hook) = slot.as_mut() {
            if hook.key == key {
                hook.remaining = hook.remaining.saturating_sub(1);
                if hook.remaining == 0 {
                    hook.token.cancel();
                    *slot = None;
                }
            }
        }
    }

    async fn check_writable(&self, key: &str) -> Result<()> {
        if self.failing_keys.lock().await.contains(key) {
            return Err(Error::StoreUnavailable(format!("injected failure on {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_writable(key).await?;
        self.inner.put(key, value).await?;
        self.written(key).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_writable(key).await?;
        let deleted = self.inner.delete(key).await?;
        self.written(key).await;
        Ok(deleted)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.inner.list_prefix(prefix).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool> {
        self.check_writable(key).await?;
        {
            let mut lost = self.lost_cas.lock().await;
            if *lost > 0 {
                *lost -= 1;
                return Ok(false);
            }
        }
        let swapped = self.inner.compare_and_swap(key, expected, new).await?;
        if swapped {
            self.written(key).await;
        }
        Ok(swapped)
    }
}

/// 数据访问层
///
/// 集群状态全部保存在线性一致的键值存储中。这里定义存储契约、
/// 类型化的记录读写辅助函数，以及唯一的乐观并发原语 `update_record`，
/// 序列号、容量、状态三类并发更新都经由它完成。

pub mod memory;
pub mod models;
#[cfg(feature = "redis")]
pub mod redis_store;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use common::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, StoreBackend};

/// 键值存储契约
///
/// 每次写操作对后续读立即可见；连接失败时返回 `StoreUnavailable`，
/// 调用方不能假设写入部分成功。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// 返回键是否存在并被删除
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 按键的字典序返回
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// `expected = None` 表示要求键不存在；`new = None` 表示匹配时删除
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool>;
}

pub type SharedStore = Arc<dyn KvStore>;

/// 建立存储连接
pub async fn establish_connection(config: &Config) -> anyhow::Result<SharedStore> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("使用内存存储，进程退出后集群状态将丢失");
            Ok(Arc::new(memory::MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("STORE_BACKEND=redis 需要设置 REDIS_URL"))?;
            info!("正在连接 Redis: {}", url);
            let store = redis_store::RedisStore::connect(url).await?;
            info!("Redis 连接成功");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(anyhow::anyhow!("当前构建未启用 redis 特性")),
    }
}

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

pub fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(raw)?)
}

/// 读取记录，不存在时返回 `None`
pub async fn get_record<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(decode(&raw)?)),
        None => Ok(None),
    }
}

/// 读取记录，不存在时返回 `NotFound`
pub async fn require_record<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<T> {
    get_record(store, key)
        .await?
        .ok_or_else(|| Error::NotFound(key.to_string()))
}

/// 列出前缀下的所有记录
pub async fn list_records<T: DeserializeOwned>(store: &dyn KvStore, prefix: &str) -> Result<Vec<T>> {
    store
        .list_prefix(prefix)
        .await?
        .iter()
        .map(|(_, raw)| decode(raw))
        .collect()
}

/// 创建新记录，键已存在时返回 `AlreadyExists`
pub async fn create_record<T: Serialize>(store: &dyn KvStore, key: &str, record: &T) -> Result<()> {
    if store.compare_and_swap(key, None, Some(encode(record)?)).await? {
        Ok(())
    } else {
        Err(Error::AlreadyExists(key.to_string()))
    }
}

/// `update_record` 闭包的决定
pub enum Update<T, R> {
    /// 写入新值并返回结果
    Write(T, R),
    /// 删除记录并返回结果
    Delete(R),
    /// 不修改，直接返回结果
    Keep(R),
}

/// 乐观并发更新：读取 -> 计算 -> CAS，冲突时重新读取重试
///
/// 闭包拿到的是当前值（不存在为 `None`），必须是纯计算；
/// 闭包返回错误时立即中止，不会写入任何内容。
/// 超过 `max_retries` 次冲突返回 `Contention`。
pub async fn update_record<T, R, F>(
    store: &dyn KvStore,
    key: &str,
    max_retries: u32,
    mut decide: F,
) -> Result<R>
where
    T: Serialize + DeserializeOwned + Send,
    R: Send,
    F: FnMut(Option<T>) -> Result<Update<T, R>> + Send,
{
    let attempts = max_retries.max(1);
    for attempt in 1..=attempts {
        let raw = store.get(key).await?;
        let current = match raw.as_deref() {
            Some(bytes) => Some(decode::<T>(bytes)?),
            None => None,
        };

        let swapped = match decide(current)? {
            Update::Keep(result) => return Ok(result),
            Update::Write(next, result) => {
                if store
                    .compare_and_swap(key, raw.as_deref(), Some(encode(&next)?))
                    .await?
                {
                    Some(result)
                } else {
                    None
                }
            }
            Update::Delete(result) => {
                if store.compare_and_swap(key, raw.as_deref(), None).await? {
                    Some(result)
                } else {
                    None
                }
            }
        };

        if let Some(result) = swapped {
            return Ok(result);
        }
        debug!("CAS 冲突: key={}, attempt={}/{}", key, attempt, attempts);
    }

    warn!("CAS 重试耗尽: key={}", key);
    Err(Error::Contention(key.to_string()))
}

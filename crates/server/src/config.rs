/// 配置管理

use common::models::constants::{
    DEFAULT_CAS_MAX_RETRIES, DEFAULT_CONSOLE_PORT_START, DEFAULT_SERVER_PORT,
};
use common::models::ImageTemplate;
use serde::Deserialize;
use std::time::Duration;

use crate::db::models::hypervisor::RegisterHypervisorDto;

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(anyhow::anyhow!("未知的存储后端: {}", other)),
        }
    }
}

/// 核心组件参数，构造服务时显式传入
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// CAS 冲突重试上限
    pub cas_max_retries: u32,
    /// 序列计数器不存在时的默认起始值与步长
    pub sequence_start: u64,
    pub sequence_step: u64,
    /// 每台宿主机控制台端口的起始值
    pub console_port_start: u64,
    /// 单个请求的截止时间
    pub request_deadline: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cas_max_retries: DEFAULT_CAS_MAX_RETRIES,
            sequence_start: 1,
            sequence_step: 1,
            console_port_start: DEFAULT_CONSOLE_PORT_START,
            request_deadline: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub redis_url: Option<String>,
    pub bootstrap_file: Option<String>,
    pub core: CoreConfig,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("环境变量 {} 无效: {}", name, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        let server_port = env_or("SERVER_PORT", DEFAULT_SERVER_PORT)?;

        let log_level = std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "debug".to_string());

        let store_backend = env_or("STORE_BACKEND", StoreBackend::Memory)?;
        let redis_url = std::env::var("REDIS_URL").ok();
        let bootstrap_file = std::env::var("BOOTSTRAP_FILE").ok();

        let defaults = CoreConfig::default();
        let sequence_step = env_or("SEQUENCE_STEP", defaults.sequence_step)?;
        if sequence_step == 0 {
            return Err(anyhow::anyhow!("SEQUENCE_STEP 必须大于 0"));
        }
        let core = CoreConfig {
            cas_max_retries: env_or("CAS_MAX_RETRIES", defaults.cas_max_retries)?,
            sequence_start: env_or("SEQUENCE_START", defaults.sequence_start)?,
            sequence_step,
            console_port_start: env_or("CONSOLE_PORT_START", defaults.console_port_start)?,
            request_deadline: Duration::from_secs(env_or(
                "REQUEST_DEADLINE_SECS",
                defaults.request_deadline.as_secs(),
            )?),
        };

        Ok(Self {
            server_port,
            log_level,
            store_backend,
            redis_url,
            bootstrap_file,
            core,
        })
    }
}

/// 序列计数器初始值
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceSeed {
    pub name: String,
    pub start: u64,
    #[serde(default = "default_step")]
    pub step: u64,
}

fn default_step() -> u64 {
    1
}

/// 启动时导入的集群清单
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootstrapInventory {
    #[serde(default)]
    pub hypervisors: Vec<RegisterHypervisorDto>,
    #[serde(default)]
    pub templates: Vec<ImageTemplate>,
    #[serde(default)]
    pub sequences: Vec<SequenceSeed>,
}

impl BootstrapInventory {
    /// 读取清单文件，格式由扩展名决定
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Json))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::BackendType;

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("Redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert!("etcd".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_bootstrap_inventory_from_json() {
        let raw = r#"{
            "hypervisors": [{
                "name": "hv1", "ip": "10.0.0.1", "port": 16509,
                "cpu": 64, "memory": 65536,
                "storage_pools": [{ "vg_name": "vg0", "backend": "lvm", "vg_cap": 2000 }]
            }],
            "templates": [{ "os_variant": "ubuntu22", "vg_name": "vg0", "lv_name": "tpl-ubuntu22" }],
            "sequences": [{ "name": "vm", "start": 100 }]
        }"#;
        let inventory = BootstrapInventory::from_json(raw).unwrap();
        assert_eq!(inventory.hypervisors.len(), 1);
        assert_eq!(inventory.hypervisors[0].storage_pools[0].backend, BackendType::Lvm);
        assert_eq!(inventory.templates[0].os_variant, "ubuntu22");
        assert_eq!(inventory.sequences[0].start, 100);
        assert_eq!(inventory.sequences[0].step, 1);
    }
}

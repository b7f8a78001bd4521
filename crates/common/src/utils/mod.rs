/// 工具函数集合

use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::models::constants::KEY_SEQUENCE_WIDTH;

/// 生成唯一 ID
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// 由类型前缀和序列值拼出资源键，例如 `VM-000042`
pub fn format_key(prefix: &str, seq: u64) -> String {
    format!("{}-{:0width$}", prefix, seq, width = KEY_SEQUENCE_WIDTH)
}

/// 累加磁盘容量 (GB)，溢出时返回 `InvalidArgument`
pub fn sum_storage_gb<I>(sizes: I) -> Result<u64>
where
    I: IntoIterator<Item = u64>,
{
    sizes.into_iter().try_fold(0u64, |total, size| {
        total
            .checked_add(size)
            .ok_or_else(|| Error::InvalidArgument("磁盘总容量超出范围".to_string()))
    })
}

/// 验证 MAC 地址格式
pub fn validate_mac_address(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return false;
    }

    parts.iter().all(|part| {
        part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// 验证 IP 地址格式
pub fn validate_ip_address(ip: &str) -> bool {
    ip.parse::<std::net::Ipv4Addr>().is_ok()
}

/// 由机器 UUID 派生稳定的 MAC 地址（52:54:00 为 QEMU 前缀）
pub fn mac_from_uuid(uuid: &str, nic_index: usize) -> String {
    let hex: Vec<u8> = uuid
        .bytes()
        .filter(|b| b.is_ascii_hexdigit())
        .collect();
    let byte = |i: usize| -> u8 {
        let hi = (hex.get(i * 2).copied().unwrap_or(b'0') as char).to_digit(16).unwrap_or(0);
        let lo = (hex.get(i * 2 + 1).copied().unwrap_or(b'0') as char).to_digit(16).unwrap_or(0);
        (hi * 16 + lo) as u8
    };
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        byte(0),
        byte(1),
        byte(2).wrapping_add(nic_index as u8)
    )
}

/// 键值存储中的键布局
///
/// 所有记录按资源类型加前缀，例如 `/hv/<name>`、`/vm/<key>`

pub const HYPERVISOR_PREFIX: &str = "/hv/";
pub const MACHINE_PREFIX: &str = "/vm/";
pub const VOLUME_PREFIX: &str = "/volume/";
pub const SEQUENCE_PREFIX: &str = "/seq/";
pub const NETWORK_PREFIX: &str = "/network/";
pub const TEMPLATE_PREFIX: &str = "/template/";

/// 所有已知前缀，迁移工具按此顺序扫描
pub const ALL_PREFIXES: &[&str] = &[
    HYPERVISOR_PREFIX,
    MACHINE_PREFIX,
    VOLUME_PREFIX,
    SEQUENCE_PREFIX,
    NETWORK_PREFIX,
    TEMPLATE_PREFIX,
];

pub fn hypervisor(name: &str) -> String {
    format!("{}{}", HYPERVISOR_PREFIX, name)
}

pub fn machine(key: &str) -> String {
    format!("{}{}", MACHINE_PREFIX, key)
}

pub fn volume(key: &str) -> String {
    format!("{}{}", VOLUME_PREFIX, key)
}

pub fn sequence(name: &str) -> String {
    format!("{}{}", SEQUENCE_PREFIX, name)
}

pub fn network(id: &str) -> String {
    format!("{}{}", NETWORK_PREFIX, id)
}

pub fn template(os_variant: &str) -> String {
    format!("{}{}", TEMPLATE_PREFIX, os_variant)
}

/// 每台宿主机的控制台端口计数器名
pub fn console_port_counter(hypervisor: &str) -> String {
    format!("port.{}", hypervisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(hypervisor("hv1"), "/hv/hv1");
        assert_eq!(machine("VM-000042"), "/vm/VM-000042");
        assert_eq!(volume("VOL-000001"), "/volume/VOL-000001");
        assert_eq!(sequence("vm"), "/seq/vm");
        assert_eq!(sequence(&console_port_counter("hv1")), "/seq/port.hv1");
    }
}

/// 虚拟网络管理服务

use common::keys;
use common::models::constants::NETWORK_KEY_PREFIX;
use common::models::{NetworkMetadata, VirtualMachine, VirtualNetwork};
use common::{Error, Result};
use tracing::info;
use validator::Validate;

use crate::app_state::AppState;
use crate::db::models::network::CreateNetworkDto;
use crate::db;

use super::sequence_service::{counters, SequenceService};

pub struct NetworkService {
    state: AppState,
}

impl NetworkService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 创建网络
    pub async fn create_network(&self, dto: CreateNetworkDto) -> Result<VirtualNetwork> {
        dto.validate()
            .map_err(|e| Error::InvalidArgument(format!("网络参数无效: {}", e)))?;
        if let Some(range) = &dto.dhcp {
            if !range.is_valid() {
                return Err(Error::InvalidArgument(format!(
                    "DHCP 地址段无效: {} > {}",
                    range.start, range.end
                )));
            }
        }

        let id = SequenceService::new(self.state.clone())
            .mint_key(NETWORK_KEY_PREFIX, counters::NETWORK)
            .await?;
        let network = VirtualNetwork {
            schema_version: common::models::SCHEMA_VERSION,
            id,
            metadata: NetworkMetadata {
                name: dto.name,
                comment: dto.comment,
            },
            bridge: dto.bridge,
            forward_mode: dto.forward_mode,
            dhcp: dto.dhcp,
            nat: dto.nat,
        };

        db::create_record(self.state.store().as_ref(), &keys::network(&network.id), &network).await?;
        info!(
            "网络已创建: {} ({}), bridge={}",
            network.id, network.metadata.name, network.bridge
        );
        Ok(network)
    }

    pub async fn get_network(&self, id: &str) -> Result<VirtualNetwork> {
        db::require_record(self.state.store().as_ref(), &keys::network(id)).await
    }

    pub async fn list_networks(&self) -> Result<Vec<VirtualNetwork>> {
        db::list_records(self.state.store().as_ref(), keys::NETWORK_PREFIX).await
    }

    /// 删除网络；仍被现存机器的网卡引用时拒绝
    pub async fn delete_network(&self, id: &str) -> Result<()> {
        let store = self.state.store();
        let machines: Vec<VirtualMachine> =
            db::list_records(store.as_ref(), keys::MACHINE_PREFIX).await?;
        if let Some(vm) = machines.iter().find(|vm| {
            !vm.status.is_terminal() && vm.nics.iter().any(|nic| nic.network_id == id)
        }) {
            return Err(Error::Conflict(format!("网络 {} 仍被机器 {} 使用", id, vm.key)));
        }

        if !store.delete(&keys::network(id)).await? {
            return Err(Error::NotFound(format!("网络 {}", id)));
        }
        info!("网络 {} 已删除", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::state_with;
    use common::models::{DhcpRange, ForwardMode};

    fn dto(name: &str) -> CreateNetworkDto {
        CreateNetworkDto {
            name: name.to_string(),
            comment: None,
            bridge: "virbr1".to_string(),
            forward_mode: ForwardMode::Nat,
            dhcp: Some(DhcpRange {
                start: "192.168.100.10".parse().unwrap(),
                end: "192.168.100.200".parse().unwrap(),
            }),
            nat: true,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let service = NetworkService::new(state_with(vec![]).await);
        let network = service.create_network(dto("default")).await.unwrap();
        assert_eq!(network.id, "NET-000001");
        assert_eq!(service.get_network(&network.id).await.unwrap(), network);
        assert_eq!(service.list_networks().await.unwrap().len(), 1);

        service.delete_network(&network.id).await.unwrap();
        assert!(matches!(
            service.delete_network(&network.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reversed_dhcp_range_rejected() {
        let service = NetworkService::new(state_with(vec![]).await);
        let mut bad = dto("default");
        bad.dhcp = Some(DhcpRange {
            start: "192.168.100.200".parse().unwrap(),
            end: "192.168.100.10".parse().unwrap(),
        });
        assert!(matches!(
            service.create_network(bad).await,
            Err(Error::InvalidArgument(_))
        ));

        let mut long_bridge = dto("default");
        long_bridge.bridge = "a-very-long-bridge-name".to_string();
        assert!(service.create_network(long_bridge).await.is_err());
    }
}

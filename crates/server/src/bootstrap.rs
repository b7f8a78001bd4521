/// 启动清单导入
///
/// 按顺序登记宿主机、镜像模板与序列计数器；已存在的记录跳过，
/// 因此同一份清单可以在每次启动时重复导入。

use common::{Error, Result};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::config::BootstrapInventory;
use crate::services::{HypervisorService, SequenceService, StorageService};

/// 导入结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapSummary {
    pub created: usize,
    pub skipped: usize,
}

impl BootstrapSummary {
    fn record(&mut self, kind: &str, name: &str, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                info!("已导入{}: {}", kind, name);
                self.created += 1;
                Ok(())
            }
            Err(Error::AlreadyExists(_)) => {
                warn!("{} {} 已存在，跳过", kind, name);
                self.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

pub async fn apply_inventory(state: &AppState, inventory: BootstrapInventory) -> Result<BootstrapSummary> {
    let mut summary = BootstrapSummary::default();

    let hypervisors = HypervisorService::new(state.clone());
    for dto in inventory.hypervisors {
        let name = dto.name.clone();
        let outcome = hypervisors.register_hypervisor(dto).await.map(|_| ());
        summary.record("宿主机", &name, outcome)?;
    }

    let storage = StorageService::new(state.clone());
    for template in inventory.templates {
        let name = template.os_variant.clone();
        let outcome = storage.register_template(template).await.map(|_| ());
        summary.record("镜像模板", &name, outcome)?;
    }

    let sequences = SequenceService::new(state.clone());
    for seed in inventory.sequences {
        let outcome = sequences
            .create_sequence(&seed.name, seed.start, seed.step)
            .await
            .map(|_| ());
        summary.record("序列计数器", &seed.name, outcome)?;
    }

    info!(
        "清单导入完成: 新建 {} 条, 跳过 {} 条",
        summary.created, summary.skipped
    );
    Ok(summary)
}

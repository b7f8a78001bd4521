/// 虚拟机 / 服务器管理服务
///
/// 所有状态变化都经过 `apply_event`：按转换表求值，先扣减后写状态，
/// 或先写状态后归还，保证容量只被归还一次。

use chrono::Utc;
use common::keys;
use common::models::{VirtualMachine, VmStatus};
use common::{Error, Result};
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::db::models::vm::ListMachinesQuery;
use crate::db::{self, Update};

use super::capacity_service::{CapacityService, Reservation};
use super::lifecycle::{self, Event};
use super::storage_service::StorageService;

pub struct VmService {
    state: AppState,
}

impl VmService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 写入新机器记录（Registered）
    pub async fn register(&self, vm: &VirtualMachine) -> Result<()> {
        db::create_record(self.state.store().as_ref(), &keys::machine(&vm.key), vm).await
    }

    /// 直接移除记录，用于回滚
    pub async fn remove_record(&self, key: &str) -> Result<()> {
        self.state.store().delete(&keys::machine(key)).await?;
        Ok(())
    }

    pub async fn get_machine(&self, key: &str) -> Result<VirtualMachine> {
        db::require_record(self.state.store().as_ref(), &keys::machine(key)).await
    }

    /// 列出机器，可按集群、宿主机、状态过滤
    pub async fn list_machines(&self, query: &ListMachinesQuery) -> Result<Vec<VirtualMachine>> {
        let all: Vec<VirtualMachine> =
            db::list_records(self.state.store().as_ref(), keys::MACHINE_PREFIX).await?;
        Ok(all
            .into_iter()
            .filter(|vm| query.cluster.as_deref().map_or(true, |c| vm.cluster == c))
            .filter(|vm| {
                query
                    .hypervisor
                    .as_deref()
                    .map_or(true, |h| vm.hypervisor.as_deref() == Some(h))
            })
            .filter(|vm| query.status.as_deref().map_or(true, |s| vm.status.as_str() == s))
            .collect())
    }

    /// 集群的现存成员（不含 Deleted），按键排序
    pub async fn cluster_members(&self, cluster: &str) -> Result<Vec<VirtualMachine>> {
        let query = ListMachinesQuery {
            cluster: Some(cluster.to_string()),
            ..Default::default()
        };
        let mut members: Vec<VirtualMachine> = self
            .list_machines(&query)
            .await?
            .into_iter()
            .filter(|vm| !vm.status.is_terminal())
            .collect();
        members.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(members)
    }

    /// 执行一次生命周期转换
    pub async fn apply_event(
        &self,
        key: &str,
        event: Event,
        detail: Option<String>,
    ) -> Result<VirtualMachine> {
        let store = self.state.store();
        let record_key = keys::machine(key);
        let capacity = CapacityService::new(self.state.clone());

        self.settle_pending_credit(key).await?;

        let snapshot: VirtualMachine = db::require_record(store.as_ref(), &record_key).await?;
        let from = snapshot.status;
        let planned = lifecycle::transition(from, event)?;

        let debit = lifecycle::debit_for(&snapshot, planned.effect)?;
        if let Some(r) = &debit {
            capacity.reserve(r).await?;
        }

        let committed = db::update_record(
            store.as_ref(),
            &record_key,
            self.state.core().cas_max_retries,
            |current: Option<VirtualMachine>| {
                let mut vm = current.ok_or_else(|| Error::NotFound(format!("机器 {}", key)))?;
                let t = lifecycle::transition(vm.status, event)?;
                if t != planned {
                    return Err(Error::InvalidTransition {
                        from: vm.status.to_string(),
                        event: event.to_string(),
                    });
                }
                let credit = lifecycle::commit(&mut vm, event, t, detail.clone(), Utc::now());
                Ok(Update::Write(vm.clone(), (vm, credit)))
            },
        )
        .await;

        let (vm, credit) = match committed {
            Ok(done) => done,
            Err(e) => {
                if let Some(r) = &debit {
                    if let Err(re) = capacity.release(r).await {
                        error!("机器 {} 状态写入失败后归还预留容量失败: {}", key, re);
                    }
                }
                return Err(e);
            }
        };

        if let Some(r) = credit {
            if let Err(e) = capacity.release(&r).await {
                error!(
                    "机器 {} 已转换到 {}，但归还容量失败: {:?}: {}",
                    key, vm.status, r, e
                );
                self.park_credit(key, r).await;
                return Err(e);
            }
        }

        self.state.metrics().transition(event.as_str());
        info!("机器 {} 状态转换: {} --{}--> {}", key, from, event, vm.status);

        if event == Event::TeardownConfirmed {
            return self.detach_storage(vm).await;
        }
        Ok(vm)
    }

    /// 调度完成，扣减容量并进入 Provisioning
    pub async fn assign_host(&self, key: &str) -> Result<VirtualMachine> {
        self.apply_event(key, Event::AssignHost, None).await
    }

    pub async fn report_ready(&self, key: &str) -> Result<VirtualMachine> {
        self.apply_event(key, Event::HostReady, None).await
    }

    pub async fn report_failure(&self, key: &str, reason: Option<String>) -> Result<VirtualMachine> {
        self.apply_event(key, Event::HostFailed, reason).await
    }

    pub async fn report_fault(&self, key: &str, reason: Option<String>) -> Result<VirtualMachine> {
        self.apply_event(key, Event::Fault, reason).await
    }

    pub async fn start(&self, key: &str) -> Result<VirtualMachine> {
        self.apply_event(key, Event::Start, None).await
    }

    pub async fn stop(&self, key: &str) -> Result<VirtualMachine> {
        self.apply_event(key, Event::Stop, None).await
    }

    pub async fn confirm_teardown(&self, key: &str) -> Result<VirtualMachine> {
        self.apply_event(key, Event::TeardownConfirmed, None).await
    }

    /// 销毁：Destroy 后立即确认清理；已处于 Deleting 的只做确认
    pub async fn destroy(&self, key: &str) -> Result<VirtualMachine> {
        let vm = self.get_machine(key).await?;
        if vm.status != VmStatus::Deleting {
            self.apply_event(key, Event::Destroy, None).await?;
        }
        self.confirm_teardown(key).await
    }

    /// 物理删除 Deleted / Error 状态的机器记录
    pub async fn purge_machine(&self, key: &str) -> Result<()> {
        self.settle_pending_credit(key).await?;
        let vm = self.get_machine(key).await?;
        if !matches!(vm.status, VmStatus::Deleted | VmStatus::Error) {
            return Err(Error::InvalidTransition {
                from: vm.status.to_string(),
                event: "purge".to_string(),
            });
        }
        if vm.holds_capacity() {
            warn!("机器 {} 仍标记持有容量，清除记录前请核对宿主机 {:?}", key, vm.hypervisor);
        }

        let vm = if vm.storage.is_empty() {
            vm
        } else {
            self.detach_storage(vm).await?
        };

        db::update_record(
            self.state.store().as_ref(),
            &keys::machine(key),
            self.state.core().cas_max_retries,
            |current: Option<VirtualMachine>| match current {
                None => Ok(Update::Keep(())),
                Some(current) if current.status == vm.status => Ok(Update::Delete(())),
                Some(current) => Err(Error::InvalidTransition {
                    from: current.status.to_string(),
                    event: "purge".to_string(),
                }),
            },
        )
        .await?;

        info!("机器 {} 记录已清除", key);
        Ok(())
    }

    /// 补还上一次转换遗留的容量
    ///
    /// 先用 CAS 取走记录上的 `pending_credit`，取到的一方负责归还；
    /// 归还失败时放回记录，留给下一次操作
    pub async fn settle_pending_credit(&self, key: &str) -> Result<()> {
        let store = self.state.store();
        let claimed = db::update_record(
            store.as_ref(),
            &keys::machine(key),
            self.state.core().cas_max_retries,
            |current: Option<VirtualMachine>| {
                Ok(match current {
                    Some(mut vm) => match vm.pending_credit.take() {
                        Some(r) => Update::Write(vm, Some(r)),
                        None => Update::Keep(None),
                    },
                    None => Update::Keep(None),
                })
            },
        )
        .await?;

        let Some(r) = claimed else {
            return Ok(());
        };
        match CapacityService::new(self.state.clone()).release(&r).await {
            Ok(_) => {
                info!("机器 {} 遗留容量已补还: {:?}", key, r);
                Ok(())
            }
            Err(e) => {
                self.park_credit(key, r).await;
                Err(e)
            }
        }
    }

    /// 把没能归还的容量记在机器记录上
    async fn park_credit(&self, key: &str, r: Reservation) {
        let parked = db::update_record(
            self.state.store().as_ref(),
            &keys::machine(key),
            self.state.core().cas_max_retries,
            |current: Option<VirtualMachine>| {
                Ok(match current {
                    Some(mut vm) if vm.pending_credit.is_none() => {
                        vm.pending_credit = Some(r.clone());
                        Update::Write(vm, true)
                    }
                    _ => Update::Keep(false),
                })
            },
        )
        .await;
        match parked {
            Ok(true) => warn!("机器 {} 的未归还容量已记录，等待下一次操作补还: {:?}", key, r),
            Ok(false) => error!("机器 {} 记录不存在或已有未归还容量，无法记录 {:?}", key, r),
            Err(e) => error!("机器 {} 的未归还容量 {:?} 记录失败: {}", key, r, e),
        }
    }

    /// 解除磁盘挂载并清空机器上的存储列表
    async fn detach_storage(&self, vm: VirtualMachine) -> Result<VirtualMachine> {
        if vm.storage.is_empty() {
            return Ok(vm);
        }
        StorageService::new(self.state.clone())
            .detach_from_machine(&vm)
            .await?;

        db::update_record(
            self.state.store().as_ref(),
            &keys::machine(&vm.key),
            self.state.core().cas_max_retries,
            |current: Option<VirtualMachine>| {
                let mut current =
                    current.ok_or_else(|| Error::NotFound(format!("机器 {}", vm.key)))?;
                current.storage.clear();
                Ok(Update::Write(current.clone(), current))
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{flaky_state_with, hv, load_hv, state_with};
    use common::models::{
        Allocation, MachineKind, StorageAttachment, Volume, VolumeKind, VolumeStatus, VolumeType,
    };

    fn machine(key: &str, cluster: &str) -> VirtualMachine {
        VirtualMachine {
            schema_version: common::models::SCHEMA_VERSION,
            key: key.to_string(),
            name: format!("{}-node", cluster),
            cluster: cluster.to_string(),
            kind: MachineKind::Vm,
            uuid: uuid::Uuid::new_v4().to_string(),
            hypervisor: Some("hv1".to_string()),
            port: Some(5900),
            allocation: Some(Allocation {
                hypervisor: "hv1".to_string(),
                pool: None,
                cpu: 4,
                memory_mb: 8192,
                storage_gb: 0,
                compute_held: false,
                storage_held: false,
            }),
            status: VmStatus::Registered,
            cpu: 4,
            memory_mb: 8192,
            storage: vec![],
            nics: vec![],
            private_ip: None,
            public_ip: None,
            os_template: None,
            comment: String::new(),
            playbook: None,
            flagged: false,
            last_error: None,
            pending_credit: None,
            created_at: Utc::now(),
            started_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_accounting() {
        let state = state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = VmService::new(state.clone());
        service.register(&machine("VM-000001", "web")).await.unwrap();

        service.assign_host("VM-000001").await.unwrap();
        assert_eq!(load_hv(&state, "hv1").await.free_memory, 57344);

        service.report_ready("VM-000001").await.unwrap();
        let vm = service.stop("VM-000001").await.unwrap();
        assert_eq!(vm.status, VmStatus::Stopped);
        assert_eq!(load_hv(&state, "hv1").await.free_memory, 65536);

        service.start("VM-000001").await.unwrap();
        assert_eq!(load_hv(&state, "hv1").await.free_cpu, 60);

        let vm = service.destroy("VM-000001").await.unwrap();
        assert_eq!(vm.status, VmStatus::Deleted);
        let host = load_hv(&state, "hv1").await;
        assert_eq!((host.free_cpu, host.free_memory), (64, 65536));
        assert_eq!(state.metrics().transitions_for("teardown_confirmed"), 1);
    }

    #[tokio::test]
    async fn test_invalid_transition_changes_nothing() {
        let state = state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = VmService::new(state.clone());
        service.register(&machine("VM-000001", "web")).await.unwrap();

        let err = service.stop("VM-000001").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        let vm = service.get_machine("VM-000001").await.unwrap();
        assert_eq!(vm.status, VmStatus::Registered);
        assert_eq!(load_hv(&state, "hv1").await.free_cpu, 64);
    }

    #[tokio::test]
    async fn test_assign_without_capacity_leaves_registered() {
        let state = state_with(vec![hv("hv1", 2, 65536)]).await;
        let service = VmService::new(state.clone());
        service.register(&machine("VM-000001", "web")).await.unwrap();

        let err = service.assign_host("VM-000001").await.unwrap_err();
        assert!(matches!(err, Error::InsufficientCapacity(_)));
        assert_eq!(
            service.get_machine("VM-000001").await.unwrap().status,
            VmStatus::Registered
        );
    }

    #[tokio::test]
    async fn test_failure_report_releases_once() {
        let state = state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = VmService::new(state.clone());
        service.register(&machine("VM-000001", "web")).await.unwrap();
        service.assign_host("VM-000001").await.unwrap();

        let vm = service
            .report_failure("VM-000001", Some("image missing".to_string()))
            .await
            .unwrap();
        assert_eq!(vm.status, VmStatus::Error);
        assert!(vm.flagged);
        assert_eq!(load_hv(&state, "hv1").await.free_memory, 65536);

        // Error 上再次报告故障被拒绝，不会重复归还
        assert!(service.report_fault("VM-000001", None).await.is_err());
        assert_eq!(load_hv(&state, "hv1").await.free_memory, 65536);

        service.purge_machine("VM-000001").await.unwrap();
        assert!(matches!(
            service.get_machine("VM-000001").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unreleased_credit_is_settled_by_next_operation() {
        let (state, store) = flaky_state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = VmService::new(state.clone());
        service.register(&machine("VM-000001", "web")).await.unwrap();
        service.assign_host("VM-000001").await.unwrap();
        service.report_ready("VM-000001").await.unwrap();

        store.fail_writes_to(&keys::hypervisor("hv1")).await;
        let err = service.stop("VM-000001").await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        let vm = service.get_machine("VM-000001").await.unwrap();
        assert_eq!(vm.status, VmStatus::Stopped);
        assert_eq!(
            vm.pending_credit,
            Some(Reservation::compute("hv1", 4, 8192))
        );

        // 存储恢复前的操作不会越过未归还的容量
        assert!(service.start("VM-000001").await.is_err());
        assert_eq!(
            service.get_machine("VM-000001").await.unwrap().status,
            VmStatus::Stopped
        );

        store.heal(&keys::hypervisor("hv1")).await;
        let vm = service.start("VM-000001").await.unwrap();
        assert_eq!(vm.status, VmStatus::Running);
        assert!(vm.pending_credit.is_none());
        let host = load_hv(&state, "hv1").await;
        assert_eq!((host.free_cpu, host.free_memory), (60, 57344));
    }

    #[tokio::test]
    async fn test_purge_settles_unreleased_credit() {
        let (state, store) = flaky_state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = VmService::new(state.clone());
        service.register(&machine("VM-000001", "web")).await.unwrap();
        service.assign_host("VM-000001").await.unwrap();

        store.fail_writes_to(&keys::hypervisor("hv1")).await;
        assert!(service.report_failure("VM-000001", None).await.is_err());
        store.heal(&keys::hypervisor("hv1")).await;

        service.purge_machine("VM-000001").await.unwrap();
        let host = load_hv(&state, "hv1").await;
        assert_eq!((host.free_cpu, host.free_memory), (64, 65536));
    }

    #[tokio::test]
    async fn test_purge_requires_deleted_or_error() {
        let state = state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = VmService::new(state);
        service.register(&machine("VM-000001", "web")).await.unwrap();
        let err = service.purge_machine("VM-000001").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_teardown_detaches_persistent_and_removes_transient() {
        let state = state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = VmService::new(state.clone());
        let storage = StorageService::new(state.clone());

        let mut vm = machine("VM-000001", "db");
        if let Some(alloc) = vm.allocation.as_mut() {
            alloc.pool = Some("vg0".to_string());
            alloc.storage_gb = 20;
        }
        for (key, persistent, size) in [("VOL-000001", false, 20), ("VOL-000002", true, 100)] {
            vm.storage.push(StorageAttachment {
                volume_key: key.to_string(),
                device: String::new(),
                kind: VolumeKind::Data,
                persistent,
                size_gb: size,
            });
            storage
                .register_volume(&Volume {
                    schema_version: common::models::SCHEMA_VERSION,
                    key: key.to_string(),
                    kind: VolumeKind::Data,
                    volume_type: VolumeType::Lvm,
                    size_gb: size,
                    path: None,
                    hypervisor: "hv1".to_string(),
                    vg_name: "vg0".to_string(),
                    lv_name: key.to_string(),
                    persistent,
                    template: false,
                    clone_source: None,
                    attached_to: Some("VM-000001".to_string()),
                    owns_capacity: persistent,
                    status: VolumeStatus::Active,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        service.register(&vm).await.unwrap();
        service.assign_host("VM-000001").await.unwrap();
        assert_eq!(load_hv(&state, "hv1").await.pool("vg0").unwrap().free_cap, 880);

        service.report_ready("VM-000001").await.unwrap();
        let vm = service.destroy("VM-000001").await.unwrap();
        assert!(vm.storage.is_empty());

        // 持久卷保留容量，非持久卷归还
        assert_eq!(load_hv(&state, "hv1").await.pool("vg0").unwrap().free_cap, 900);
        assert!(matches!(storage.get_volume("VOL-000001").await, Err(Error::NotFound(_))));
        let kept = storage.get_volume("VOL-000002").await.unwrap();
        assert_eq!(kept.attached_to, None);

        storage.delete_volume("VOL-000002").await.unwrap();
        assert_eq!(load_hv(&state, "hv1").await.pool("vg0").unwrap().free_cap, 1000);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let state = state_with(vec![hv("hv1", 64, 65536)]).await;
        let service = VmService::new(state);
        service.register(&machine("VM-000001", "web")).await.unwrap();
        service.register(&machine("VM-000002", "db")).await.unwrap();
        service.assign_host("VM-000002").await.unwrap();

        let web = service.cluster_members("web").await.unwrap();
        assert_eq!(web.len(), 1);
        let provisioning = service
            .list_machines(&ListMachinesQuery {
                status: Some("provisioning".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(provisioning[0].key, "VM-000002");
    }
}

//! 服务层测试共用的构造函数

use common::keys;
use common::models::{
    BackendType, DiskSpec, Hypervisor, HypervisorStatus, MachineKind, MemberSpec, StoragePool,
    VolumeKind, VolumeType,
};
use std::sync::Arc;

use crate::app_state::AppState;
use crate::config::CoreConfig;
use crate::db::{self, testing::FlakyStore};
use crate::metrics::Metrics;

/// running 状态、带一个 1000 GB lvm 存储池 `vg0` 的宿主机
pub fn hv(name: &str, cpu: u32, memory: u64) -> Hypervisor {
    let mut hv = Hypervisor::new(
        name,
        "10.0.0.1",
        16509,
        cpu,
        memory,
        vec![StoragePool::new("vg0", BackendType::Lvm, 1000)],
    );
    hv.status = HypervisorStatus::Running;
    hv
}

async fn seed(state: &AppState, hvs: Vec<Hypervisor>) {
    for hv in hvs {
        db::create_record(state.store().as_ref(), &keys::hypervisor(&hv.name), &hv)
            .await
            .unwrap();
    }
}

pub async fn state_with(hvs: Vec<Hypervisor>) -> AppState {
    let state = AppState::in_memory(CoreConfig::default()).unwrap();
    seed(&state, hvs).await;
    state
}

/// 基于故障注入存储的状态
pub async fn flaky_state_with(hvs: Vec<Hypervisor>) -> (AppState, FlakyStore) {
    let store = FlakyStore::new();
    let state = AppState::new(
        Arc::new(store.clone()),
        CoreConfig::default(),
        Metrics::new().unwrap(),
    );
    seed(&state, hvs).await;
    (state, store)
}

pub async fn load_hv(state: &AppState, name: &str) -> Hypervisor {
    db::require_record(state.store().as_ref(), &keys::hypervisor(name))
        .await
        .unwrap()
}

/// 无磁盘的虚拟机成员
pub fn member(name: &str, cpu: u32, memory_mb: u64) -> MemberSpec {
    MemberSpec {
        name: name.to_string(),
        kind: MachineKind::Vm,
        cpu,
        memory_mb,
        disks: vec![],
        storage_backend: None,
        os_template: None,
        nics: vec![],
        private_ip: None,
        public_ip: None,
        comment: String::new(),
        playbook: None,
    }
}

pub fn disk(kind: VolumeKind, size_gb: u64, persistent: bool) -> DiskSpec {
    DiskSpec {
        kind,
        volume_type: VolumeType::Lvm,
        size_gb,
        persistent,
    }
}

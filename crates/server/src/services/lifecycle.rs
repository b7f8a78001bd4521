/// 机器生命周期状态机
///
/// 转换表是纯函数，`VmService` 在 CAS 闭包中按当前记录重新求值，
/// 保证副作用（容量扣减 / 归还）只由赢得 CAS 的一方执行一次。

use chrono::{DateTime, Utc};
use common::models::{VirtualMachine, VmStatus};
use common::{Error, Result};
use common::utils::sum_storage_gb;
use serde::{Deserialize, Serialize};

use super::capacity_service::Reservation;

/// 生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// 调度器分配宿主机
    AssignHost,
    /// 宿主机报告创建完成
    HostReady,
    /// 宿主机报告创建失败
    HostFailed,
    Stop,
    Start,
    Destroy,
    /// 宿主机确认资源已清理
    TeardownConfirmed,
    /// 不可恢复的故障
    Fault,
}

impl Event {
    pub const ALL: [Event; 8] = [
        Event::AssignHost,
        Event::HostReady,
        Event::HostFailed,
        Event::Stop,
        Event::Start,
        Event::Destroy,
        Event::TeardownConfirmed,
        Event::Fault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Event::AssignHost => "assign_host",
            Event::HostReady => "host_ready",
            Event::HostFailed => "host_failed",
            Event::Stop => "stop",
            Event::Start => "start",
            Event::Destroy => "destroy",
            Event::TeardownConfirmed => "teardown_confirmed",
            Event::Fault => "fault",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转换附带的容量副作用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// 扣减 CPU / 内存 / 全部磁盘
    DebitAll,
    /// 重新扣减 CPU / 内存
    DebitCompute,
    /// 归还 CPU / 内存，保留磁盘
    CreditCompute,
    /// 归还机器仍持有的全部容量
    ReleaseHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: VmStatus,
    pub effect: Effect,
}

/// 转换表；表中没有的组合返回 `InvalidTransition`
pub fn transition(from: VmStatus, event: Event) -> Result<Transition> {
    use Effect as E;
    use VmStatus as S;

    let (to, effect) = match (from, event) {
        (S::Registered, Event::AssignHost) => (S::Provisioning, E::DebitAll),
        (S::Provisioning, Event::HostReady) => (S::Running, E::None),
        (S::Provisioning, Event::HostFailed) => (S::Error, E::ReleaseHeld),
        (S::Running, Event::Stop) => (S::Stopped, E::CreditCompute),
        (S::Stopped, Event::Start) => (S::Running, E::DebitCompute),
        (S::Running | S::Stopped, Event::Destroy) => (S::Deleting, E::None),
        (S::Deleting, Event::TeardownConfirmed) => (S::Deleted, E::ReleaseHeld),
        (
            S::Registered | S::Provisioning | S::Running | S::Stopped | S::Deleting,
            Event::Fault,
        ) => (S::Error, E::ReleaseHeld),
        _ => {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                event: event.to_string(),
            })
        }
    };
    Ok(Transition { to, effect })
}

/// 扣减类转换需要预留的容量
///
/// 在写入状态之前预留；写入失败时由调用方归还
pub fn debit_for(vm: &VirtualMachine, effect: Effect) -> Result<Option<Reservation>> {
    let reservation = match effect {
        Effect::DebitAll => {
            let alloc = vm.allocation.as_ref().ok_or_else(|| {
                Error::InvalidArgument(format!("机器 {} 尚未调度到宿主机", vm.key))
            })?;
            let storage_gb = sum_storage_gb(vm.storage.iter().map(|s| s.size_gb))?;
            Reservation::new(
                alloc.hypervisor.clone(),
                alloc.cpu,
                alloc.memory_mb,
                alloc.pool.clone(),
                storage_gb,
            )
        }
        Effect::DebitCompute => {
            let alloc = vm.allocation.as_ref().ok_or_else(|| {
                Error::InvalidArgument(format!("机器 {} 没有分配记录", vm.key))
            })?;
            Reservation::compute(alloc.hypervisor.clone(), alloc.cpu, alloc.memory_mb)
        }
        _ => return Ok(None),
    };
    Ok(Some(reservation))
}

/// 把转换写入记录，返回赢得这次转换后应归还的容量
pub fn commit(
    vm: &mut VirtualMachine,
    event: Event,
    t: Transition,
    detail: Option<String>,
    now: DateTime<Utc>,
) -> Option<Reservation> {
    vm.status = t.to;
    vm.updated_at = Some(now);

    let credit = match t.effect {
        Effect::DebitAll => {
            if let Some(alloc) = vm.allocation.as_mut() {
                alloc.compute_held = true;
                alloc.storage_held = alloc.storage_gb > 0;
            }
            None
        }
        Effect::DebitCompute => {
            if let Some(alloc) = vm.allocation.as_mut() {
                alloc.compute_held = true;
            }
            None
        }
        Effect::CreditCompute => vm.allocation.as_mut().and_then(|alloc| {
            if !alloc.compute_held {
                return None;
            }
            alloc.compute_held = false;
            Some(Reservation::compute(alloc.hypervisor.clone(), alloc.cpu, alloc.memory_mb))
        }),
        Effect::ReleaseHeld => take_held(vm),
        Effect::None => None,
    };

    match event {
        Event::HostReady | Event::Start => vm.started_at = Some(now),
        Event::HostFailed | Event::Fault => {
            vm.flagged = true;
            vm.last_error = detail;
        }
        _ => {}
    }

    credit
}

/// 清除持有标记并返回对应的容量
fn take_held(vm: &mut VirtualMachine) -> Option<Reservation> {
    let alloc = vm.allocation.as_mut()?;
    let mut r = Reservation::new(alloc.hypervisor.clone(), 0, 0, None, 0);
    if alloc.compute_held {
        r.cpu = alloc.cpu;
        r.memory_mb = alloc.memory_mb;
        alloc.compute_held = false;
    }
    if alloc.storage_held {
        r.pool = alloc.pool.clone();
        r.storage_gb = alloc.storage_gb;
        alloc.storage_held = false;
    }
    (!r.is_empty()).then_some(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::{Allocation, MachineKind, StorageAttachment, VolumeKind};

    const STATES: [VmStatus; 7] = [
        VmStatus::Registered,
        VmStatus::Provisioning,
        VmStatus::Running,
        VmStatus::Stopped,
        VmStatus::Deleting,
        VmStatus::Deleted,
        VmStatus::Error,
    ];

    fn legal(from: VmStatus, event: Event) -> Option<VmStatus> {
        use VmStatus as S;
        match (from, event) {
            (S::Registered, Event::AssignHost) => Some(S::Provisioning),
            (S::Provisioning, Event::HostReady) => Some(S::Running),
            (S::Provisioning, Event::HostFailed) => Some(S::Error),
            (S::Running, Event::Stop) => Some(S::Stopped),
            (S::Stopped, Event::Start) => Some(S::Running),
            (S::Running, Event::Destroy) | (S::Stopped, Event::Destroy) => Some(S::Deleting),
            (S::Deleting, Event::TeardownConfirmed) => Some(S::Deleted),
            (S::Deleted, Event::Fault) | (S::Error, Event::Fault) => None,
            (_, Event::Fault) => Some(S::Error),
            _ => None,
        }
    }

    #[test]
    fn test_every_pair_matches_table() {
        for from in STATES {
            for event in Event::ALL {
                match (legal(from, event), transition(from, event)) {
                    (Some(to), Ok(t)) => assert_eq!(t.to, to, "{} + {}", from, event),
                    (None, Err(Error::InvalidTransition { .. })) => {}
                    (expected, got) => {
                        panic!("{} + {}: expected {:?}, got {:?}", from, event, expected, got)
                    }
                }
            }
        }
    }

    #[test]
    fn test_stop_registered_is_invalid() {
        let err = transition(VmStatus::Registered, Event::Stop).unwrap_err();
        match err {
            Error::InvalidTransition { from, event } => {
                assert_eq!(from, "registered");
                assert_eq!(event, "stop");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_deleted_is_terminal() {
        for event in Event::ALL {
            assert!(transition(VmStatus::Deleted, event).is_err());
        }
    }

    fn placed_vm() -> VirtualMachine {
        VirtualMachine {
            schema_version: common::models::SCHEMA_VERSION,
            key: "VM-000001".to_string(),
            name: "web-0".to_string(),
            cluster: "web".to_string(),
            kind: MachineKind::Vm,
            uuid: "00000000-0000-0000-0000-000000000001".to_string(),
            hypervisor: Some("hv1".to_string()),
            port: Some(5900),
            allocation: Some(Allocation {
                hypervisor: "hv1".to_string(),
                pool: Some("vg0".to_string()),
                cpu: 4,
                memory_mb: 8192,
                storage_gb: 20,
                compute_held: false,
                storage_held: false,
            }),
            status: VmStatus::Registered,
            cpu: 4,
            memory_mb: 8192,
            storage: vec![
                StorageAttachment {
                    volume_key: "VOL-000001".to_string(),
                    device: "vda".to_string(),
                    kind: VolumeKind::Os,
                    persistent: false,
                    size_gb: 20,
                },
                StorageAttachment {
                    volume_key: "VOL-000002".to_string(),
                    device: "vdb".to_string(),
                    kind: VolumeKind::Data,
                    persistent: true,
                    size_gb: 100,
                },
            ],
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

    fn step(vm: &mut VirtualMachine, event: Event) -> Option<Reservation> {
        let t = transition(vm.status, event).unwrap();
        commit(vm, event, t, None, Utc::now())
    }

    #[test]
    fn test_assign_debits_all_disks() {
        let vm = placed_vm();
        let t = transition(vm.status, Event::AssignHost).unwrap();
        let r = debit_for(&vm, t.effect).unwrap().unwrap();
        assert_eq!(r, Reservation::new("hv1", 4, 8192, Some("vg0".to_string()), 120));
    }

    #[test]
    fn test_stop_credits_compute_once() {
        let mut vm = placed_vm();
        assert_eq!(step(&mut vm, Event::AssignHost), None);
        step(&mut vm, Event::HostReady);
        assert!(vm.started_at.is_some());

        let credit = step(&mut vm, Event::Stop).unwrap();
        assert_eq!(credit, Reservation::compute("hv1", 4, 8192));
        assert!(!vm.allocation.as_ref().unwrap().compute_held);

        // 停机后销毁只归还非持久磁盘
        step(&mut vm, Event::Destroy);
        let credit = step(&mut vm, Event::TeardownConfirmed).unwrap();
        assert_eq!(credit, Reservation::new("hv1", 0, 0, Some("vg0".to_string()), 20));
        assert!(!vm.holds_capacity());
    }

    #[test]
    fn test_fault_flags_and_releases() {
        let mut vm = placed_vm();
        step(&mut vm, Event::AssignHost);
        let t = transition(vm.status, Event::Fault).unwrap();
        let credit = commit(&mut vm, Event::Fault, t, Some("disk lost".to_string()), Utc::now());
        assert_eq!(credit, Some(Reservation::new("hv1", 4, 8192, Some("vg0".to_string()), 20)));
        assert_eq!(vm.status, VmStatus::Error);
        assert!(vm.flagged);
        assert_eq!(vm.last_error.as_deref(), Some("disk lost"));
    }

    #[test]
    fn test_fault_on_registered_releases_nothing() {
        let mut vm = placed_vm();
        assert_eq!(step(&mut vm, Event::Fault), None);
    }
}

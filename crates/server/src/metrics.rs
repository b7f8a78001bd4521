/// 调度与生命周期指标
///
/// 每个进程持有一份注册表，随 `AppState` 传递

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    placements: IntCounterVec,
    placement_failures: IntCounterVec,
    rollbacks: IntCounter,
    transitions: IntCounterVec,
    batch_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("evc".to_string()), None)?;

        let placements = IntCounterVec::new(
            Opts::new("placements_total", "成功的调度放置次数"),
            &["kind"],
        )?;
        let placement_failures = IntCounterVec::new(
            Opts::new("placement_failures_total", "没有宿主机或存储池满足需求的放置次数"),
            &["kind"],
        )?;
        let rollbacks = IntCounter::new("cluster_rollbacks_total", "集群创建回滚次数")?;
        let transitions = IntCounterVec::new(
            Opts::new("lifecycle_transitions_total", "已提交的生命周期状态转换"),
            &["event"],
        )?;
        let batch_failures = IntCounterVec::new(
            Opts::new("batch_member_failures_total", "批量操作中失败的成员数"),
            &["operation"],
        )?;

        registry.register(Box::new(placements.clone()))?;
        registry.register(Box::new(placement_failures.clone()))?;
        registry.register(Box::new(rollbacks.clone()))?;
        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(batch_failures.clone()))?;

        Ok(Self {
            registry,
            placements,
            placement_failures,
            rollbacks,
            transitions,
            batch_failures,
        })
    }

    pub fn placement(&self, kind: &str, ok: bool) {
        if ok {
            self.placements.with_label_values(&[kind]).inc();
        } else {
            self.placement_failures.with_label_values(&[kind]).inc();
        }
    }

    pub fn rollback(&self) {
        self.rollbacks.inc();
    }

    pub fn transition(&self, event: &str) {
        self.transitions.with_label_values(&[event]).inc();
    }

    pub fn batch_failures(&self, operation: &str, count: usize) {
        self.batch_failures
            .with_label_values(&[operation])
            .inc_by(count as u64);
    }

    /// Prometheus 文本格式
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("指标编码失败: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn transitions_for(&self, event: &str) -> u64 {
        self.transitions.with_label_values(&[event]).get()
    }

    #[cfg(test)]
    pub fn placement_failures_for(&self, kind: &str) -> u64 {
        self.placement_failures.with_label_values(&[kind]).get()
    }

    #[cfg(test)]
    pub fn rollbacks_total(&self) -> u64 {
        self.rollbacks.get()
    }
}

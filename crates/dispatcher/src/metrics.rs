use metrics::{counter, histogram, Counter, Histogram};

/// 队列相关指标
///
/// 只通过 `metrics` 门面上报，是否导出由二进制安装的 recorder 决定。
#[derive(Clone)]
pub struct QueueMetrics {
    enqueued_total: Counter,
    leased_total: Counter,
    lease_conflicts_total: Counter,
    acknowledged_total: Counter,
    schedule_dispatches_total: Counter,
    resubmitted_total: Counter,
    tick_duration: Histogram,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self {
            enqueued_total: counter!("ormq_enqueued_total"),
            leased_total: counter!("ormq_leased_total"),
            lease_conflicts_total: counter!("ormq_lease_conflicts_total"),
            acknowledged_total: counter!("ormq_acknowledged_total"),
            schedule_dispatches_total: counter!("ormq_schedule_dispatches_total"),
            resubmitted_total: counter!("ormq_resubmitted_total"),
            tick_duration: histogram!("ormq_scheduler_tick_duration_seconds"),
        }
    }

    pub fn record_enqueued(&self) {
        self.enqueued_total.increment(1);
    }

    pub fn record_leased(&self, count: u64) {
        self.leased_total.increment(count);
    }

    pub fn record_lease_conflict(&self) {
        self.lease_conflicts_total.increment(1);
    }

    pub fn record_acknowledged(&self) {
        self.acknowledged_total.increment(1);
    }

    pub fn record_schedule_dispatch(&self) {
        self.schedule_dispatches_total.increment(1);
    }

    pub fn record_resubmitted(&self, count: u64) {
        self.resubmitted_total.increment(count);
    }

    pub fn record_tick_duration(&self, seconds: f64) {
        self.tick_duration.record(seconds);
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

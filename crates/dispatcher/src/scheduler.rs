//! 周期调度引擎
//!
//! 一次派发的顺序：先以 `next_run` 做比较并交换认领调度，再入队；入队失败时按
//! 认领时写入的 task_id 撤销认领，错误照常向上传递。多个引擎实例共享同一存储时，
//! 同一个到期时刻最多被派发一次。

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use ormq_config::ExhaustedPolicy;
use ormq_domain::{
    Clock, NewSchedule, Schedule, ScheduleFilter, ScheduleRepository, ScheduleState, SystemClock,
    TaskEnvelope,
};
use ormq_errors::{QueueError, QueueResult};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::OrmBroker;
use crate::metrics::QueueMetrics;
use crate::schedule_calc::{initial_next_run, next_run_after, validate_new_schedule};

/// 一次成功派发
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub schedule_id: i64,
    pub task_id: String,
    pub message_id: i64,
    pub queue_key: String,
    /// 派发后的下一次运行时间；ONCE 保持原值
    pub next_run: DateTime<Utc>,
    pub exhausted: bool,
}

/// 单个调度的评估结果
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// 尚未到期或已耗尽
    NotDue(ScheduleState),
    /// 其他引擎已经认领了这一次到期
    ClaimLost,
    Dispatched(DispatchRecord),
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub evaluated: usize,
    pub dispatched: Vec<DispatchRecord>,
    pub skipped: usize,
    pub exhausted: usize,
    pub errors: Vec<(i64, QueueError)>,
}

impl TickReport {
    pub fn dispatched_count(&self) -> usize {
        self.dispatched.len()
    }
}

pub struct RecurrenceEngine {
    repo: Arc<dyn ScheduleRepository>,
    broker: Arc<OrmBroker>,
    clock: Arc<dyn Clock>,
    exhausted_policy: ExhaustedPolicy,
    metrics: QueueMetrics,
}

impl RecurrenceEngine {
    pub fn new(
        repo: Arc<dyn ScheduleRepository>,
        broker: Arc<OrmBroker>,
        exhausted_policy: ExhaustedPolicy,
    ) -> Self {
        Self::with_clock(repo, broker, exhausted_policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repo: Arc<dyn ScheduleRepository>,
        broker: Arc<OrmBroker>,
        exhausted_policy: ExhaustedPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            broker,
            clock,
            exhausted_policy,
            metrics: QueueMetrics::new(),
        }
    }

    pub fn exhausted_policy(&self) -> ExhaustedPolicy {
        self.exhausted_policy
    }

    /// 校验并保存新调度
    #[instrument(skip(self, request), fields(func = %request.func, schedule_type = %request.schedule_type))]
    pub async fn create_schedule(&self, request: NewSchedule) -> QueueResult<Schedule> {
        validate_new_schedule(&request)?;
        let next_run = initial_next_run(&request, self.clock.now())?;
        let created = self.repo.create(&request.into_schedule(next_run)).await?;
        info!(
            "创建{}，首次运行时间: {}",
            created.entity_description(),
            created.next_run
        );
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> QueueResult<Option<Schedule>> {
        self.repo.get(id).await
    }

    pub async fn list(&self, filter: &ScheduleFilter) -> QueueResult<Vec<Schedule>> {
        self.repo.find(filter).await
    }

    pub async fn delete_schedule(&self, id: i64) -> QueueResult<bool> {
        let deleted = self.repo.delete(id).await?;
        if deleted {
            info!("删除调度 {}", id);
        }
        Ok(deleted)
    }

    /// 把任务执行结果写回派发它的调度；调度已再次派发或被删除时返回 false
    pub async fn record_outcome(
        &self,
        schedule_id: i64,
        task_id: &str,
        success: bool,
    ) -> QueueResult<bool> {
        let updated = self.repo.record_outcome(schedule_id, task_id, success).await?;
        if !updated {
            debug!("调度 {} 的最近任务已不是 {}，忽略执行结果", schedule_id, task_id);
        }
        Ok(updated)
    }

    /// 评估并派发全部到期调度；单个调度出错不影响其余调度
    #[instrument(skip(self))]
    pub async fn tick(&self) -> QueueResult<TickReport> {
        let start_time = Instant::now();
        let now = self.clock.now();
        let due = self.repo.find_due(now).await?;
        let mut report = TickReport::default();

        for schedule in due {
            report.evaluated += 1;
            let schedule_id = schedule.id;
            match self.evaluate_at(&schedule, now).await {
                Ok(Evaluation::Dispatched(record)) => {
                    if record.exhausted {
                        report.exhausted += 1;
                    }
                    report.dispatched.push(record);
                }
                Ok(Evaluation::ClaimLost) | Ok(Evaluation::NotDue(_)) => report.skipped += 1,
                Err(e) => {
                    error!("派发调度 {} 失败: {}", schedule_id, e);
                    report.errors.push((schedule_id, e));
                }
            }
        }

        self.metrics
            .record_tick_duration(start_time.elapsed().as_secs_f64());
        if report.evaluated > 0 {
            info!(
                "本轮调度完成: 评估 {} 个，派发 {} 个，跳过 {} 个，失败 {} 个",
                report.evaluated,
                report.dispatched.len(),
                report.skipped,
                report.errors.len()
            );
        }
        Ok(report)
    }

    /// 以当前时间评估单个调度
    pub async fn evaluate(&self, schedule: &Schedule) -> QueueResult<Evaluation> {
        self.evaluate_at(schedule, self.clock.now()).await
    }

    #[instrument(skip(self, schedule), fields(schedule_id = schedule.id))]
    async fn evaluate_at(&self, schedule: &Schedule, now: DateTime<Utc>) -> QueueResult<Evaluation> {
        let state = schedule.state(now);
        if state != ScheduleState::Due {
            return Ok(Evaluation::NotDue(state));
        }

        let envelope = TaskEnvelope::new(schedule.func.clone())
            .with_args(schedule.args.clone())
            .with_kwargs(schedule.kwargs.clone())
            .with_hook(schedule.hook.clone())
            .with_group(Some(schedule.group_name()))
            .with_cluster(schedule.cluster.clone())
            .with_schedule(schedule.id);

        let claimed = self.claimed_state(schedule, &envelope.id, now)?;
        if !self.repo.advance(&claimed, schedule.next_run).await? {
            debug!("调度 {} 已被其他引擎认领", schedule.id);
            return Ok(Evaluation::ClaimLost);
        }

        let message = match self.broker.enqueue(&envelope).await {
            Ok(message) => message,
            Err(e) => {
                self.rollback_claim(schedule, &envelope.id).await;
                return Err(e);
            }
        };
        self.metrics.record_schedule_dispatch();

        let exhausted = claimed.is_exhausted();
        info!(
            task_id = %envelope.id,
            queue_key = %message.key,
            "派发{}，下次运行: {}",
            schedule.entity_description(),
            if exhausted { "无".to_string() } else { claimed.next_run.to_string() }
        );

        if exhausted && self.exhausted_policy == ExhaustedPolicy::Delete {
            // 任务已经入队，删除失败只影响清理
            match self.repo.delete(schedule.id).await {
                Ok(_) => info!("调度 {} 次数已耗尽，已删除", schedule.id),
                Err(e) => warn!("删除已耗尽的调度 {} 失败: {}", schedule.id, e),
            }
        }

        Ok(Evaluation::Dispatched(DispatchRecord {
            schedule_id: schedule.id,
            task_id: envelope.id,
            message_id: message.id,
            queue_key: message.key,
            next_run: claimed.next_run,
            exhausted,
        }))
    }

    /// 认领后应写入的状态；追赶执行时下一次运行从当前时间起算
    fn claimed_state(&self, schedule: &Schedule, task_id: &str, now: DateTime<Utc>) -> QueueResult<Schedule> {
        let mut claimed = schedule.clone();
        claimed.last_run = Some(now);
        claimed.task_id = Some(task_id.to_string());
        claimed.success = None;

        match next_run_after(
            schedule.schedule_type,
            schedule.minutes,
            schedule.cron.as_deref(),
            now,
        )? {
            Some(next_run) => {
                claimed.next_run = next_run;
                if claimed.repeats > 0 {
                    claimed.repeats -= 1;
                }
            }
            None => claimed.repeats = 0,
        }
        Ok(claimed)
    }

    async fn rollback_claim(&self, original: &Schedule, task_id: &str) {
        match self.repo.restore(original, task_id).await {
            Ok(true) => warn!("入队失败，已撤销调度 {} 的认领", original.id),
            Ok(false) => warn!("入队失败，调度 {} 已被修改，未撤销认领", original.id),
            Err(e) => error!("撤销调度 {} 的认领失败: {}", original.id, e),
        }
    }

    /// 按固定间隔循环执行 `tick`，收到关闭信号后退出
    pub async fn run(&self, poll_interval: StdDuration, mut shutdown: broadcast::Receiver<()>) {
        info!("调度引擎启动，轮询间隔 {:?}", poll_interval);
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("调度轮询失败: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到关闭信号，调度引擎退出");
                    break;
                }
            }
        }
    }
}

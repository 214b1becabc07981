//! Worker 侧的完成路径：写台账、确认消息、回写调度结果

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ormq_domain::{Clock, QueueMessage, ScheduleRepository, SystemClock, TaskKwargs, TaskResult};
use ormq_errors::QueueResult;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::broker::OrmBroker;
use crate::ledger::ResultLedger;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(Value),
    Failure(String),
}

pub struct TaskCompletion {
    ledger: Arc<ResultLedger>,
    broker: Arc<OrmBroker>,
    schedules: Option<Arc<dyn ScheduleRepository>>,
    clock: Arc<dyn Clock>,
}

impl TaskCompletion {
    pub fn new(ledger: Arc<ResultLedger>, broker: Arc<OrmBroker>) -> Self {
        Self {
            ledger,
            broker,
            schedules: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_schedules(mut self, schedules: Arc<dyn ScheduleRepository>) -> Self {
        self.schedules = Some(schedules);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 记录一条已领取消息的执行结果并确认消息
    ///
    /// 信封无法解码时按失败记录入账，结果为解码错误信息。
    #[instrument(skip(self, message, outcome), fields(message_id = message.id, task_id = %message.task_id))]
    pub async fn complete(
        &self,
        message: &QueueMessage,
        started: DateTime<Utc>,
        outcome: TaskOutcome,
    ) -> QueueResult<TaskResult> {
        let stopped = self.clock.now();
        let (record, schedule_id) = match message.envelope() {
            Ok(envelope) => {
                let (success, result) = match outcome {
                    TaskOutcome::Success(value) => (true, value),
                    TaskOutcome::Failure(error) => (false, Value::String(error)),
                };
                let record =
                    TaskResult::from_envelope(&envelope, started, stopped, success, Some(result));
                (record, envelope.schedule_id)
            }
            Err(e) => {
                warn!("消息 {} 的信封无法解码，记为失败: {}", message.id, e);
                (undecodable_failure(message, started, stopped, e.to_string()), None)
            }
        };

        let record = if record.success {
            self.ledger.record_success(record).await?
        } else {
            self.ledger.record_failure(record).await?
        };

        self.broker.acknowledge(message.id).await?;

        if let (Some(schedules), Some(schedule_id)) = (&self.schedules, schedule_id) {
            schedules
                .record_outcome(schedule_id, &record.id, record.success)
                .await?;
        }
        Ok(record)
    }
}

fn undecodable_failure(
    message: &QueueMessage,
    started: DateTime<Utc>,
    stopped: DateTime<Utc>,
    error: String,
) -> TaskResult {
    TaskResult {
        id: message.task_id.clone(),
        name: message.name.clone(),
        func: message.func.clone(),
        hook: message.hook.clone(),
        args: Vec::new(),
        kwargs: TaskKwargs::new(),
        result: Some(Value::String(error)),
        group: None,
        started,
        stopped,
        success: false,
        attempt_count: 1,
    }
}

//! 测试数据构造器，带合理的默认值

use chrono::{DateTime, Duration, SubsecRound, Utc};
use ormq_domain::{
    new_task_id, Schedule, ScheduleType, TaskArgs, TaskEnvelope, TaskKwargs, TaskResult,
};
use serde_json::Value;

/// Builder for creating test Schedule entities
pub struct ScheduleBuilder {
    schedule: Schedule,
}

impl ScheduleBuilder {
    pub fn new(func: &str, schedule_type: ScheduleType) -> Self {
        Self {
            schedule: Schedule::new(func, schedule_type, Utc::now().trunc_subsecs(3)),
        }
    }

    pub fn hourly(func: &str) -> Self {
        Self::new(func, ScheduleType::Hourly)
    }

    pub fn cron(func: &str, expression: &str) -> Self {
        let mut builder = Self::new(func, ScheduleType::Cron);
        builder.schedule.cron = Some(expression.to_string());
        builder
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.schedule.name = Some(name.to_string());
        self
    }

    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.schedule.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: TaskKwargs) -> Self {
        self.schedule.kwargs = kwargs;
        self
    }

    pub fn with_hook(mut self, hook: &str) -> Self {
        self.schedule.hook = Some(hook.to_string());
        self
    }

    pub fn with_minutes(mut self, minutes: i32) -> Self {
        self.schedule.minutes = Some(minutes);
        self
    }

    pub fn with_repeats(mut self, repeats: i32) -> Self {
        self.schedule.repeats = repeats;
        self
    }

    pub fn with_next_run(mut self, next_run: DateTime<Utc>) -> Self {
        self.schedule.next_run = next_run;
        self
    }

    pub fn with_cluster(mut self, cluster: &str) -> Self {
        self.schedule.cluster = Some(cluster.to_string());
        self
    }

    pub fn build(self) -> Schedule {
        self.schedule
    }
}

/// Builder for creating test TaskResult entities
pub struct TaskResultBuilder {
    result: TaskResult,
}

impl TaskResultBuilder {
    pub fn new(func: &str) -> Self {
        let stopped = Utc::now().trunc_subsecs(3);
        let id = new_task_id();
        Self {
            result: TaskResult {
                name: id.clone(),
                id,
                func: func.to_string(),
                hook: None,
                args: Vec::new(),
                kwargs: TaskKwargs::new(),
                result: None,
                group: None,
                started: stopped - Duration::seconds(1),
                stopped,
                success: true,
                attempt_count: 1,
            },
        }
    }

    pub fn failure(func: &str) -> Self {
        Self::new(func)
            .with_success(false)
            .with_result(Value::String("Traceback: boom".to_string()))
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.result.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.result.name = name.to_string();
        self
    }

    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.result.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: TaskKwargs) -> Self {
        self.result.kwargs = kwargs;
        self
    }

    pub fn with_hook(mut self, hook: &str) -> Self {
        self.result.hook = Some(hook.to_string());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.result.group = Some(group.to_string());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result.result = Some(result);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.result.success = success;
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: i32) -> Self {
        self.result.attempt_count = attempt_count;
        self
    }

    /// 设置结束时间，开始时间随之前移一秒
    pub fn stopped_at(mut self, stopped: DateTime<Utc>) -> Self {
        self.result.started = stopped - Duration::seconds(1);
        self.result.stopped = stopped;
        self
    }

    pub fn build(self) -> TaskResult {
        self.result
    }
}

/// Builder for creating test TaskEnvelope values
pub struct EnvelopeBuilder {
    envelope: TaskEnvelope,
}

impl EnvelopeBuilder {
    pub fn new(func: &str) -> Self {
        Self {
            envelope: TaskEnvelope::new(func),
        }
    }

    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.envelope.args = args;
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.envelope.group = Some(group.to_string());
        self
    }

    pub fn with_cluster(mut self, cluster: &str) -> Self {
        self.envelope.cluster = Some(cluster.to_string());
        self
    }

    pub fn with_schedule(mut self, schedule_id: i64) -> Self {
        self.envelope.schedule_id = Some(schedule_id);
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: i32) -> Self {
        self.envelope.attempt_count = attempt_count;
        self
    }

    pub fn build(self) -> TaskEnvelope {
        self.envelope
    }
}

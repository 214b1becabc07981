use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ormq_errors::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskArgs = Vec<serde_json::Value>;
pub type TaskKwargs = serde_json::Map<String, serde_json::Value>;

/// 新任务ID：32位十六进制UUID
pub fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 任务信封
///
/// 入队时序列化为队列行的 `payload`，Worker 领取后再解码。
/// `attempt_count` 表示此前已消耗的尝试次数，新任务为 0。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: String,
    pub name: String,
    pub func: String,
    #[serde(default)]
    pub args: TaskArgs,
    #[serde(default)]
    pub kwargs: TaskKwargs,
    #[serde(default)]
    pub hook: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub schedule_id: Option<i64>,
    #[serde(default)]
    pub attempt_count: i32,
}

impl TaskEnvelope {
    pub fn new(func: impl Into<String>) -> Self {
        let id = new_task_id();
        Self {
            name: id.clone(),
            id,
            func: func.into(),
            args: Vec::new(),
            kwargs: TaskKwargs::new(),
            hook: None,
            group: None,
            cluster: None,
            schedule_id: None,
            attempt_count: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: TaskKwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_hook(mut self, hook: Option<String>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    pub fn with_cluster(mut self, cluster: Option<String>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_schedule(mut self, schedule_id: i64) -> Self {
        self.schedule_id = Some(schedule_id);
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: i32) -> Self {
        self.attempt_count = attempt_count.max(0);
        self
    }

    pub fn encode(&self) -> QueueResult<String> {
        serde_json::to_string(self)
            .map_err(|e| QueueError::serialization(format!("编码任务 {} 失败: {e}", self.id)))
    }

    pub fn decode(payload: &str) -> QueueResult<Self> {
        serde_json::from_str(payload)
            .map_err(|e| QueueError::serialization(format!("解码任务信封失败: {e}")))
    }
}

/// 队列消息（ORM代理中的一行）
///
/// `lock` 为空表示可领取；非空且早于租约超时阈值的行视为被遗弃，可被重新领取。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: i64,
    pub key: String,
    pub task_id: String,
    pub name: String,
    pub func: String,
    pub hook: Option<String>,
    pub payload: String,
    pub lock: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub const FIELDS: &'static [&'static str] =
        &["id", "key", "task_id", "name", "func", "hook", "payload", "lock"];

    pub fn envelope(&self) -> QueueResult<TaskEnvelope> {
        TaskEnvelope::decode(&self.payload)
    }

    /// 未加锁，或锁早于 `stale_before`（租约已过期）
    pub fn is_available(&self, stale_before: DateTime<Utc>) -> bool {
        match self.lock {
            None => true,
            Some(lock) => lock < stale_before,
        }
    }

    pub fn entity_description(&self) -> String {
        format!(
            "队列消息 '{}' (ID: {}, 分区: {}, 函数: {})",
            self.name, self.id, self.key, self.func
        )
    }
}

/// 待插入的队列消息
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueMessage {
    pub key: String,
    pub task_id: String,
    pub name: String,
    pub func: String,
    pub hook: Option<String>,
    pub payload: String,
}

impl NewQueueMessage {
    pub fn from_envelope(key: impl Into<String>, envelope: &TaskEnvelope) -> QueueResult<Self> {
        Ok(Self {
            key: key.into(),
            task_id: envelope.id.clone(),
            name: envelope.name.clone(),
            func: envelope.func.clone(),
            hook: envelope.hook.clone(),
            payload: envelope.encode()?,
        })
    }
}

/// 任务结果台账记录，成功与失败共用同一结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub name: String,
    pub func: String,
    pub hook: Option<String>,
    pub args: TaskArgs,
    pub kwargs: TaskKwargs,
    pub result: Option<serde_json::Value>,
    pub group: Option<String>,
    pub started: DateTime<Utc>,
    pub stopped: DateTime<Utc>,
    pub success: bool,
    pub attempt_count: i32,
}

impl TaskResult {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "name",
        "func",
        "hook",
        "args",
        "kwargs",
        "result",
        "group",
        "started",
        "stopped",
        "success",
        "attempt_count",
    ];

    const SHORT_RESULT_LEN: usize = 100;

    /// 由信封构造一条结果记录；本次执行计入尝试次数
    pub fn from_envelope(
        envelope: &TaskEnvelope,
        started: DateTime<Utc>,
        stopped: DateTime<Utc>,
        success: bool,
        result: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: envelope.id.clone(),
            name: envelope.name.clone(),
            func: envelope.func.clone(),
            hook: envelope.hook.clone(),
            args: envelope.args.clone(),
            kwargs: envelope.kwargs.clone(),
            result,
            group: envelope.group.clone(),
            started,
            stopped,
            success,
            attempt_count: envelope.attempt_count + 1,
        }
    }

    /// 执行耗时（秒）
    pub fn time_taken(&self) -> f64 {
        (self.stopped - self.started).num_milliseconds() as f64 / 1000.0
    }

    /// 截断后的结果文本，用于列表展示
    pub fn short_result(&self) -> String {
        let text = match &self.result {
            None => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        text.chars().take(Self::SHORT_RESULT_LEN).collect()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务结果 '{}' (ID: {}, 函数: {}, 成功: {})",
            self.name, self.id, self.func, self.success
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskResultFilter {
    pub success: Option<bool>,
    /// 仅返回 attempt_count 大于该值的记录
    pub attempt_count_gt: Option<i32>,
    pub group: Option<String>,
    /// 在 name / func / group 上做包含匹配
    pub search: Option<String>,
    pub ids: Option<Vec<String>>,
    pub limit: Option<i64>,
}

impl TaskResultFilter {
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 在进程内应用全部过滤条件
    pub fn matches(&self, result: &TaskResult) -> bool {
        if let Some(success) = self.success {
            if result.success != success {
                return false;
            }
        }
        if let Some(min) = self.attempt_count_gt {
            if result.attempt_count <= min {
                return false;
            }
        }
        if let Some(group) = &self.group {
            if result.group.as_deref() != Some(group.as_str()) {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&result.id) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let hit = result.name.contains(search.as_str())
                || result.func.contains(search.as_str())
                || result
                    .group
                    .as_deref()
                    .is_some_and(|g| g.contains(search.as_str()));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// 调度类型，持久化时使用单/双字母代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    Once,
    Minutes,
    Hourly,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Bimonthly,
    Quarterly,
    Yearly,
    Cron,
}

impl ScheduleType {
    pub const ALL: [ScheduleType; 11] = [
        ScheduleType::Once,
        ScheduleType::Minutes,
        ScheduleType::Hourly,
        ScheduleType::Daily,
        ScheduleType::Weekly,
        ScheduleType::Biweekly,
        ScheduleType::Monthly,
        ScheduleType::Bimonthly,
        ScheduleType::Quarterly,
        ScheduleType::Yearly,
        ScheduleType::Cron,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ScheduleType::Once => "O",
            ScheduleType::Minutes => "I",
            ScheduleType::Hourly => "H",
            ScheduleType::Daily => "D",
            ScheduleType::Weekly => "W",
            ScheduleType::Biweekly => "BW",
            ScheduleType::Monthly => "M",
            ScheduleType::Bimonthly => "BM",
            ScheduleType::Quarterly => "Q",
            ScheduleType::Yearly => "Y",
            ScheduleType::Cron => "C",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScheduleType::Once => "once",
            ScheduleType::Minutes => "minutes",
            ScheduleType::Hourly => "hourly",
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Biweekly => "biweekly",
            ScheduleType::Monthly => "monthly",
            ScheduleType::Bimonthly => "bimonthly",
            ScheduleType::Quarterly => "quarterly",
            ScheduleType::Yearly => "yearly",
            ScheduleType::Cron => "cron",
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for ScheduleType {
    type Err = QueueError;

    /// 同时接受代码（"BW"）与名称（"biweekly"）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ScheduleType::ALL
            .into_iter()
            .find(|t| t.code() == trimmed || t.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| QueueError::invalid_schedule(format!("未知的调度类型: {s}")))
    }
}

impl sqlx::Type<sqlx::Postgres> for ScheduleType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for ScheduleType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ScheduleType {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<ScheduleType>().map_err(|e| e.to_string().into())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ScheduleType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<ScheduleType>().map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ScheduleType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.code(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ScheduleType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.code(), buf)
    }
}

/// 调度在某一时刻的状态；DISPATCHING 只在引擎内部短暂存在
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleState {
    Pending,
    Due,
    Dispatching,
    Exhausted,
}

/// 周期调度定义
///
/// `repeats`: 正数为剩余次数，负数为无限，0 为已耗尽。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: Option<String>,
    pub func: String,
    pub hook: Option<String>,
    pub args: TaskArgs,
    pub kwargs: TaskKwargs,
    pub schedule_type: ScheduleType,
    pub minutes: Option<i32>,
    pub cron: Option<String>,
    pub repeats: i32,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub cluster: Option<String>,
    pub task_id: Option<String>,
    pub success: Option<bool>,
}

impl Schedule {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "name",
        "func",
        "hook",
        "args",
        "kwargs",
        "schedule_type",
        "minutes",
        "cron",
        "repeats",
        "next_run",
        "last_run",
        "cluster",
        "task_id",
        "success",
    ];

    pub fn new(func: impl Into<String>, schedule_type: ScheduleType, next_run: DateTime<Utc>) -> Self {
        Self {
            id: 0, // 将由数据库生成
            name: None,
            func: func.into(),
            hook: None,
            args: Vec::new(),
            kwargs: TaskKwargs::new(),
            schedule_type,
            minutes: None,
            cron: None,
            repeats: -1,
            next_run,
            last_run: None,
            cluster: None,
            task_id: None,
            success: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.repeats == 0
    }

    pub fn state(&self, now: DateTime<Utc>) -> ScheduleState {
        if self.is_exhausted() {
            ScheduleState::Exhausted
        } else if self.next_run <= now {
            ScheduleState::Due
        } else {
            ScheduleState::Pending
        }
    }

    /// 派发任务时使用的分组名：调度名称，缺省为调度ID
    pub fn group_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn entity_description(&self) -> String {
        format!(
            "调度 '{}' (ID: {}, 类型: {}, 函数: {})",
            self.group_name(),
            self.id,
            self.schedule_type,
            self.func
        )
    }
}

/// 创建调度的请求，由调度引擎校验后落库
///
/// `next_run` 缺省为当前时间，CRON 类型缺省为当前时间之后的第一次触发。
#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedule {
    pub name: Option<String>,
    pub func: String,
    pub hook: Option<String>,
    pub args: TaskArgs,
    pub kwargs: TaskKwargs,
    pub schedule_type: ScheduleType,
    pub minutes: Option<i32>,
    pub cron: Option<String>,
    pub repeats: i32,
    pub next_run: Option<DateTime<Utc>>,
    pub cluster: Option<String>,
}

impl NewSchedule {
    pub fn new(func: impl Into<String>, schedule_type: ScheduleType) -> Self {
        Self {
            name: None,
            func: func.into(),
            hook: None,
            args: Vec::new(),
            kwargs: TaskKwargs::new(),
            schedule_type,
            minutes: None,
            cron: None,
            repeats: -1,
            next_run: None,
            cluster: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hook = Some(hook.into());
        self
    }

    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: TaskKwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_minutes(mut self, minutes: i32) -> Self {
        self.minutes = Some(minutes);
        self
    }

    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = Some(cron.into());
        self
    }

    pub fn with_repeats(mut self, repeats: i32) -> Self {
        self.repeats = repeats;
        self
    }

    pub fn with_next_run(mut self, next_run: DateTime<Utc>) -> Self {
        self.next_run = Some(next_run);
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn into_schedule(self, next_run: DateTime<Utc>) -> Schedule {
        Schedule {
            id: 0,
            name: self.name,
            func: self.func,
            hook: self.hook,
            args: self.args,
            kwargs: self.kwargs,
            schedule_type: self.schedule_type,
            minutes: self.minutes,
            cron: self.cron,
            repeats: self.repeats,
            next_run,
            last_run: None,
            cluster: self.cluster,
            task_id: None,
            success: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub cluster: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    /// 在 func 上做包含匹配
    pub search: Option<String>,
    pub limit: Option<i64>,
}

impl ScheduleFilter {
    pub fn matches(&self, schedule: &Schedule) -> bool {
        if let Some(cluster) = &self.cluster {
            if schedule.cluster.as_deref() != Some(cluster.as_str()) {
                return false;
            }
        }
        if let Some(schedule_type) = self.schedule_type {
            if schedule.schedule_type != schedule_type {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !schedule.func.contains(search.as_str()) {
                return false;
            }
        }
        true
    }
}

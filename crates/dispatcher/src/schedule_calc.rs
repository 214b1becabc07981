//! 下次运行时间计算与调度定义校验

use chrono::{DateTime, Duration, Months, Utc};
use ormq_domain::{NewSchedule, ScheduleType};
use ormq_errors::{QueueError, QueueResult};

#[cfg(feature = "cron")]
use crate::cron_utils::CronScheduler;

/// 编译时是否包含 CRON 支持
pub const CRON_SUPPORTED: bool = cfg!(feature = "cron");

/// 从 `from` 起算的下一次运行时间；ONCE 和不再触发的 CRON 没有下一次，返回 `None`
///
/// 月度类按日历计算，目标月没有对应日期时取月末。
pub fn next_run_after(
    schedule_type: ScheduleType,
    minutes: Option<i32>,
    cron: Option<&str>,
    from: DateTime<Utc>,
) -> QueueResult<Option<DateTime<Utc>>> {
    let next = match schedule_type {
        ScheduleType::Once => return Ok(None),
        ScheduleType::Minutes => {
            let minutes = positive_minutes(minutes)?;
            from + Duration::minutes(minutes as i64)
        }
        ScheduleType::Hourly => from + Duration::hours(1),
        ScheduleType::Daily => from + Duration::days(1),
        ScheduleType::Weekly => from + Duration::weeks(1),
        ScheduleType::Biweekly => from + Duration::weeks(2),
        ScheduleType::Monthly => add_months(from, 1)?,
        ScheduleType::Bimonthly => add_months(from, 2)?,
        ScheduleType::Quarterly => add_months(from, 3)?,
        ScheduleType::Yearly => add_months(from, 12)?,
        ScheduleType::Cron => return next_cron_run(cron, from),
    };
    Ok(Some(next))
}

/// 校验创建请求
pub fn validate_new_schedule(request: &NewSchedule) -> QueueResult<()> {
    if request.func.trim().is_empty() {
        return Err(QueueError::invalid_schedule("func 不能为空"));
    }
    match request.schedule_type {
        ScheduleType::Minutes => {
            positive_minutes(request.minutes)?;
        }
        ScheduleType::Cron => {
            let expr = cron_expression(request.cron.as_deref())?;
            validate_cron(expr)?;
        }
        _ => {}
    }
    Ok(())
}

/// 创建时的首次运行时间：显式指定优先，CRON 取当前时间之后的第一次触发，其余为当前时间
pub fn initial_next_run(request: &NewSchedule, now: DateTime<Utc>) -> QueueResult<DateTime<Utc>> {
    if let Some(next_run) = request.next_run {
        return Ok(next_run);
    }
    match request.schedule_type {
        ScheduleType::Cron => {
            let expr = cron_expression(request.cron.as_deref())?;
            next_cron_run(Some(expr), now)?.ok_or_else(|| {
                QueueError::invalid_schedule(format!("CRON表达式 '{expr}' 没有后续触发时间"))
            })
        }
        _ => Ok(now),
    }
}

fn positive_minutes(minutes: Option<i32>) -> QueueResult<i32> {
    match minutes {
        Some(m) if m > 0 => Ok(m),
        Some(m) => Err(QueueError::invalid_schedule(format!(
            "MINUTES 调度的间隔必须为正数，实际为 {m}"
        ))),
        None => Err(QueueError::invalid_schedule("MINUTES 调度缺少 minutes")),
    }
}

fn add_months(from: DateTime<Utc>, months: u32) -> QueueResult<DateTime<Utc>> {
    from.checked_add_months(Months::new(months))
        .ok_or_else(|| QueueError::invalid_schedule(format!("{from} 加 {months} 个月超出时间范围")))
}

fn cron_expression(cron: Option<&str>) -> QueueResult<&str> {
    match cron {
        Some(expr) if !expr.trim().is_empty() => Ok(expr),
        _ => Err(QueueError::invalid_schedule("CRON 调度缺少表达式")),
    }
}

#[cfg(feature = "cron")]
fn validate_cron(expr: &str) -> QueueResult<()> {
    CronScheduler::validate_cron_expression(expr)
}

#[cfg(not(feature = "cron"))]
fn validate_cron(_expr: &str) -> QueueResult<()> {
    Err(QueueError::invalid_schedule("未启用 CRON 支持，无法创建 CRON 调度"))
}

#[cfg(feature = "cron")]
fn next_cron_run(cron: Option<&str>, from: DateTime<Utc>) -> QueueResult<Option<DateTime<Utc>>> {
    let expr = cron_expression(cron)?;
    Ok(CronScheduler::new(expr)?.next_execution_time(from))
}

#[cfg(not(feature = "cron"))]
fn next_cron_run(cron: Option<&str>, _from: DateTime<Utc>) -> QueueResult<Option<DateTime<Utc>>> {
    cron_expression(cron)?;
    Err(QueueError::invalid_schedule("未启用 CRON 支持"))
}

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::warn;

use ormq_errors::{QueueError, QueueResult};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// CRON表达式解析和调度工具
///
/// 5字段（分 时 日 月 周）按标准 cron 解释：星期 0 和 7 都是周日，日和星期同时受限时
/// 满足其一即触发。6字段（带秒）和7字段（带年）直接交给 cron crate，星期 1 为周日。
/// 统一按 UTC 计算。
pub struct CronScheduler {
    expression: String,
    schedules: Vec<Schedule>,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> QueueResult<Self> {
        let schedules = Self::expand(cron_expr)?
            .iter()
            .map(|expr| {
                Schedule::from_str(expr).map_err(|e| {
                    QueueError::invalid_schedule(format!("无效的CRON表达式 '{cron_expr}': {e}"))
                })
            })
            .collect::<QueueResult<Vec<_>>>()?;
        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedules,
        })
    }

    /// 转换成 cron crate 的表达式；5字段表达式补上秒位并改写星期编号
    pub fn expand(cron_expr: &str) -> QueueResult<Vec<String>> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        let &[minute, hour, day, month, weekday] = fields.as_slice() else {
            return Ok(vec![fields.join(" ")]);
        };

        let weekday = quartz_day_of_week(weekday).map_err(|reason| {
            QueueError::invalid_schedule(format!("无效的CRON表达式 '{cron_expr}': {reason}"))
        })?;
        if is_restricted(day) && is_restricted(&weekday) {
            Ok(vec![
                format!("0 {minute} {hour} {day} {month} *"),
                format!("0 {minute} {hour} * {month} {weekday}"),
            ])
        } else {
            Ok(vec![format!("0 {minute} {hour} {day} {month} {weekday}")])
        }
    }

    /// 严格晚于 `from` 的下一次触发时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self
            .schedules
            .iter()
            .filter_map(|schedule| schedule.after(&from).next())
            .min();
        if next.is_none() {
            warn!("CRON表达式 '{}' 在 {} 之后不再触发", self.expression, from);
        }
        next
    }

    pub fn validate_cron_expression(cron_expr: &str) -> QueueResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

/// 标准星期字段（0-7，0 和 7 为周日）展开后改写为 1-7（1 为周日）
fn quartz_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("星期字段的步长 '{step}' 无效"))?;
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((start, end)) => (parse_day(start)?, parse_day(end)?),
            None if step.is_some() => (parse_day(range)?, 7),
            None => {
                let day = parse_day(range)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("星期范围 '{range}' 起点大于终点"));
        }

        for day in (start..=end).step_by(step.unwrap_or(1) as usize) {
            days.insert(day % 7);
        }
    }

    if days.len() == 7 {
        return Ok("*".to_string());
    }
    Ok(days
        .iter()
        .map(|day| (day + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_day(value: &str) -> Result<u32, String> {
    if let Ok(day) = value.parse::<u32>() {
        return if day <= 7 {
            Ok(day)
        } else {
            Err(format!("星期取值 {day} 超出 0-7"))
        };
    }
    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .map(|day| day as u32)
        .ok_or_else(|| format!("无法识别的星期 '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_five_field_expression_gets_seconds() {
        assert_eq!(CronScheduler::expand("0 * * * *").unwrap(), vec!["0 0 * * * *"]);
        assert_eq!(CronScheduler::expand(" 0 0 * * * * ").unwrap(), vec!["0 0 * * * *"]);
        assert_eq!(
            CronScheduler::expand("0 0 12 * * * 2030").unwrap(),
            vec!["0 0 12 * * * 2030"]
        );
    }

    #[test]
    fn test_weekday_numbering_is_rewritten() {
        assert_eq!(CronScheduler::expand("0 9 * * 1").unwrap(), vec!["0 0 9 * * 2"]);
        assert_eq!(CronScheduler::expand("0 9 * * 0").unwrap(), vec!["0 0 9 * * 1"]);
        assert_eq!(CronScheduler::expand("0 9 * * 7").unwrap(), vec!["0 0 9 * * 1"]);
        assert_eq!(
            CronScheduler::expand("0 9 * * 1-5").unwrap(),
            vec!["0 0 9 * * 2,3,4,5,6"]
        );
        assert_eq!(CronScheduler::expand("0 9 * * 5-7").unwrap(), vec!["0 0 9 * * 1,6,7"]);
        assert_eq!(CronScheduler::expand("0 9 * * */2").unwrap(), vec!["0 0 9 * * 1,3,5,7"]);
        assert_eq!(CronScheduler::expand("0 9 * * sat,SUN").unwrap(), vec!["0 0 9 * * 1,7"]);
        assert_eq!(CronScheduler::expand("0 9 * * 0-7").unwrap(), vec!["0 0 9 * * *"]);
    }

    #[test]
    fn test_standard_weekdays_fire_on_the_right_day() {
        // 2023-12-31 是周日
        let sunday_noon = at(2023, 12, 31, 12);

        let monday = CronScheduler::new("0 9 * * 1").unwrap();
        assert_eq!(monday.next_execution_time(sunday_noon), Some(at(2024, 1, 1, 9)));

        for expr in ["0 0 * * 0", "0 0 * * 7"] {
            let next = CronScheduler::new(expr)
                .unwrap()
                .next_execution_time(sunday_noon)
                .unwrap();
            assert_eq!(next, at(2024, 1, 7, 0));
            assert_eq!(next.weekday(), Weekday::Sun);
        }

        let weekdays = CronScheduler::new("0 9 * * 1-5").unwrap();
        let mut from = sunday_noon;
        let mut fired = Vec::new();
        for _ in 0..5 {
            from = weekdays.next_execution_time(from).unwrap();
            fired.push(from.weekday());
        }
        assert_eq!(
            fired,
            vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
        );
        assert_eq!(weekdays.next_execution_time(from), Some(at(2024, 1, 8, 9)));
    }

    #[test]
    fn test_day_of_month_or_weekday() {
        // 每月 15 日或每个周一
        let cron = CronScheduler::new("0 8 15 * 1").unwrap();
        let from = at(2024, 1, 9, 12);
        assert_eq!(cron.next_execution_time(from), Some(at(2024, 1, 15, 8)));
        assert_eq!(cron.next_execution_time(at(2024, 1, 15, 8)), Some(at(2024, 1, 22, 8)));

        let fourteenth = CronScheduler::new("0 8 14 * 1").unwrap();
        assert_eq!(fourteenth.next_execution_time(from), Some(at(2024, 1, 14, 8)));
    }

    #[test]
    fn test_next_execution_is_strictly_after() {
        let cron = CronScheduler::new("0 * * * *").unwrap();
        assert_eq!(
            cron.next_execution_time(Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap()),
            Some(at(2024, 1, 1, 11))
        );
        assert_eq!(cron.next_execution_time(at(2024, 1, 1, 11)), Some(at(2024, 1, 1, 12)));
    }

    #[test]
    fn test_invalid_expression() {
        for expr in ["every hour", "0 9 * * 8", "0 9 * * 5-1", "0 9 * * */0", "0 9 * * funday"] {
            let err = CronScheduler::new(expr).err().unwrap();
            assert!(matches!(err, QueueError::InvalidScheduleDefinition(_)), "{expr}");
        }
        assert!(CronScheduler::validate_cron_expression("0 0 * * * *").is_ok());
    }
}

//! 操作界面注册表
//!
//! 进程启动时构建一次，之后按引用传递。每类实体对应一个只读的视图描述：
//! 列表列、搜索字段、过滤字段、只读字段以及可用的批量操作。

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use ormq_domain::{QueueMessage, Schedule, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Success,
    Failure,
    Schedule,
    Queue,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Success => "Successful tasks",
            EntityKind::Failure => "Failed tasks",
            EntityKind::Schedule => "Scheduled tasks",
            EntityKind::Queue => "Queued tasks",
        }
    }
}

/// 批量操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    /// 重新提交所选失败任务
    Resubmit,
    Delete,
}

impl AdminAction {
    pub fn name(&self) -> &'static str {
        match self {
            AdminAction::Resubmit => "resubmit",
            AdminAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityView {
    pub kind: EntityKind,
    pub list_display: &'static [&'static str],
    pub search_fields: &'static [&'static str],
    pub list_filter: &'static [&'static str],
    pub readonly_fields: Vec<&'static str>,
    pub can_add: bool,
    pub actions: Vec<AdminAction>,
}

impl EntityView {
    pub fn is_readonly(&self, field: &str) -> bool {
        self.readonly_fields.iter().any(|f| *f == field)
    }

    /// 按 `list_display` 渲染行
    pub fn render_rows<T: AdminRow>(&self, rows: &[T]) -> String {
        let header: Vec<String> = self.list_display.iter().map(|c| c.to_string()).collect();
        let body: Vec<Vec<String>> = rows
            .iter()
            .map(|row| self.list_display.iter().map(|c| row.field(c)).collect())
            .collect();
        render_table(&header, &body)
    }
}

/// 可在列表中展示的实体
pub trait AdminRow {
    /// 取字段的展示文本；未知字段为空串
    fn field(&self, name: &str) -> String;
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl AdminRow for TaskResult {
    fn field(&self, name: &str) -> String {
        match name {
            "id" => self.id.clone(),
            "name" => self.name.clone(),
            "func" => self.func.clone(),
            "hook" => opt(&self.hook),
            "group" => opt(&self.group),
            "started" => timestamp(&self.started),
            "stopped" => timestamp(&self.stopped),
            "time_taken" => format!("{:.3}", self.time_taken()),
            "short_result" => self.short_result(),
            "success" => self.success.to_string(),
            "attempt_count" => self.attempt_count.to_string(),
            _ => String::new(),
        }
    }
}

impl AdminRow for Schedule {
    fn field(&self, name: &str) -> String {
        match name {
            "id" => self.id.to_string(),
            "name" => opt(&self.name),
            "func" => self.func.clone(),
            "schedule_type" => self.schedule_type.to_string(),
            "minutes" => opt(&self.minutes),
            "cron" => opt(&self.cron),
            "repeats" => self.repeats.to_string(),
            "cluster" => opt(&self.cluster),
            "next_run" => timestamp(&self.next_run),
            "last_run" => self.last_run.as_ref().map(timestamp).unwrap_or_default(),
            "task_id" => opt(&self.task_id),
            "success" => opt(&self.success),
            _ => String::new(),
        }
    }
}

impl AdminRow for QueueMessage {
    fn field(&self, name: &str) -> String {
        match name {
            "id" => self.id.to_string(),
            "key" => self.key.clone(),
            "task_id" => self.task_id.clone(),
            "name" => self.name.clone(),
            "func" => self.func.clone(),
            "lock" => self.lock.as_ref().map(timestamp).unwrap_or_default(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminRegistry {
    views: Vec<EntityView>,
}

impl AdminRegistry {
    /// 队列视图只在启用 ORM 代理时注册；不支持 CRON 时 `cron` 字段只读
    pub fn build(broker_enabled: bool, cron_supported: bool) -> Self {
        let mut views = vec![
            EntityView {
                kind: EntityKind::Success,
                list_display: &["name", "func", "started", "stopped", "time_taken", "group"],
                search_fields: &["name", "func", "group"],
                list_filter: &["group"],
                readonly_fields: TaskResult::FIELDS.to_vec(),
                can_add: false,
                actions: vec![AdminAction::Delete],
            },
            EntityView {
                kind: EntityKind::Failure,
                list_display: &["name", "func", "started", "stopped", "short_result"],
                search_fields: &["name", "func"],
                list_filter: &["group"],
                readonly_fields: TaskResult::FIELDS.to_vec(),
                can_add: false,
                actions: vec![AdminAction::Resubmit, AdminAction::Delete],
            },
            EntityView {
                kind: EntityKind::Schedule,
                list_display: &[
                    "id",
                    "name",
                    "func",
                    "schedule_type",
                    "repeats",
                    "cluster",
                    "next_run",
                    "last_run",
                    "success",
                ],
                search_fields: &["func"],
                list_filter: &["next_run", "schedule_type", "cluster"],
                readonly_fields: if cron_supported { Vec::new() } else { vec!["cron"] },
                can_add: true,
                actions: vec![AdminAction::Delete],
            },
        ];

        if broker_enabled {
            views.push(EntityView {
                kind: EntityKind::Queue,
                list_display: &["id", "key", "task_id", "name", "func", "lock"],
                search_fields: &[],
                list_filter: &["key"],
                readonly_fields: Vec::new(),
                can_add: false,
                actions: vec![AdminAction::Delete],
            });
        }

        Self { views }
    }

    pub fn views(&self) -> &[EntityView] {
        &self.views
    }

    pub fn get(&self, kind: EntityKind) -> Option<&EntityView> {
        self.views.iter().find(|v| v.kind == kind)
    }

    pub fn is_registered(&self, kind: EntityKind) -> bool {
        self.get(kind).is_some()
    }

    /// 注册表概览
    pub fn render(&self) -> String {
        let header: Vec<String> = ["entity", "list_display", "search", "filter", "readonly", "add", "actions"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let body: Vec<Vec<String>> = self
            .views
            .iter()
            .map(|v| {
                vec![
                    v.kind.label().to_string(),
                    v.list_display.join(", "),
                    v.search_fields.join(", "),
                    v.list_filter.join(", "),
                    if v.readonly_fields.len() == TaskResult::FIELDS.len() {
                        "all".to_string()
                    } else {
                        v.readonly_fields.join(", ")
                    },
                    (if v.can_add { "yes" } else { "no" }).to_string(),
                    v.actions
                        .iter()
                        .map(|a| a.name())
                        .collect::<Vec<_>>()
                        .join(", "),
                ]
            })
            .collect();
        render_table(&header, &body)
    }
}

fn render_table(header: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let line = |cells: &[String], out: &mut String| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect();
        let _ = writeln!(out, "{}", padded.join(" | ").trim_end());
    };
    line(header, &mut out);
    let _ = writeln!(
        out,
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-")
    );
    for row in rows {
        line(row, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ormq_domain::{ScheduleType, TaskEnvelope};

    #[test]
    fn test_queue_view_requires_broker() {
        let registry = AdminRegistry::build(false, true);
        assert!(!registry.is_registered(EntityKind::Queue));
        assert_eq!(registry.views().len(), 3);

        let registry = AdminRegistry::build(true, true);
        let queue = registry.get(EntityKind::Queue).unwrap();
        assert_eq!(queue.list_filter, &["key"]);
        assert!(!queue.can_add);
    }

    #[test]
    fn test_ledger_views_are_read_only() {
        let registry = AdminRegistry::build(true, true);
        for kind in [EntityKind::Success, EntityKind::Failure] {
            let view = registry.get(kind).unwrap();
            assert!(!view.can_add);
            assert!(TaskResult::FIELDS.iter().all(|f| view.is_readonly(f)));
        }
        let failure = registry.get(EntityKind::Failure).unwrap();
        assert!(failure.actions.contains(&AdminAction::Resubmit));
        let success = registry.get(EntityKind::Success).unwrap();
        assert!(!success.actions.contains(&AdminAction::Resubmit));
    }

    #[test]
    fn test_cron_readonly_without_support() {
        let registry = AdminRegistry::build(true, false);
        assert!(registry.get(EntityKind::Schedule).unwrap().is_readonly("cron"));

        let registry = AdminRegistry::build(true, true);
        assert!(!registry.get(EntityKind::Schedule).unwrap().is_readonly("cron"));
    }

    #[test]
    fn test_render_rows() {
        let registry = AdminRegistry::build(true, true);
        let started = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let envelope = TaskEnvelope::new("jobs.send_email").with_name("welcome");
        let failure = TaskResult::from_envelope(
            &envelope,
            started,
            started,
            false,
            Some(serde_json::json!("boom")),
        );

        let table = registry
            .get(EntityKind::Failure)
            .unwrap()
            .render_rows(&[failure]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("name"));
        assert!(lines[2].contains("jobs.send_email"));
        assert!(lines[2].contains("boom"));

        let schedule = Schedule::new("jobs.report", ScheduleType::Daily, started);
        assert_eq!(schedule.field("schedule_type"), "daily");
        assert_eq!(schedule.field("last_run"), "");
        assert_eq!(schedule.field("next_run"), "2024-01-01 10:00:00");
    }

    #[test]
    fn test_render_registry() {
        let rendered = AdminRegistry::build(true, true).render();
        assert!(rendered.contains("Failed tasks"));
        assert!(rendered.contains("resubmit"));
        assert!(rendered.contains("Queued tasks"));
    }
}

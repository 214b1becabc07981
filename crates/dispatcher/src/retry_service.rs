//! 失败任务重新提交
//!
//! 每条失败记录独立处理：先删除原记录作为认领，再以新的任务ID入队；入队失败时写回
//! 原记录。已被删除的记录跳过，因此一条失败记录至多产生一条新消息。批次不具备原子性，
//! 遇到第一个错误即停止，已处理的记录保持已删除，其余记录原样保留。

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use ormq_config::AttemptPolicy;
use ormq_domain::{TaskEnvelope, TaskResult, TaskResultFilter};
use ormq_errors::{QueueError, QueueResult};
use tracing::{debug, error, info, instrument, warn};

use crate::broker::OrmBroker;
use crate::ledger::ResultLedger;
use crate::metrics::QueueMetrics;

/// 出错的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResubmitStage {
    /// 删除原记录失败，未入队
    Delete,
    /// 入队失败，原记录已写回
    Enqueue,
    /// 入队失败且原记录未能写回
    Restore,
}

impl fmt::Display for ResubmitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResubmitStage::Delete => write!(f, "删除原记录"),
            ResubmitStage::Enqueue => write!(f, "入队"),
            ResubmitStage::Restore => write!(f, "写回原记录"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resubmission {
    pub failure_id: String,
    pub task_id: String,
    pub message_id: i64,
}

#[derive(Debug)]
pub struct ResubmitFailure {
    pub failure_id: String,
    pub stage: ResubmitStage,
    pub error: QueueError,
}

#[derive(Debug, Default)]
pub struct ResubmitReport {
    pub resubmitted: Vec<Resubmission>,
    /// 成功记录或已不存在的记录
    pub skipped: Vec<String>,
    pub failed: Option<ResubmitFailure>,
    /// 因前面的错误而未处理的记录
    pub untouched: Vec<String>,
}

impl ResubmitReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }

    pub fn resubmitted_count(&self) -> usize {
        self.resubmitted.len()
    }
}

pub struct ResubmissionOperator {
    ledger: Arc<ResultLedger>,
    broker: Arc<OrmBroker>,
    policy: AttemptPolicy,
    metrics: QueueMetrics,
}

impl ResubmissionOperator {
    pub fn new(ledger: Arc<ResultLedger>, broker: Arc<OrmBroker>, policy: AttemptPolicy) -> Self {
        Self {
            ledger,
            broker,
            policy,
            metrics: QueueMetrics::new(),
        }
    }

    pub fn policy(&self) -> AttemptPolicy {
        self.policy
    }

    /// 由失败记录重建信封，使用新的任务ID
    pub fn rebuild_envelope(&self, failure: &TaskResult) -> TaskEnvelope {
        let attempt_count = match self.policy {
            AttemptPolicy::Fresh => 0,
            AttemptPolicy::CarryForward => failure.attempt_count,
        };
        TaskEnvelope::new(failure.func.clone())
            .with_args(failure.args.clone())
            .with_kwargs(failure.kwargs.clone())
            .with_hook(failure.hook.clone())
            .with_group(failure.group.clone())
            .with_attempt_count(attempt_count)
    }

    #[instrument(skip(self, failures), fields(count = failures.len()))]
    pub async fn resubmit(&self, failures: Vec<TaskResult>) -> ResubmitReport {
        let mut report = ResubmitReport::default();
        let mut remaining = failures.into_iter();

        for failure in remaining.by_ref() {
            if failure.success {
                debug!("跳过成功记录 {}", failure.id);
                report.skipped.push(failure.id);
                continue;
            }

            match self.ledger.delete(&failure.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("失败记录 {} 已不存在，跳过", failure.id);
                    report.skipped.push(failure.id);
                    continue;
                }
                Err(error) => {
                    warn!("删除失败记录 {} 出错: {}", failure.id, error);
                    report.failed = Some(ResubmitFailure {
                        failure_id: failure.id,
                        stage: ResubmitStage::Delete,
                        error,
                    });
                    break;
                }
            }

            let envelope = self.rebuild_envelope(&failure);
            let message = match self.broker.enqueue(&envelope).await {
                Ok(message) => message,
                Err(error) => {
                    let stage = self.restore(&failure, &error).await;
                    report.failed = Some(ResubmitFailure {
                        failure_id: failure.id,
                        stage,
                        error,
                    });
                    break;
                }
            };

            debug!("失败任务 {} 已重新提交为 {}", failure.id, envelope.id);
            report.resubmitted.push(Resubmission {
                failure_id: failure.id,
                task_id: envelope.id,
                message_id: message.id,
            });
        }

        report.untouched = remaining.map(|r| r.id).collect();
        self.metrics
            .record_resubmitted(report.resubmitted.len() as u64);
        if !report.resubmitted.is_empty() || report.failed.is_some() {
            info!(
                "重新提交完成: 成功 {} 条，跳过 {} 条，未处理 {} 条",
                report.resubmitted.len(),
                report.skipped.len(),
                report.untouched.len()
            );
        }
        report
    }

    async fn restore(&self, failure: &TaskResult, cause: &QueueError) -> ResubmitStage {
        match self.ledger.restore(failure).await {
            Ok(()) => {
                warn!("重新提交 {} 时入队失败，已写回原记录: {}", failure.id, cause);
                ResubmitStage::Enqueue
            }
            Err(e) => {
                error!(
                    func = %failure.func,
                    args = ?failure.args,
                    "重新提交 {} 时入队失败（{}），写回原记录也失败: {}",
                    failure.id, cause, e
                );
                ResubmitStage::Restore
            }
        }
    }

    /// 按ID重新提交，重复的ID只处理一次，不存在或不是失败记录的ID计入 skipped
    pub async fn resubmit_ids(&self, ids: &[String]) -> QueueResult<ResubmitReport> {
        let mut seen = HashSet::new();
        let mut failures = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids.iter().filter(|id| seen.insert(id.as_str())) {
            match self.ledger.get_failure(id).await? {
                Some(failure) => failures.push(failure),
                None => missing.push(id.clone()),
            }
        }
        let mut report = self.resubmit(failures).await;
        report.skipped.extend(missing);
        Ok(report)
    }

    /// 重新提交匹配过滤条件的全部失败记录
    pub async fn resubmit_all(&self, filter: &TaskResultFilter) -> QueueResult<ResubmitReport> {
        let failures = self.ledger.query_failures(filter).await?;
        Ok(self.resubmit(failures).await)
    }
}

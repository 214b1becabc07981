use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use ormq_config::AttemptPolicy;
use ormq_dispatcher::{BrokerOptions, OrmBroker, ResubmissionOperator, ResubmitStage, ResultLedger};
use ormq_domain::{QueueRepository, TaskResultFilter};
use ormq_testing_utils::{FailingQueueRepository, TaskResultBuilder, TestBackend};
use serde_json::json;

struct Harness {
    broker: Arc<OrmBroker>,
    ledger: Arc<ResultLedger>,
    operator: ResubmissionOperator,
}

async fn harness_with_queue<F>(backend: TestBackend, policy: AttemptPolicy, wrap: F) -> Result<Harness>
where
    F: FnOnce(Arc<dyn QueueRepository>) -> Arc<dyn QueueRepository>,
{
    let manager = backend.connect().await?;
    let broker = Arc::new(OrmBroker::new(
        wrap(manager.queue_repository("default")?),
        BrokerOptions::default(),
    ));
    let ledger = Arc::new(ResultLedger::new(manager.result_repository("default")?));
    let operator = ResubmissionOperator::new(ledger.clone(), broker.clone(), policy);
    Ok(Harness {
        broker,
        ledger,
        operator,
    })
}

async fn harness(backend: TestBackend, policy: AttemptPolicy) -> Result<Harness> {
    harness_with_queue(backend, policy, |queue| queue).await
}

#[tokio::test]
async fn test_resubmit_send_email_failure() -> Result<()> {
    for backend in TestBackend::ALL {
        let h = harness(backend, AttemptPolicy::Fresh).await?;
        let failure = h
            .ledger
            .record_failure(
                TaskResultBuilder::failure("jobs.send_email")
                    .with_args(vec![json!("a@x.com")])
                    .with_hook("hooks.mail_sent")
                    .build(),
            )
            .await?;
        assert_eq!(h.ledger.count_failures().await?, 1);
        assert_eq!(h.broker.queue_size("default").await?, 0);

        let report = h.operator.resubmit_all(&TaskResultFilter::default()).await?;
        assert!(report.is_complete());
        assert_eq!(report.resubmitted_count(), 1);

        assert_eq!(h.ledger.count_failures().await?, 0);
        assert_eq!(h.broker.queue_size("default").await?, 1);
        assert!(h.ledger.get(&failure.id).await?.is_none());

        let envelope = h.broker.lease("default").await?.unwrap().envelope()?;
        assert_eq!(envelope.func, "jobs.send_email");
        assert_eq!(envelope.args, vec![json!("a@x.com")]);
        assert_eq!(envelope.hook.as_deref(), Some("hooks.mail_sent"));
        assert_ne!(envelope.id, failure.id);
        assert_eq!(envelope.id, report.resubmitted[0].task_id);
        assert_eq!(envelope.attempt_count, 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_empty_selection_is_noop() -> Result<()> {
    for backend in TestBackend::ALL {
        let h = harness(backend, AttemptPolicy::Fresh).await?;
        let report = h.operator.resubmit_all(&TaskResultFilter::default()).await?;
        assert!(report.is_complete());
        assert_eq!(report.resubmitted_count(), 0);
        assert!(report.skipped.is_empty());

        let report = h.operator.resubmit(Vec::new()).await;
        assert!(report.is_complete());
        assert_eq!(h.broker.queue_size("default").await?, 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_partial_batch_failure_keeps_remaining_records() -> Result<()> {
    for backend in TestBackend::ALL {
        let h = harness_with_queue(backend, AttemptPolicy::Fresh, |queue| {
            Arc::new(FailingQueueRepository::new(queue, 1))
        })
        .await?;
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        for i in 0..3 {
            h.ledger
                .record_failure(
                    TaskResultBuilder::failure("jobs.import")
                        .with_id(&format!("failed-{i}"))
                        .stopped_at(base + Duration::minutes(i))
                        .build(),
                )
                .await?;
        }

        // 按 stopped 倒序处理：failed-2 成功，failed-1 入队失败，failed-0 未处理
        let report = h.operator.resubmit_all(&TaskResultFilter::default()).await?;
        assert!(!report.is_complete());
        assert_eq!(report.resubmitted[0].failure_id, "failed-2");
        let failed = report.failed.as_ref().unwrap();
        assert_eq!(failed.failure_id, "failed-1");
        assert_eq!(failed.stage, ResubmitStage::Enqueue);
        assert_eq!(report.untouched, vec!["failed-0".to_string()]);

        assert_eq!(h.ledger.count_failures().await?, 2);
        assert_eq!(h.broker.queue_size("default").await?, 1);
        assert!(h.ledger.get("failed-1").await?.is_some());
        assert!(h.ledger.get("failed-0").await?.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn test_resubmit_ids_skips_missing_and_successes() -> Result<()> {
    for backend in TestBackend::ALL {
        let h = harness(backend, AttemptPolicy::Fresh).await?;
        let failure = h
            .ledger
            .record_failure(TaskResultBuilder::failure("jobs.a").build())
            .await?;
        let success = h
            .ledger
            .record_success(TaskResultBuilder::new("jobs.b").build())
            .await?;

        let ids = vec![failure.id.clone(), success.id.clone(), "missing".to_string()];
        let report = h.operator.resubmit_ids(&ids).await?;

        assert!(report.is_complete());
        assert_eq!(report.resubmitted_count(), 1);
        assert_eq!(report.skipped, vec![success.id.clone(), "missing".to_string()]);
        assert!(h.ledger.get(&success.id).await?.is_some());
        assert_eq!(h.broker.queue_size("default").await?, 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_repeated_id_is_resubmitted_once() -> Result<()> {
    for backend in TestBackend::ALL {
        let h = harness(backend, AttemptPolicy::Fresh).await?;
        let failure = h
            .ledger
            .record_failure(TaskResultBuilder::failure("jobs.a").build())
            .await?;

        let report = h
            .operator
            .resubmit_ids(&[failure.id.clone(), failure.id.clone()])
            .await?;
        assert!(report.is_complete());
        assert_eq!(report.resubmitted_count(), 1, "{backend:?}");
        assert!(report.skipped.is_empty());
        assert_eq!(h.broker.queue_size("default").await?, 1);

        // 直接传入重复记录时，第二条在删除时发现已被认领
        let again = h
            .ledger
            .record_failure(TaskResultBuilder::failure("jobs.b").build())
            .await?;
        let report = h.operator.resubmit(vec![again.clone(), again.clone()]).await;
        assert_eq!(report.resubmitted_count(), 1);
        assert_eq!(report.skipped, vec![again.id]);
        assert_eq!(h.broker.queue_size("default").await?, 2);
    }
    Ok(())
}

#[tokio::test]
async fn test_stale_selection_does_not_resubmit_twice() -> Result<()> {
    for backend in TestBackend::ALL {
        let h = harness(backend, AttemptPolicy::Fresh).await?;
        let failure = h
            .ledger
            .record_failure(TaskResultBuilder::failure("jobs.import").build())
            .await?;

        // 两个操作员拿到同一份列表
        let snapshot = h.ledger.query_failures(&TaskResultFilter::default()).await?;
        let first = h.operator.resubmit(snapshot.clone()).await;
        let second = h.operator.resubmit(snapshot).await;

        assert_eq!(first.resubmitted_count(), 1, "{backend:?}");
        assert!(second.is_complete());
        assert_eq!(second.resubmitted_count(), 0);
        assert_eq!(second.skipped, vec![failure.id]);
        assert_eq!(h.broker.queue_size("default").await?, 1);
        assert_eq!(h.ledger.count_failures().await?, 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_resubmit_only_failures_in_direct_selection() -> Result<()> {
    let h = harness(TestBackend::Sqlite, AttemptPolicy::Fresh).await?;
    let success = TaskResultBuilder::new("jobs.ok").build();
    let report = h.operator.resubmit(vec![success.clone()]).await;
    assert_eq!(report.skipped, vec![success.id]);
    assert_eq!(h.broker.queue_size("default").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_attempt_policy() -> Result<()> {
    let failure = TaskResultBuilder::failure("jobs.flaky")
        .with_attempt_count(3)
        .with_group("imports")
        .build();

    let fresh = harness(TestBackend::Memory, AttemptPolicy::Fresh).await?;
    assert_eq!(fresh.operator.rebuild_envelope(&failure).attempt_count, 0);

    let carry = harness(TestBackend::Memory, AttemptPolicy::CarryForward).await?;
    let envelope = carry.operator.rebuild_envelope(&failure);
    assert_eq!(envelope.attempt_count, 3);
    assert_eq!(envelope.group.as_deref(), Some("imports"));
    assert_eq!(carry.operator.policy(), AttemptPolicy::CarryForward);
    Ok(())
}

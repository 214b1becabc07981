use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use ormq_config::DatabaseConfig;
use ormq_dispatcher::ResultLedger;
use ormq_domain::{QueueError, TaskResult, TaskResultFilter, TaskResultRepository};
use ormq_infrastructure::DatabaseConnection;
use ormq_testing_utils::{TaskResultBuilder, TestBackend};

fn dataset() -> Vec<TaskResult> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    (0..6)
        .map(|i| {
            let builder = if i % 3 == 0 {
                TaskResultBuilder::failure("jobs.import")
            } else {
                TaskResultBuilder::new("jobs.export").with_group("nightly")
            };
            builder
                .with_id(&format!("task-{i}"))
                .stopped_at(base + Duration::minutes(i))
                .build()
        })
        .collect()
}

async fn fill(ledger: &ResultLedger, records: Vec<TaskResult>) -> Result<()> {
    for record in records {
        if record.success {
            ledger.record_success(record).await?;
        } else {
            ledger.record_failure(record).await?;
        }
    }
    Ok(())
}

fn ids(records: &[TaskResult]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

/// SQLite 连接，但关闭布尔过滤能力，强制走回退查询
async fn sqlite_without_boolean_filter() -> Result<ResultLedger> {
    let mut config = DatabaseConfig::with_url("sqlite::memory:");
    config.capabilities.boolean_filter = Some(false);
    let connection = DatabaseConnection::connect("default", &config).await?;
    connection.pool().migrate().await?;
    Ok(ResultLedger::new(connection.result_repository()))
}

#[tokio::test]
async fn test_strategy_follows_capabilities() -> Result<()> {
    let sqlite = TestBackend::Sqlite.connect().await?;
    let memory = TestBackend::Memory.connect().await?;

    assert_eq!(
        ResultLedger::new(sqlite.result_repository("default")?).strategy_name(),
        "direct_filter"
    );
    assert_eq!(
        ResultLedger::new(memory.result_repository("default")?).strategy_name(),
        "fetch_and_filter"
    );
    assert_eq!(sqlite_without_boolean_filter().await?.strategy_name(), "fetch_and_filter");
    Ok(())
}

#[tokio::test]
async fn test_success_queries_match_across_backends() -> Result<()> {
    let sqlite = TestBackend::Sqlite.connect().await?;
    let memory = TestBackend::Memory.connect().await?;
    let ledgers = vec![
        ResultLedger::new(sqlite.result_repository("default")?),
        ResultLedger::new(memory.result_repository("default")?),
        sqlite_without_boolean_filter().await?,
    ];

    let mut answers = Vec::new();
    for ledger in &ledgers {
        fill(ledger, dataset()).await?;
        let successes = ledger.query_successes(&TaskResultFilter::default()).await?;
        let failures = ledger.query_failures(&TaskResultFilter::default()).await?;
        let nightly = ledger
            .query_successes(&TaskResultFilter::default().with_group("nightly").with_limit(2))
            .await?;
        let search = ledger
            .query_failures(&TaskResultFilter::default().with_search("import"))
            .await?;
        answers.push((ids(&successes), ids(&failures), ids(&nightly), ids(&search)));
    }

    let (successes, failures, nightly, search) = &answers[0];
    // stopped 倒序
    assert_eq!(successes, &vec!["task-5", "task-4", "task-2", "task-1"]);
    assert_eq!(failures, &vec!["task-3", "task-0"]);
    assert_eq!(nightly, &vec!["task-5", "task-4"]);
    assert_eq!(search, failures);
    for answer in &answers[1..] {
        assert_eq!(answer, &answers[0]);
    }
    Ok(())
}

#[tokio::test]
async fn test_counts_match_across_backends() -> Result<()> {
    let sqlite = TestBackend::Sqlite.connect().await?;
    let memory = TestBackend::Memory.connect().await?;
    let ledgers = vec![
        ResultLedger::new(sqlite.result_repository("default")?),
        ResultLedger::new(memory.result_repository("default")?),
        sqlite_without_boolean_filter().await?,
    ];

    for ledger in &ledgers {
        fill(ledger, dataset()).await?;
        assert_eq!(ledger.count_successes().await?, 4, "{}", ledger.strategy_name());
        assert_eq!(ledger.count_failures().await?, 2, "{}", ledger.strategy_name());
    }
    Ok(())
}

#[tokio::test]
async fn test_repository_count_ignores_limit() -> Result<()> {
    for backend in TestBackend::ALL {
        let manager = backend.connect().await?;
        let repo = manager.result_repository("default")?;
        fill(&ResultLedger::new(repo.clone()), dataset()).await?;

        let nightly = TaskResultFilter::default().with_group("nightly").with_limit(1);
        assert_eq!(repo.count(&nightly).await?, 4, "{backend:?}");
        assert_eq!(repo.count(&TaskResultFilter::default().with_search("import")).await?, 2);
        assert_eq!(
            repo.count(&TaskResultFilter {
                ids: Some(Vec::new()),
                ..TaskResultFilter::default()
            })
            .await?,
            0
        );
    }

    let memory = TestBackend::Memory.connect().await?;
    let by_flag = TaskResultFilter {
        success: Some(false),
        ..TaskResultFilter::default()
    };
    let err = memory.result_repository("default")?.count(&by_flag).await.unwrap_err();
    assert!(matches!(err, QueueError::UnsupportedQuery(_)));
    Ok(())
}

#[tokio::test]
async fn test_recorded_flags_are_forced() -> Result<()> {
    for backend in TestBackend::ALL {
        let manager = backend.connect().await?;
        let ledger = ResultLedger::new(manager.result_repository("default")?);

        let recorded = ledger
            .record_failure(
                TaskResultBuilder::new("jobs.flaky")
                    .with_success(true)
                    .with_attempt_count(0)
                    .build(),
            )
            .await?;
        assert!(!recorded.success);
        assert_eq!(recorded.attempt_count, 1);

        assert_eq!(ledger.count_failures().await?, 1);
        assert_eq!(ledger.count_successes().await?, 0);
        assert!(ledger.get_failure(&recorded.id).await?.is_some());

        let success = ledger
            .record_success(TaskResultBuilder::new("jobs.fine").build())
            .await?;
        assert!(ledger.get_failure(&success.id).await?.is_none());
        assert!(ledger.get(&success.id).await?.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_is_idempotent() -> Result<()> {
    for backend in TestBackend::ALL {
        let manager = backend.connect().await?;
        let ledger = Arc::new(ResultLedger::new(manager.result_repository("default")?));
        let recorded = ledger
            .record_failure(TaskResultBuilder::failure("jobs.gone").build())
            .await?;

        assert!(ledger.delete(&recorded.id).await?);
        assert!(!ledger.delete(&recorded.id).await?);
        assert_eq!(ledger.count_failures().await?, 0);
    }
    Ok(())
}

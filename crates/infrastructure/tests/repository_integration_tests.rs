use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use ormq_config::DatabaseConfig;
use ormq_domain::*;
use ormq_infrastructure::{DatabaseConnection, DatabaseManager};
use serde_json::json;

fn ts(h: u32, m: u32, s: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
}

async fn managers() -> Result<Vec<DatabaseManager>> {
    let sqlite = DatabaseManager::single("sqlite::memory:").await?;
    sqlite.migrate().await?;
    let memory = DatabaseManager::single("memory:").await?;
    Ok(vec![sqlite, memory])
}

fn message(key: &str, func: &str) -> NewQueueMessage {
    let envelope = TaskEnvelope::new(func).with_args(vec![json!(1)]);
    NewQueueMessage::from_envelope(key, &envelope).unwrap()
}

fn result_for(func: &str, success: bool, stopped: chrono::DateTime<Utc>) -> TaskResult {
    let envelope = TaskEnvelope::new(func).with_group(Some("reports".to_string()));
    TaskResult::from_envelope(&envelope, stopped - Duration::seconds(1), stopped, success, Some(json!("ok")))
}

#[tokio::test]
async fn test_queue_repository_lock_lifecycle() -> Result<()> {
    for manager in managers().await? {
        let repo = manager.queue_repository("default")?;
        let first = repo.insert(&message("default", "jobs.a")).await?;
        let second = repo.insert(&message("default", "jobs.b")).await?;
        repo.insert(&message("other", "jobs.c")).await?;

        assert!(second.id > first.id);
        assert_eq!(repo.count("default").await?, 2);
        assert_eq!(repo.list_by_key("default").await?.len(), 2);

        let lock = ts(12, 0, 0);
        assert!(repo.swap_lock(first.id, None, Some(lock)).await?);
        // 期望值已过时，第二次交换失败
        assert!(!repo.swap_lock(first.id, None, Some(lock)).await?);
        assert_eq!(repo.get(first.id).await?.unwrap().lock, Some(lock));

        assert_eq!(repo.count_locked("default", lock - Duration::seconds(60)).await?, 1);
        assert_eq!(repo.count_locked("default", lock + Duration::seconds(1)).await?, 0);

        assert!(repo.clear_lock(first.id).await?);
        assert!(!repo.clear_lock(first.id).await?);

        assert!(repo.delete(first.id).await?);
        assert!(!repo.delete(first.id).await?);
        assert_eq!(repo.delete_by_key("default").await?, 1);
        assert_eq!(repo.count("other").await?, 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_sqlite_claim_next_skips_fresh_locks() -> Result<()> {
    let manager = DatabaseManager::single("sqlite::memory:").await?;
    manager.migrate().await?;
    let repo = manager.queue_repository("default")?;

    let first = repo.insert(&message("default", "jobs.a")).await?;
    let second = repo.insert(&message("default", "jobs.b")).await?;

    let now = ts(12, 0, 0);
    let stale_before = now - Duration::seconds(60);

    let claimed = repo.claim_next("default", stale_before, now).await?.unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.lock, Some(now));

    let claimed = repo.claim_next("default", stale_before, now).await?.unwrap();
    assert_eq!(claimed.id, second.id);

    assert!(repo.claim_next("default", stale_before, now).await?.is_none());

    // 租约过期后可被重新领取
    let later = now + Duration::seconds(120);
    let reclaimed = repo
        .claim_next("default", later - Duration::seconds(60), later)
        .await?
        .unwrap();
    assert_eq!(reclaimed.id, first.id);
    assert_eq!(reclaimed.lock, Some(later));
    Ok(())
}

#[tokio::test]
async fn test_memory_queue_refuses_atomic_claim() -> Result<()> {
    let manager = DatabaseManager::single("memory:").await?;
    let repo = manager.queue_repository("default")?;
    assert!(!repo.capabilities().atomic_claim);

    let err = repo.claim_next("default", ts(11, 0, 0), ts(12, 0, 0)).await.unwrap_err();
    assert!(matches!(err, QueueError::UnsupportedQuery(_)));
    Ok(())
}

#[tokio::test]
async fn test_task_result_repository_filters() -> Result<()> {
    for manager in managers().await? {
        let repo = manager.result_repository("default")?;
        let ok = result_for("jobs.send_email", true, ts(10, 0, 0));
        let failed = result_for("jobs.send_email", false, ts(11, 0, 0));
        let other = result_for("jobs.cleanup", false, ts(12, 0, 0));
        for r in [&ok, &failed, &other] {
            repo.insert(r).await?;
        }

        let fetched = repo.get(&failed.id).await?.unwrap();
        assert_eq!(fetched, failed);

        let all = repo.find(&TaskResultFilter::default()).await?;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, other.id);

        let by_search = repo
            .find(&TaskResultFilter::default().with_search("send_email"))
            .await?;
        assert_eq!(by_search.len(), 2);

        let by_ids = repo
            .find(&TaskResultFilter::default().with_ids(vec![ok.id.clone()]))
            .await?;
        assert_eq!(by_ids.len(), 1);

        let limited = repo.find(&TaskResultFilter::default().with_limit(1)).await?;
        assert_eq!(limited.len(), 1);

        let attempted = repo
            .find(&TaskResultFilter {
                attempt_count_gt: Some(0),
                ..Default::default()
            })
            .await?;
        assert_eq!(attempted.len(), 3);

        let failures = repo
            .find(&TaskResultFilter {
                success: Some(false),
                ..Default::default()
            })
            .await;
        if repo.capabilities().boolean_filter {
            assert_eq!(failures?.len(), 2);
        } else {
            assert!(matches!(failures, Err(QueueError::UnsupportedQuery(_))));
        }

        assert!(repo.delete(&ok.id).await?);
        assert!(!repo.delete(&ok.id).await?);
    }
    Ok(())
}

#[tokio::test]
async fn test_schedule_repository_advance_is_compare_and_swap() -> Result<()> {
    for manager in managers().await? {
        let repo = manager.schedule_repository("default")?;
        let mut schedule = Schedule::new("jobs.report", ScheduleType::Hourly, ts(10, 0, 0));
        schedule.repeats = 3;
        schedule.args = vec![json!("daily")];
        let created = repo.create(&schedule).await?;
        assert!(created.id > 0);
        assert_eq!(created.args, schedule.args);
        assert_eq!(created.schedule_type, ScheduleType::Hourly);

        assert!(repo.find_due(ts(9, 59, 59)).await?.is_empty());
        let due = repo.find_due(ts(10, 0, 0)).await?;
        assert_eq!(due.len(), 1);

        let mut advanced = created.clone();
        advanced.next_run = ts(11, 0, 0);
        advanced.last_run = Some(ts(10, 0, 0));
        advanced.repeats = 2;
        advanced.task_id = Some(new_task_id());

        assert!(repo.advance(&advanced, created.next_run).await?);
        // 同一期望值再次推进必须失败
        assert!(!repo.advance(&advanced, created.next_run).await?);

        let task_id = advanced.task_id.clone().unwrap();
        assert!(repo.record_outcome(created.id, &task_id, true).await?);
        assert!(!repo.record_outcome(created.id, "someone-else", false).await?);

        let stored = repo.get(created.id).await?.unwrap();
        assert_eq!(stored.next_run, ts(11, 0, 0));
        assert_eq!(stored.repeats, 2);
        assert_eq!(stored.success, Some(true));

        let mut exhausted = stored.clone();
        exhausted.repeats = 0;
        exhausted.next_run = ts(12, 0, 0);
        assert!(repo.advance(&exhausted, stored.next_run).await?);
        assert!(repo.find_due(ts(23, 0, 0)).await?.is_empty());

        let hourly = repo
            .find(&ScheduleFilter {
                schedule_type: Some(ScheduleType::Hourly),
                ..Default::default()
            })
            .await?;
        assert_eq!(hourly.len(), 1);

        assert!(repo.delete(created.id).await?);
        assert!(repo.get(created.id).await?.is_none());
    }
    Ok(())
}

#[tokio::test]
async fn test_schedule_restore_requires_claimed_task_id() -> Result<()> {
    for manager in managers().await? {
        let repo = manager.schedule_repository("default")?;
        let mut schedule = Schedule::new("jobs.once", ScheduleType::Once, ts(10, 0, 0));
        schedule.repeats = 1;
        let original = repo.create(&schedule).await?;

        let mut claimed = original.clone();
        claimed.repeats = 0;
        claimed.last_run = Some(ts(10, 0, 0));
        claimed.task_id = Some(new_task_id());
        assert!(repo.advance(&claimed, original.next_run).await?);
        // 已耗尽的调度不能被再次认领
        assert!(!repo.advance(&claimed, original.next_run).await?);

        assert!(!repo.restore(&original, "not-the-claim").await?);
        let claimed_task_id = claimed.task_id.clone().unwrap();
        assert!(repo.restore(&original, &claimed_task_id).await?);

        let stored = repo.get(original.id).await?.unwrap();
        assert_eq!(stored.repeats, 1);
        assert_eq!(stored.task_id, None);
        assert_eq!(stored.last_run, None);
        assert_eq!(repo.find_due(ts(10, 0, 0)).await?.len(), 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_sqlite_file_database_shares_rows_across_connections() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("ormq.db").display());
    let mut config = DatabaseConfig::with_url(url);
    config.max_connections = 4;

    let connection = DatabaseConnection::connect("default", &config).await?;
    connection.pool().migrate().await?;
    let repo = connection.queue_repository();
    repo.insert(&message("default", "jobs.a")).await?;

    let reopened = DatabaseConnection::connect("default", &config).await?;
    assert_eq!(reopened.queue_repository().count("default").await?, 1);
    Ok(())
}

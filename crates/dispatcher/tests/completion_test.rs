use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use ormq_config::ExhaustedPolicy;
use ormq_dispatcher::{
    BrokerOptions, OrmBroker, RecurrenceEngine, ResultLedger, TaskCompletion, TaskOutcome,
};
use ormq_domain::{Clock, NewQueueMessage, NewSchedule, ScheduleType};
use ormq_testing_utils::{EnvelopeBuilder, FixedClock, TestBackend};
use serde_json::json;

#[tokio::test]
async fn test_complete_records_success_and_acknowledges() -> Result<()> {
    for backend in TestBackend::ALL {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        let manager = backend.connect().await?;
        let broker = Arc::new(OrmBroker::with_clock(
            manager.queue_repository("default")?,
            BrokerOptions::default(),
            Arc::new(clock.clone()),
        ));
        let ledger = Arc::new(ResultLedger::new(manager.result_repository("default")?));
        let schedules = manager.schedule_repository("default")?;
        let engine = RecurrenceEngine::with_clock(
            schedules.clone(),
            broker.clone(),
            ExhaustedPolicy::Retain,
            Arc::new(clock.clone()),
        );
        let completion = TaskCompletion::new(ledger.clone(), broker.clone())
            .with_schedules(schedules)
            .with_clock(Arc::new(clock.clone()));

        let schedule = engine
            .create_schedule(NewSchedule::new("jobs.report", ScheduleType::Daily).with_name("report"))
            .await?;
        engine.tick().await?;

        let message = broker.lease("default").await?.unwrap();
        let started = clock.now();
        clock.advance(Duration::seconds(2));
        let record = completion
            .complete(&message, started, TaskOutcome::Success(json!({"rows": 10})))
            .await?;

        assert!(record.success);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.group.as_deref(), Some("report"));
        assert!((record.time_taken() - 2.0).abs() < f64::EPSILON);
        assert_eq!(broker.queue_size("default").await?, 0);
        assert_eq!(ledger.count_successes().await?, 1);
        assert_eq!(engine.get(schedule.id).await?.unwrap().success, Some(true));
    }
    Ok(())
}

#[tokio::test]
async fn test_complete_failure_is_resubmittable() -> Result<()> {
    for backend in TestBackend::ALL {
        let manager = backend.connect().await?;
        let broker = Arc::new(OrmBroker::new(
            manager.queue_repository("default")?,
            BrokerOptions::default(),
        ));
        let ledger = Arc::new(ResultLedger::new(manager.result_repository("default")?));
        let completion = TaskCompletion::new(ledger.clone(), broker.clone());

        let envelope = EnvelopeBuilder::new("jobs.send_email")
            .with_args(vec![json!("a@x.com")])
            .with_attempt_count(1)
            .build();
        broker.enqueue(&envelope).await?;
        let message = broker.lease("default").await?.unwrap();

        let record = completion
            .complete(&message, Utc::now(), TaskOutcome::Failure("SMTP timeout".to_string()))
            .await?;
        assert!(!record.success);
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.short_result(), "SMTP timeout");

        let failures = ledger.query_failures(&Default::default()).await?;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].args, vec![json!("a@x.com")]);
        assert_eq!(broker.queue_size("default").await?, 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_undecodable_payload_becomes_failure_record() -> Result<()> {
    for backend in TestBackend::ALL {
        let manager = backend.connect().await?;
        let queue = manager.queue_repository("default")?;
        let broker = Arc::new(OrmBroker::new(queue.clone(), BrokerOptions::default()));
        let ledger = Arc::new(ResultLedger::new(manager.result_repository("default")?));
        let completion = TaskCompletion::new(ledger.clone(), broker.clone());

        let mut garbage = NewQueueMessage::from_envelope(
            "default",
            &EnvelopeBuilder::new("jobs.broken").build(),
        )?;
        garbage.payload = "{not json".to_string();
        queue.insert(&garbage).await?;

        let message = broker.lease("default").await?.unwrap();
        let record = completion
            .complete(&message, Utc::now(), TaskOutcome::Success(json!(null)))
            .await?;

        assert!(!record.success);
        assert_eq!(record.func, "jobs.broken");
        assert!(record.short_result().contains("解码任务信封失败"));
        assert_eq!(ledger.count_failures().await?, 1);
        assert_eq!(broker.queue_size("default").await?, 0);
    }
    Ok(())
}

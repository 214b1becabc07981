use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ormq_config::AppConfig;
use ormq_dispatcher::{
    AdminRegistry, BrokerOptions, OrmBroker, RecurrenceEngine, ResubmissionOperator, ResultLedger,
    CRON_SUPPORTED,
};
use ormq_infrastructure::DatabaseManager;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 队列、台账与调度的当前规模
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub queue_key: String,
    pub queued: i64,
    pub locked: i64,
    pub successes: usize,
    pub failures: usize,
    pub schedules: usize,
}

/// 主应用程序：按配置把各组件接到对应的数据库别名上
pub struct Application {
    config: AppConfig,
    manager: DatabaseManager,
    broker: Arc<OrmBroker>,
    ledger: Arc<ResultLedger>,
    engine: RecurrenceEngine,
    operator: ResubmissionOperator,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let manager = DatabaseManager::from_config(&config)
            .await
            .context("建立数据库连接失败")?;
        debug!(
            "已连接的数据库别名: {}",
            manager.aliases().collect::<Vec<_>>().join(", ")
        );

        let broker = Arc::new(OrmBroker::new(
            manager.queue_repository(&config.broker.alias)?,
            BrokerOptions::from(&config.broker),
        ));
        let ledger = Arc::new(ResultLedger::new(
            manager.result_repository(&config.ledger.alias)?,
        ));
        let engine = RecurrenceEngine::new(
            manager.schedule_repository(&config.scheduler.alias)?,
            broker.clone(),
            config.scheduler.exhausted_policy,
        );
        let operator =
            ResubmissionOperator::new(ledger.clone(), broker.clone(), config.resubmit.attempt_policy);

        info!(
            "应用初始化完成：代理 {}({})，台账 {}({})，调度 {}",
            config.broker.alias,
            broker.strategy_name(),
            config.ledger.alias,
            ledger.strategy_name(),
            config.scheduler.alias
        );

        Ok(Self {
            config,
            manager,
            broker,
            ledger,
            engine,
            operator,
        })
    }

    pub fn broker(&self) -> &Arc<OrmBroker> {
        &self.broker
    }

    pub fn ledger(&self) -> &Arc<ResultLedger> {
        &self.ledger
    }

    pub fn engine(&self) -> &RecurrenceEngine {
        &self.engine
    }

    pub fn operator(&self) -> &ResubmissionOperator {
        &self.operator
    }

    pub fn admin(&self) -> AdminRegistry {
        AdminRegistry::build(self.config.broker.enabled, CRON_SUPPORTED)
    }

    pub async fn migrate(&self) -> Result<()> {
        self.manager.migrate().await.context("数据库迁移失败")?;
        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let queue_key = self.broker.default_key().to_string();
        Ok(StatusSnapshot {
            queued: self.broker.queue_size(&queue_key).await?,
            locked: self.broker.lock_size(&queue_key).await?,
            successes: self.ledger.count_successes().await?,
            failures: self.ledger.count_failures().await?,
            schedules: self.engine.list(&Default::default()).await?.len(),
            queue_key,
        })
    }

    /// 运行调度轮询，直到收到关闭信号
    pub async fn run_scheduler(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.scheduler.enabled {
            return Err(anyhow::anyhow!("调度引擎被禁用，请检查配置"));
        }
        self.manager.health_check().await.context("数据库健康检查失败")?;
        let interval = Duration::from_secs(self.config.scheduler.poll_interval_seconds);
        self.engine.run(interval, shutdown).await;
        Ok(())
    }

    pub async fn close(&self) {
        self.manager.close().await;
        info!("数据库连接已关闭");
    }
}

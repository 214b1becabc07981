pub mod admin;
pub mod broker;
pub mod completion;
#[cfg(feature = "cron")]
pub mod cron_utils;
pub mod ledger;
pub mod metrics;
pub mod retry_service;
pub mod schedule_calc;
pub mod scheduler;

pub use admin::{AdminAction, AdminRegistry, AdminRow, EntityKind, EntityView};
pub use broker::{
    select_lease_strategy, AtomicClaim, BrokerOptions, LeaseStrategy, OrmBroker, ScanAndSwap,
};
pub use completion::{TaskCompletion, TaskOutcome};
pub use ledger::{select_query_strategy, DirectFilter, FetchAndFilter, QueryStrategy, ResultLedger};
pub use metrics::QueueMetrics;
pub use retry_service::{
    ResubmissionOperator, Resubmission, ResubmitFailure, ResubmitReport, ResubmitStage,
};
pub use schedule_calc::CRON_SUPPORTED;
pub use scheduler::{DispatchRecord, Evaluation, RecurrenceEngine, TickReport};

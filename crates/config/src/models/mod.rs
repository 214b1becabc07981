pub mod app_config;
pub mod database;
pub mod logging;
pub mod queue;

pub use app_config::AppConfig;
pub use database::{CapabilityOverrides, DatabaseConfig};
pub use logging::{LogConfig, LogLevel, OutputFormat};
pub use queue::{
    AttemptPolicy, BrokerConfig, ExhaustedPolicy, LedgerConfig, ResubmitConfig, SchedulerConfig,
};

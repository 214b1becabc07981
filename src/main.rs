use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use ormq_config::{AppConfig, LogLevel, OutputFormat};
use ormq_dispatcher::{EntityKind, ResubmitReport};
use ormq_domain::{QueueError, NewSchedule, ScheduleFilter, ScheduleType, TaskArgs, TaskKwargs, TaskResultFilter};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::Application;
use shutdown::{wait_for_shutdown_signal, ShutdownManager};

#[derive(Debug, Parser)]
#[command(name = "ormq", version, about = "基于数据库的任务队列与周期调度")]
struct Cli {
    /// 配置文件路径；缺省时按 config/ormq.toml、ormq.toml、/etc/ormq/config.toml 查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 覆盖配置中的日志级别
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// 覆盖配置中的日志格式
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 创建队列、台账和调度表
    Migrate,
    /// 运行调度引擎
    Scheduler {
        /// 只执行一轮评估后退出
        #[arg(long)]
        once: bool,
    },
    /// 管理调度定义
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// 列出失败任务
    Failures(ResultListArgs),
    /// 列出成功任务
    Successes(ResultListArgs),
    /// 列出某个分区中的队列消息
    Queue {
        #[arg(long)]
        key: Option<String>,
    },
    /// 重新提交失败任务
    Resubmit(ResubmitArgs),
    /// 队列与台账的概况
    Status,
    /// 打印操作界面的实体注册表
    Admin,
}

#[derive(Debug, Subcommand)]
enum ScheduleCommand {
    Add(ScheduleAddArgs),
    List {
        #[arg(long)]
        cluster: Option<String>,
        /// 类型代码（如 BW）或名称（如 biweekly）
        #[arg(long = "type")]
        schedule_type: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Debug, Args)]
struct ScheduleAddArgs {
    /// 任务函数的点分路径
    func: String,
    #[arg(long = "type", default_value = "O")]
    schedule_type: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    hook: Option<String>,
    /// JSON 数组
    #[arg(long)]
    args: Option<String>,
    /// JSON 对象
    #[arg(long)]
    kwargs: Option<String>,
    #[arg(long)]
    minutes: Option<i32>,
    #[arg(long)]
    cron: Option<String>,
    /// 负数表示不限次数
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    repeats: i32,
    /// RFC3339 时间
    #[arg(long)]
    next_run: Option<DateTime<Utc>>,
    #[arg(long)]
    cluster: Option<String>,
}

#[derive(Debug, Args)]
struct ResultListArgs {
    #[arg(long)]
    group: Option<String>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    limit: Option<i64>,
}

#[derive(Debug, Args)]
#[command(group = clap::ArgGroup::new("selection").required(true).args(["all", "id"]))]
struct ResubmitArgs {
    /// 重新提交所有匹配的失败任务
    #[arg(long)]
    all: bool,
    /// 指定失败记录ID，可重复
    #[arg(long)]
    id: Vec<String>,
    #[arg(long, requires = "all")]
    group: Option<String>,
    #[arg(long, requires = "all")]
    search: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            cli.config.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    let level = cli.log_level.unwrap_or(config.logging.level);
    let format = cli.log_format.unwrap_or(config.logging.format);
    init_logging(level, format)?;

    let app = Application::new(config).await?;
    let outcome = run_command(&app, cli.command).await;
    app.close().await;
    outcome
}

async fn run_command(app: &Application, command: Commands) -> Result<()> {
    match command {
        Commands::Migrate => app.migrate().await,
        Commands::Scheduler { once } => run_scheduler(app, once).await,
        Commands::Schedule(command) => run_schedule_command(app, command).await,
        Commands::Failures(args) => {
            let records = app.ledger().query_failures(&result_filter(args)).await?;
            print_view(app, EntityKind::Failure, &records)
        }
        Commands::Successes(args) => {
            let records = app.ledger().query_successes(&result_filter(args)).await?;
            print_view(app, EntityKind::Success, &records)
        }
        Commands::Queue { key } => {
            let key = key.unwrap_or_else(|| app.broker().default_key().to_string());
            let messages = app.broker().list(&key).await?;
            print_view(app, EntityKind::Queue, &messages)
        }
        Commands::Resubmit(args) => run_resubmit(app, args).await,
        Commands::Status => {
            let status = app.status().await?;
            println!("queue[{}]: {} queued, {} locked", status.queue_key, status.queued, status.locked);
            println!("results: {} successful, {} failed", status.successes, status.failures);
            println!("schedules: {}", status.schedules);
            Ok(())
        }
        Commands::Admin => {
            print!("{}", app.admin().render());
            Ok(())
        }
    }
}

async fn run_scheduler(app: &Application, once: bool) -> Result<()> {
    if once {
        let report = app.engine().tick().await?;
        info!(
            "评估 {} 个调度，派发 {} 个，耗尽 {} 个",
            report.evaluated,
            report.dispatched_count(),
            report.exhausted
        );
        for (schedule_id, e) in &report.errors {
            warn!("调度 {} 评估失败: {}", schedule_id, e);
        }
        return Ok(());
    }

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    let scheduler = app.run_scheduler(shutdown_rx);
    tokio::pin!(scheduler);

    tokio::select! {
        result = &mut scheduler => return result,
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
    }

    shutdown_manager.shutdown().await;
    match tokio::time::timeout(Duration::from_secs(30), scheduler).await {
        Ok(result) => {
            if let Err(e) = &result {
                error!("调度引擎关闭时发生错误: {e}");
            } else {
                info!("调度引擎已优雅关闭");
            }
            result
        }
        Err(_) => {
            warn!("调度引擎关闭超时，强制退出");
            Ok(())
        }
    }
}

async fn run_schedule_command(app: &Application, command: ScheduleCommand) -> Result<()> {
    match command {
        ScheduleCommand::Add(args) => {
            let schedule = app.engine().create_schedule(new_schedule(args)?).await?;
            println!("created schedule {} next run {}", schedule.id, schedule.next_run.to_rfc3339());
            Ok(())
        }
        ScheduleCommand::List {
            cluster,
            schedule_type,
            search,
            limit,
        } => {
            let filter = ScheduleFilter {
                cluster,
                schedule_type: schedule_type
                    .as_deref()
                    .map(str::parse::<ScheduleType>)
                    .transpose()?,
                search,
                limit,
            };
            let schedules = app.engine().list(&filter).await?;
            print_view(app, EntityKind::Schedule, &schedules)
        }
        ScheduleCommand::Delete { id } => {
            if app.engine().delete_schedule(id).await? {
                println!("deleted schedule {id}");
                Ok(())
            } else {
                Err(QueueError::schedule_not_found(id).into())
            }
        }
    }
}

async fn run_resubmit(app: &Application, args: ResubmitArgs) -> Result<()> {
    let report = if args.all {
        let mut filter = TaskResultFilter::default();
        if let Some(group) = args.group {
            filter = filter.with_group(group);
        }
        if let Some(search) = args.search {
            filter = filter.with_search(search);
        }
        app.operator().resubmit_all(&filter).await?
    } else {
        app.operator().resubmit_ids(&args.id).await?
    };
    print_resubmit_report(&report);

    match report.failed {
        None => Ok(()),
        Some(failure) => Err(anyhow::anyhow!(
            "重新提交 {} 在{}阶段失败: {}",
            failure.failure_id,
            failure.stage,
            failure.error
        )),
    }
}

fn print_resubmit_report(report: &ResubmitReport) {
    for item in &report.resubmitted {
        println!("resubmitted {} as task {} (message {})", item.failure_id, item.task_id, item.message_id);
    }
    for id in &report.skipped {
        println!("skipped {id}");
    }
    for id in &report.untouched {
        println!("untouched {id}");
    }
}

fn new_schedule(args: ScheduleAddArgs) -> Result<NewSchedule> {
    let schedule_type: ScheduleType = args.schedule_type.parse()?;
    let mut request = NewSchedule::new(args.func, schedule_type).with_repeats(args.repeats);

    if let Some(name) = args.name {
        request = request.with_name(name);
    }
    if let Some(hook) = args.hook {
        request = request.with_hook(hook);
    }
    if let Some(raw) = args.args {
        let parsed: TaskArgs = serde_json::from_str(&raw).context("--args 必须是JSON数组")?;
        request = request.with_args(parsed);
    }
    if let Some(raw) = args.kwargs {
        let parsed: TaskKwargs = serde_json::from_str(&raw).context("--kwargs 必须是JSON对象")?;
        request = request.with_kwargs(parsed);
    }
    if let Some(minutes) = args.minutes {
        request = request.with_minutes(minutes);
    }
    if let Some(cron) = args.cron {
        request = request.with_cron(cron);
    }
    if let Some(next_run) = args.next_run {
        request = request.with_next_run(next_run);
    }
    if let Some(cluster) = args.cluster {
        request = request.with_cluster(cluster);
    }
    Ok(request)
}

fn result_filter(args: ResultListArgs) -> TaskResultFilter {
    let mut filter = TaskResultFilter::default();
    if let Some(group) = args.group {
        filter = filter.with_group(group);
    }
    if let Some(search) = args.search {
        filter = filter.with_search(search);
    }
    if let Some(limit) = args.limit {
        filter = filter.with_limit(limit);
    }
    filter
}

fn print_view<T: ormq_dispatcher::AdminRow>(app: &Application, kind: EntityKind, rows: &[T]) -> Result<()> {
    let registry = app.admin();
    let view = registry
        .get(kind)
        .ok_or_else(|| anyhow::anyhow!("{} 未在操作界面注册", kind.label()))?;
    print!("{}", view.render_rows(rows));
    Ok(())
}

/// 初始化日志系统；`RUST_LOG` 优先于配置
fn init_logging(level: LogLevel, format: OutputFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        OutputFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("初始化JSON日志格式失败")?,
        OutputFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        OutputFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("初始化文本日志格式失败")?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resubmit_requires_selection() {
        assert!(Cli::try_parse_from(["ormq", "resubmit"]).is_err());
        assert!(Cli::try_parse_from(["ormq", "resubmit", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["ormq", "resubmit", "--id", "a", "--id", "b"]).is_ok());
        assert!(Cli::try_parse_from(["ormq", "resubmit", "--id", "a", "--group", "g"]).is_err());
    }

    #[test]
    fn test_schedule_add_arguments() {
        let cli = Cli::try_parse_from([
            "ormq",
            "schedule",
            "add",
            "jobs.report",
            "--type",
            "C",
            "--cron",
            "0 0 9 * * *",
            "--args",
            "[1, \"x\"]",
            "--repeats",
            "-1",
        ])
        .unwrap();
        let Commands::Schedule(ScheduleCommand::Add(args)) = cli.command else {
            panic!("expected schedule add");
        };
        let request = new_schedule(args).unwrap();
        assert_eq!(request.schedule_type, ScheduleType::Cron);
        assert_eq!(request.cron.as_deref(), Some("0 0 9 * * *"));
        assert_eq!(request.args.len(), 2);
        assert_eq!(request.repeats, -1);
    }

    #[test]
    fn test_unknown_schedule_type_is_rejected() {
        let cli = Cli::try_parse_from(["ormq", "schedule", "add", "jobs.x", "--type", "Z"]).unwrap();
        let Commands::Schedule(ScheduleCommand::Add(args)) = cli.command else {
            panic!("expected schedule add");
        };
        assert!(new_schedule(args).is_err());
    }

    #[test]
    fn test_log_overrides_parse() {
        let cli = Cli::try_parse_from(["ormq", "-l", "debug", "--log-format", "json", "status"]).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(OutputFormat::Json));
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bddbench_client::{parse_range, HttpInfluxApi, InfluxApi, ResultSize};
use bddbench_core::{BenchConfig, BenchError, BenchResult, BucketSet, StopCondition};
use bddbench_engine::context_store;
use bddbench_engine::scenario::HEALTH_PROBES;
use bddbench_engine::{
    guard_target, verify_deleted, BenchEnv, CleanupMode, CleanupScenario, CleanupSummary,
    DeleteMode, DeleteScenario, KpiExport, LedgerFile, MultiWriteScenario, ProbeKind,
    ProbeScenario, QueryScenario, QuerySource, ReportWriter, ScenarioOutcome, UserScenario,
    WriteScenario, MAIN, SUT,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod args;
mod summary;

use args::{QueryArgs, StopArgs, WorkloadArgs};

#[derive(Parser, Debug)]
#[command(name = "bddbench")]
#[command(about = "Benchmark driver for InfluxDB v2 compatible databases", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; otherwise ./config/bddbench.* and BDDBENCH_* variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Do not export KPI records to the results database
    #[arg(long, global = true)]
    no_export: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write synthetic points into one bucket
    Write(WriteCmd),
    /// Write the same workload into several buckets at once
    MultiWrite(MultiWriteCmd),
    /// Run concurrent Flux queries
    Query(QueryCmd),
    /// Delete benchmark data and measure the delete
    Delete(DeleteCmd),
    /// Create, list and delete users
    Users(UsersCmd),
    /// Load GET /api/v2/me
    Me(ProbeCmd),
    /// Load GET /health
    Health(ProbeCmd),
    /// Remove what earlier runs recorded in the state file
    Cleanup(CleanupCmd),
}

#[derive(Args, Debug)]
struct WriteCmd {
    #[arg(long, default_value = "write")]
    scenario_id: String,

    /// Target bucket; defaults to sut.bucket
    #[arg(long)]
    bucket: Option<String>,

    /// Where to save the run context
    #[arg(long)]
    context: Option<PathBuf>,

    #[command(flatten)]
    workload: WorkloadArgs,
}

#[derive(Args, Debug)]
struct MultiWriteCmd {
    #[arg(long, default_value = "multi_write")]
    scenario_id: String,

    #[arg(long, default_value = "bddbench_multi")]
    bucket_prefix: String,

    #[arg(long, default_value_t = 3)]
    bucket_count: usize,

    #[arg(long)]
    context: Option<PathBuf>,

    #[command(flatten)]
    workload: WorkloadArgs,
}

#[derive(Args, Debug)]
struct QueryCmd {
    #[arg(long, default_value = "query")]
    scenario_id: String,

    /// Query the buckets and run of this context file
    #[arg(long, conflicts_with = "bucket")]
    context: Option<PathBuf>,

    #[arg(long)]
    bucket: Option<String>,

    #[arg(long, default_value = "bddbench")]
    measurement: String,

    /// Queried time range, e.g. `1h`
    #[arg(long, default_value = "1h", value_parser = parse_range)]
    range: Duration,

    #[arg(long, default_value = "small")]
    result_size: ResultSize,

    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[command(flatten)]
    stop: StopArgs,

    #[command(flatten)]
    query: QueryArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeleteKind {
    RunScoped,
    Range,
    WipeAll,
}

#[derive(Args, Debug)]
struct DeleteCmd {
    #[arg(long, default_value = "delete")]
    scenario_id: String,

    #[arg(long, value_enum, default_value = "run-scoped")]
    mode: DeleteKind,

    /// Context file of the run to delete (run-scoped)
    #[arg(long)]
    context: Option<PathBuf>,

    #[arg(long)]
    bucket: Option<String>,

    #[arg(long)]
    measurement: Option<String>,

    /// Range mode window, e.g. `30m`, `1h`, `7d`
    #[arg(long, default_value = "1h")]
    range: String,

    /// Extra delete predicate (range mode)
    #[arg(long)]
    predicate: Option<String>,

    /// Health requests before and after a range delete
    #[arg(long, default_value_t = HEALTH_PROBES)]
    health_probes: usize,

    /// Log the delete instead of sending it
    #[arg(long)]
    dry_run: bool,

    /// Fail unless no point of the run remains (run-scoped)
    #[arg(long)]
    verify: bool,
}

#[derive(Args, Debug)]
struct UsersCmd {
    #[arg(long, default_value = "users")]
    scenario_id: String,

    #[arg(long, default_value_t = 10)]
    num_users: usize,

    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[arg(long, default_value = "bddbench-user")]
    name_prefix: String,
}

#[derive(Args, Debug)]
struct ProbeCmd {
    /// Defaults to the subcommand name
    #[arg(long)]
    scenario_id: Option<String>,

    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[command(flatten)]
    stop: StopArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CleanupKind {
    Data,
    Buckets,
}

#[derive(Args, Debug)]
struct CleanupCmd {
    /// `sut` or `main`
    #[arg(long, default_value = SUT)]
    target: String,

    #[arg(long, value_enum, default_value = "data")]
    mode: CleanupKind,

    /// Only these buckets
    #[arg(long, value_delimiter = ',')]
    buckets: Vec<String>,

    /// Actually delete; without it the plan is only printed
    #[arg(long)]
    yes: bool,

    /// Permit cleanup of the results database
    #[arg(long)]
    allow_main: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = match &cli.config {
        Some(path) => BenchConfig::from_file(path)?,
        None => BenchConfig::load()?,
    };
    let ledger = LedgerFile::new(&config.report.state_file);

    if let Command::Cleanup(cmd) = &cli.command {
        let summary = cleanup(&config, &ledger, cmd).await?;
        summary::print_cleanup(&summary, !cmd.yes);
        return Ok(());
    }

    let sut: Arc<dyn InfluxApi> = Arc::new(HttpInfluxApi::new(&config.sut)?);
    let mut reports = ReportWriter::from_config(&config.report);
    let export_bucket = match (&config.main, cli.no_export) {
        (Some(main), false) => {
            reports = reports.with_export(KpiExport {
                api: Arc::new(HttpInfluxApi::new(main)?),
                bucket: main.bucket.clone(),
                strict: config.report.export_strict,
            });
            Some(main.bucket.clone())
        }
        _ => None,
    };
    let env = BenchEnv::new(sut, config.sut.url.as_str(), reports, ledger)
        .with_run_id(config.run_id());

    info!(
        sut = %config.sut.url,
        run_id = %env.run_id,
        report_dir = %config.report.dir.display(),
        "Starting bddbench"
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("Running {}...", command_name(&cli.command)));

    let result = run(&cli.command, &env, &config).await;
    pb.finish_and_clear();

    match result {
        Ok(outcome) => {
            if let Some(bucket) = export_bucket {
                track_export(&env, &outcome, &bucket).await?;
            }
            summary::print_outcome(command_name(&cli.command), &outcome);
            Ok(())
        }
        Err(e) => {
            eprintln!("\n❌ {} failed: {}", command_name(&cli.command), e);
            Err(e.into())
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Write(_) => "write",
        Command::MultiWrite(_) => "multi-write",
        Command::Query(_) => "query",
        Command::Delete(_) => "delete",
        Command::Users(_) => "users",
        Command::Me(_) => "me",
        Command::Health(_) => "health",
        Command::Cleanup(_) => "cleanup",
    }
}

async fn run(command: &Command, env: &BenchEnv, config: &BenchConfig) -> BenchResult<ScenarioOutcome> {
    let default_bucket = || config.sut.bucket.clone();
    match command {
        Command::Write(cmd) => {
            let bucket = cmd.bucket.clone().unwrap_or_else(default_bucket);
            let mut scenario = WriteScenario::new(cmd.scenario_id.as_str(), cmd.workload.to_spec()?, bucket);
            if let Some(path) = &cmd.context {
                scenario = scenario.with_context_path(path);
            }
            scenario.run(env).await
        }
        Command::MultiWrite(cmd) => {
            let set = BucketSet::new(cmd.bucket_prefix.as_str(), cmd.bucket_count)?;
            let mut scenario = MultiWriteScenario::new(cmd.scenario_id.as_str(), cmd.workload.to_spec()?, set);
            if let Some(path) = &cmd.context {
                scenario = scenario.with_context_path(path);
            }
            scenario.run(env).await
        }
        Command::Query(cmd) => {
            let source = match &cmd.context {
                Some(path) => QuerySource::Context {
                    path: path.clone(),
                    measurement: cmd.measurement.clone(),
                },
                None => QuerySource::Bucket {
                    bucket: cmd.bucket.clone().unwrap_or_else(default_bucket),
                    measurement: cmd.measurement.clone(),
                },
            };
            QueryScenario {
                scenario_id: cmd.scenario_id.clone(),
                source,
                kind: cmd.query.to_kind()?,
                time_range: cmd.range,
                size: cmd.result_size,
                workers: cmd.workers,
                stop: cmd.stop.resolve(StopCondition::Count { total: 100 }),
            }
            .run(env)
            .await
        }
        Command::Delete(cmd) => delete(cmd, env, config).await,
        Command::Users(cmd) => {
            let mut scenario = UserScenario::new(cmd.scenario_id.as_str(), cmd.num_users, cmd.workers);
            scenario.name_prefix = cmd.name_prefix.clone();
            scenario.run(env).await
        }
        Command::Me(cmd) => {
            let stop = cmd.stop.resolve(StopCondition::Duration {
                duration: Duration::from_secs(10),
            });
            let id = cmd.scenario_id.clone().unwrap_or_else(|| "me".to_string());
            ProbeScenario::new(id, ProbeKind::Me, cmd.workers, stop).run(env).await
        }
        Command::Health(cmd) => {
            let stop = cmd.stop.resolve(StopCondition::Count { total: 100 });
            let id = cmd.scenario_id.clone().unwrap_or_else(|| "health".to_string());
            ProbeScenario::new(id, ProbeKind::Health, cmd.workers, stop).run(env).await
        }
        Command::Cleanup(_) => Err(BenchError::validation(
            "cleanup does not produce a benchmark outcome",
        )),
    }
}

async fn delete(cmd: &DeleteCmd, env: &BenchEnv, config: &BenchConfig) -> BenchResult<ScenarioOutcome> {
    let bucket = || cmd.bucket.clone().unwrap_or_else(|| config.sut.bucket.clone());
    let context_path = || {
        cmd.context
            .clone()
            .unwrap_or_else(|| context_store::default_path(&config.report.dir, "write"))
    };
    let mode = match cmd.mode {
        DeleteKind::RunScoped => DeleteMode::RunScoped {
            context_path: context_path(),
            measurement: cmd.measurement.clone(),
        },
        DeleteKind::Range => DeleteMode::Range {
            bucket: bucket(),
            range: cmd.range.clone(),
            measurement: cmd.measurement.clone(),
            predicate: cmd.predicate.clone(),
            health_probes: cmd.health_probes,
        },
        DeleteKind::WipeAll => DeleteMode::WipeAll {
            bucket: bucket(),
            measurement: cmd.measurement.clone(),
        },
    };

    let outcome = DeleteScenario::new(cmd.scenario_id.as_str(), mode.clone())
        .dry_run(cmd.dry_run)
        .run(env)
        .await?;

    if let (true, false, DeleteMode::RunScoped { context_path, .. }) = (cmd.verify, cmd.dry_run, &mode) {
        let context = context_store::load(context_path).await?;
        verify_deleted(&env.api, &context).await?;
        info!(run_id = %context.run_id, "Verified: no points of the run remain");
    }
    Ok(outcome)
}

/// Records KPI points exported under a run id so `cleanup --target main` can
/// find them.
async fn track_export(env: &BenchEnv, outcome: &ScenarioOutcome, bucket: &str) -> BenchResult<()> {
    if !outcome.published.exported || !outcome.record.tags.contains_key("run_id") {
        return Ok(());
    }
    env.ledger
        .update(|ledger| {
            ledger.record_write(MAIN, bucket, &outcome.record.measurement, outcome.run_id);
        })
        .await?;
    Ok(())
}

async fn cleanup(
    config: &BenchConfig,
    ledger: &LedgerFile,
    cmd: &CleanupCmd,
) -> Result<CleanupSummary, Box<dyn std::error::Error>> {
    guard_target(&cmd.target, cmd.allow_main)?;
    let endpoint = if cmd.target == MAIN {
        config
            .main
            .as_ref()
            .ok_or("cleanup of `main` needs a [main] section in the configuration")?
    } else {
        &config.sut
    };
    let api: Arc<dyn InfluxApi> = Arc::new(HttpInfluxApi::new(endpoint)?);
    let mode = match cmd.mode {
        CleanupKind::Data => CleanupMode::DeleteData,
        CleanupKind::Buckets => CleanupMode::DeleteBuckets,
    };
    let summary = CleanupScenario::new(cmd.target.as_str(), mode)
        .buckets(cmd.buckets.clone())
        .dry_run(!cmd.yes)
        .run(&api, ledger)
        .await?;
    Ok(summary)
}

/// Initialize logging
fn init_logging(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,bddbench=debug"));
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

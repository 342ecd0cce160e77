use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sfh_adapters::SkillsFutureApi;
use sfh_core::{all_tables, table_spec, TableSpec};
use sfh_storage::{HttpFetcher, MemorySink, ModelTarget, PgSink, TableSink};
use sfh_sync::{maybe_build_scheduler, run_preflight, RunReport, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "sfh")]
#[command(about = "SkillsFuture course-catalog harvester")]
struct Cli {
    /// Keep tables in memory instead of PostgreSQL.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Harvest courses and details, then reconcile every table.
    Sync,
    /// Harvest the course search, then reconcile the course tables.
    HarvestCourses {
        /// Resume from this row offset (rounded down to a page boundary).
        #[arg(long, default_value_t = 0)]
        start_row: usize,
    },
    /// Harvest course details for known courses, then reconcile the detail tables.
    HarvestDetails {
        /// Resume from this course reference number (inclusive).
        #[arg(long)]
        start_from_course: Option<String>,
    },
    /// Keep the latest row per natural key.
    Reconcile {
        #[arg(long)]
        table: Option<String>,
    },
    Preflight,
    /// Materialize the models listed in models.yaml.
    Model,
    /// Write every table as parquet plus a manifest.
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Run the full sync on the configured cron schedule until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let command = cli.command.unwrap_or(Commands::Sync);

    if cli.dry_run {
        info!("dry run: tables are kept in memory");
        return run(command, config, Arc::new(MemorySink::new())).await;
    }
    let connected = if matches!(command, Commands::Preflight) {
        PgSink::connect_lazy(&config.database_url, &config.schema)
    } else {
        PgSink::connect(&config.database_url, &config.schema).await
    };
    let sink = connected.context("connecting to PostgreSQL")?;
    run(command, config, Arc::new(sink)).await
}

async fn run<S>(command: Commands, config: SyncConfig, sink: Arc<S>) -> Result<()>
where
    S: TableSink + ModelTarget + 'static,
{
    if let Commands::Preflight = command {
        let http = HttpFetcher::new(config.preflight_http_config())?;
        let api = SkillsFutureApi::new(http, config.endpoints.clone());
        let report = run_preflight(&config, &api, sink.as_ref()).await;
        for check in &report.checks {
            let mark = if check.passed { "ok" } else { "FAILED" };
            println!("{mark:>6}  {:<14} {}", check.name, check.detail);
        }
        if !report.all_passed() {
            bail!("preflight failed");
        }
        return Ok(());
    }

    config.validate().context("invalid configuration")?;
    let http = HttpFetcher::new(config.http_config())?;
    let api = Arc::new(SkillsFutureApi::new(http, config.endpoints.clone()));
    let pipeline = SyncPipeline::new(config, api, sink.clone());

    match command {
        Commands::Sync => print_run(&pipeline.run_full().await?),
        Commands::HarvestCourses { start_row } => print_run(&pipeline.run_courses(start_row).await?),
        Commands::HarvestDetails { start_from_course } => {
            print_run(&pipeline.run_details(start_from_course.as_deref()).await?)
        }
        Commands::Reconcile { table } => {
            let tables: Vec<TableSpec> = match table {
                Some(name) => vec![table_spec(&name).with_context(|| format!("unknown table `{name}`"))?],
                None => all_tables().collect(),
            };
            let report = pipeline.reconcile(tables).await;
            print_json(&report)?;
            if !report.is_clean() {
                bail!("{} table(s) failed to reconcile", report.failed.len());
            }
            Ok(())
        }
        Commands::Model => {
            let report = pipeline.build_models(sink.as_ref()).await?;
            print_json(&report)?;
            if !report.is_clean() {
                bail!("{} model(s) failed", report.failed.len());
            }
            Ok(())
        }
        Commands::Export { out } => {
            let manifest = pipeline.export(&out).await?;
            println!("export complete: manifest={}", manifest.display());
            Ok(())
        }
        Commands::Schedule => {
            let Some(mut sched) = maybe_build_scheduler(Arc::new(pipeline)).await? else {
                bail!("scheduler is disabled; set SFH_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
            Ok(())
        }
        Commands::Preflight => Ok(()),
    }
}

fn print_run(report: &RunReport) -> Result<()> {
    for harvest in &report.harvests {
        println!(
            "harvest complete: run_id={} kind={:?} requests={} rows={} skipped={}",
            report.run_id,
            harvest.kind,
            harvest.requests,
            harvest.rows_written,
            harvest.skipped.len()
        );
    }
    println!(
        "reconcile complete: tables={} rows_removed={} failed={}",
        report.reconcile.reconciled.len(),
        report.reconcile.rows_removed(),
        report.reconcile.failed.len()
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing report")?);
    Ok(())
}

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use meetingbank_etl::common::constants::RUN_CONTEXT_KEY;
use meetingbank_etl::config::EtlConfig;
use meetingbank_etl::domain::RunContext;
use meetingbank_etl::observability::{self, metrics_push};
use meetingbank_etl::pipeline::staging::StagingArea;
use meetingbank_etl::pipeline::{
    build_meeting_dag, DagRunResult, DagRunner, PipelineStores, TaskContext, TaskState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "meetingbank_etl")]
#[command(about = "Meeting transcript ETL: extract, clean, transform, load, analyze and report")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole DAG once
    Run {
        /// Run identifier; derived from the execution date or start time when omitted
        #[arg(long)]
        run_id: Option<String>,
        /// Logical date of the run (YYYY-MM-DD); defaults to today
        #[arg(long)]
        execution_date: Option<NaiveDate>,
        /// Override the configured source location
        #[arg(long)]
        source: Option<String>,
        /// Write the Prometheus metrics snapshot to this file when the run ends
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },
    /// Run a single step, reading its inputs from the staged outputs of an earlier invocation
    Task {
        /// Step name (see `tasks`)
        name: String,
        #[arg(long)]
        run_id: String,
        /// Logical date, used only when the run has no staged context yet
        #[arg(long)]
        execution_date: Option<NaiveDate>,
    },
    /// List steps and their predecessors
    Tasks,
    /// Apply the relational schema
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = observability::init_logging("logs");
    observability::init();

    let cli = Cli::parse();
    let mut config = EtlConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            run_id,
            execution_date,
            source,
            metrics_out,
        } => {
            if let Some(source) = source {
                config.source.location = source;
            }
            let run = run_context(&config, run_id, execution_date);
            let stores = PipelineStores::from_config(&config)?;
            let dag = Arc::new(build_meeting_dag(&config, &stores)?);
            let ctx = Arc::new(task_context(&config, run));
            ctx.publish(RUN_CONTEXT_KEY, ctx.run()).await?;

            let runner = DagRunner::new(dag, config.retry_policy());
            let result = runner.run(ctx).await;
            print_summary(&result);
            metrics_push::push_run_summary(&result).await;

            if let Some(path) = metrics_out {
                if let Some(rendered) = observability::render() {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
                }
            }

            if !result.succeeded() {
                let reason = result
                    .first_failure()
                    .and_then(|s| s.message.clone())
                    .unwrap_or_else(|| "unknown failure".to_string());
                bail!("DAG run {} failed: {}", result.run_id, reason);
            }
        }
        Commands::Task {
            name,
            run_id,
            execution_date,
        } => {
            let stores = PipelineStores::from_config(&config)?;
            let dag = Arc::new(build_meeting_dag(&config, &stores)?);

            let staged = if config.staging.enabled {
                StagingArea::new(&config.staging.root)
                    .get::<RunContext>(&run_id, RUN_CONTEXT_KEY)
                    .await
                    .ok()
            } else {
                None
            };
            let run = staged.unwrap_or_else(|| run_context(&config, Some(run_id), execution_date));
            let ctx = Arc::new(task_context(&config, run));
            ctx.publish(RUN_CONTEXT_KEY, ctx.run()).await?;

            let runner = DagRunner::new(dag, config.retry_policy());
            let summary = runner.run_single(&name, ctx).await?;
            println!(
                "{}: {} after {} attempt(s), {} processed",
                summary.step,
                summary.state.as_str(),
                summary.attempts,
                summary.processed_count
            );
            if summary.state != TaskState::Success {
                bail!(
                    "Step '{}' failed: {}",
                    summary.step,
                    summary.message.unwrap_or_default()
                );
            }
        }
        Commands::Tasks => {
            let dag = build_meeting_dag(&config, &PipelineStores::in_memory())?;
            println!("DAG {} (schedule {})", dag.dag_id(), config.dag.schedule);
            for step in dag.steps() {
                let deps = step.dependencies();
                if deps.is_empty() {
                    println!("  {}", step.step_name());
                } else {
                    println!("  {} <- {}", step.step_name(), deps.join(", "));
                }
            }
        }
        Commands::InitDb => {
            let stores = PipelineStores::from_config(&config)?;
            stores.relational.ensure_schema().await?;
            info!("Relational schema applied at {}", config.relational.sqlite_path);
            println!("✅ Schema applied to {}", config.relational.sqlite_path);
        }
    }

    Ok(())
}

fn run_context(config: &EtlConfig, run_id: Option<String>, execution_date: Option<NaiveDate>) -> RunContext {
    let now = Utc::now();
    match (run_id, execution_date) {
        (Some(run_id), date) => RunContext::new(
            config.dag.dag_id.clone(),
            run_id,
            date.unwrap_or_else(|| now.date_naive()),
            now,
        ),
        (None, Some(date)) => RunContext::new(
            config.dag.dag_id.clone(),
            format!("scheduled__{}", date.format("%Y-%m-%d")),
            date,
            now,
        ),
        (None, None) => RunContext::manual(config.dag.dag_id.clone(), now),
    }
}

fn task_context(config: &EtlConfig, run: RunContext) -> TaskContext {
    let ctx = TaskContext::new(run);
    if config.staging.enabled {
        ctx.with_staging(StagingArea::new(&config.staging.root))
    } else {
        ctx
    }
}

fn print_summary(result: &DagRunResult) {
    println!("\n📊 DAG run {} ({})", result.run_id, result.state.label());
    for step in &result.steps {
        println!(
            "   {:<22} {:<16} attempts={} processed={} failed={}",
            step.step,
            step.state.as_str(),
            step.attempts,
            step.processed_count,
            step.failed_count
        );
        for warning in &step.warnings {
            println!("      ⚠️  {}", warning);
        }
    }
    if !result.succeeded() {
        if let Some(failed) = result.first_failure() {
            error!(
                "Step '{}' failed: {}",
                failed.step,
                failed.message.as_deref().unwrap_or_default()
            );
        }
    }
}

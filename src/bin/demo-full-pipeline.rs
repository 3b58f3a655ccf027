/// Demo: run the whole meeting DAG over synthetic records with in-memory stores
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use meetingbank_etl::config::EtlConfig;
use meetingbank_etl::domain::RunContext;
use meetingbank_etl::observability;
use meetingbank_etl::pipeline::{build_meeting_dag, DagRunner, PipelineStores, RetryPolicy, TaskContext};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const CITIES: &[&str] = &["Alameda", "Boston", "Denver", "King County", "Long Beach", "Seattle"];
const SPEAKERS: &[&str] = &["Mayor", "Council Member Lee", "City Clerk", "Public Commenter", "Chair"];
const TOPICS: &[&str] = &[
    "budget amendment for parks maintenance",
    "zoning variance on the waterfront parcel",
    "public safety staffing levels",
    "affordable housing levy renewal",
    "transit corridor design review",
    "library branch opening hours",
];

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = observability::init_logging("logs");
    observability::init();
    dotenv::dotenv().ok();

    // Optional first argument: number of synthetic records
    let count: usize = std::env::args()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(25);

    let out_dir = PathBuf::from("demo_output");
    std::fs::create_dir_all(&out_dir).context("Failed to create demo_output")?;
    let source = out_dir.join("synthetic_meetings.csv");
    write_synthetic_csv(&source, count)?;
    info!("Wrote {} synthetic meetings to {}", count, source.display());

    let mut config = EtlConfig::default();
    config.source.location = source.to_string_lossy().to_string();
    config.reports.dir = out_dir.join("reports");
    config.reports.overwrite = true;

    let stores = PipelineStores::in_memory();
    let dag = Arc::new(build_meeting_dag(&config, &stores)?);
    let run = RunContext::manual(config.dag.dag_id.clone(), Utc::now());
    let ctx = Arc::new(TaskContext::new(run));

    let result = DagRunner::new(dag, RetryPolicy::no_retries()).run(ctx).await;

    println!("\n📊 Demo run {} finished in state {}", result.run_id, result.state.label());
    for step in &result.steps {
        println!(
            "   {:<22} {:<16} processed={} failed={}",
            step.step,
            step.state.as_str(),
            step.processed_count,
            step.failed_count
        );
    }
    println!("\n📁 Reports written under {}", config.reports.dir.display());

    if !result.succeeded() {
        anyhow::bail!("demo run failed");
    }
    Ok(())
}

/// A few rows are deliberately broken so the cleaner has something to drop
fn write_synthetic_csv(path: &Path, count: usize) -> Result<()> {
    let mut rng = rand::thread_rng();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["meeting_id", "city", "meeting_date", "speaker", "transcript", "summary", "agenda"])?;

    let base = NaiveDate::from_ymd_opt(2023, 1, 2).context("invalid base date")?;
    for i in 0..count {
        let city = CITIES.choose(&mut rng).copied().unwrap_or("Seattle");
        let speaker = SPEAKERS.choose(&mut rng).copied().unwrap_or("Chair");
        let date = base + Duration::days(rng.gen_range(0..365));
        let topics: Vec<&str> = TOPICS.choose_multiple(&mut rng, 2).copied().collect();
        let transcript = format!(
            "The {} meeting is called to order. Discussion of the {} and the {}. Motion carries.",
            city,
            topics.join(" then "),
            topics.last().copied().unwrap_or("agenda")
        );
        let summary = if rng.gen_bool(0.5) {
            format!("Council discussed the {}.", topics[0])
        } else {
            String::new()
        };

        let id = format!("{}_{:04}", city.to_lowercase().replace(' ', "_"), i);
        let date_text = date.format("%Y-%m-%d").to_string();
        let agenda = topics.join("; ");
        let (date_cell, transcript_cell) = match i % 10 {
            // missing transcript
            3 => (date_text.as_str(), ""),
            // unparsable date
            7 => ("sometime in spring", transcript.as_str()),
            _ => (date_text.as_str(), transcript.as_str()),
        };
        let row = [
            id.as_str(),
            city,
            date_cell,
            speaker,
            transcript_cell,
            summary.as_str(),
            agenda.as_str(),
        ];
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

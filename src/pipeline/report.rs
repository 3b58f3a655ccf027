use crate::common::constants::{DEFAULT_DETAILED_REPORT_NAME, DEFAULT_REPORT_NAME};
use crate::common::error::{EtlError, Result};
use crate::domain::{format_number, AnalyticsResult, MetricValue, RunContext};
use crate::observability::metrics;
use crate::pipeline::analytics::{AnalyticsRun, TOTAL_CITIES, TOTAL_DOCUMENTS, TOTAL_MEETINGS};
use crate::pipeline::clean::CleanReport;
use crate::pipeline::load::LoadReport;
use crate::pipeline::orchestrator::StepSummary;
use askama::Template;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub struct StatRow {
    pub label: String,
    pub value: String,
}

impl StatRow {
    fn new(label: impl Into<String>, value: impl ToString) -> Self {
        Self {
            label: label.into(),
            value: value.to_string(),
        }
    }
}

pub struct TaskRow {
    pub name: String,
    pub state: String,
    pub attempts: u32,
    pub processed: usize,
    pub failed: usize,
    pub message: String,
    /// Step metadata as `key=value` pairs
    pub details: String,
}

pub struct DistributionView {
    pub name: String,
    pub label_header: &'static str,
    pub value_header: &'static str,
    /// In display order
    pub rows: Vec<StatRow>,
}

pub struct SummaryView {
    pub name: String,
    pub count: u64,
    pub min: String,
    pub max: String,
    pub mean: String,
    pub median: String,
}

#[derive(Template)]
#[template(path = "report_summary.html")]
struct SummaryReportTemplate<'a> {
    title: &'a str,
    dag_id: &'a str,
    run_id: &'a str,
    execution_date: &'a str,
    generated_at: &'a str,
    tasks: &'a [TaskRow],
    headline: Vec<StatRow>,
    warnings: &'a [String],
}

#[derive(Template)]
#[template(path = "report_detailed.html")]
struct DetailedReportTemplate<'a> {
    title: &'a str,
    dag_id: &'a str,
    run_id: &'a str,
    execution_date: &'a str,
    generated_at: &'a str,
    tasks: &'a [TaskRow],
    data_stats: Vec<StatRow>,
    scalars: Vec<StatRow>,
    summaries: Vec<SummaryView>,
    distributions: Vec<DistributionView>,
    warnings: &'a [String],
}

/// Everything a report embeds
pub struct ReportInput<'a> {
    pub run: &'a RunContext,
    pub analytics: &'a AnalyticsRun,
    pub steps: &'a [StepSummary],
    pub clean: Option<&'a CleanReport>,
    pub loads: &'a [LoadReport],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Written,
    /// Already present with identical content
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub status: ArtifactStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArtifacts {
    pub summary: ReportArtifact,
    pub detailed: ReportArtifact,
}

impl ReportArtifacts {
    pub fn written(&self) -> usize {
        [&self.summary, &self.detailed]
            .iter()
            .filter(|a| a.status == ArtifactStatus::Written)
            .count()
    }
}

/// Renders the summary and detailed HTML reports for one run
pub struct ReportGenerator {
    dir: PathBuf,
    report_name: String,
    detailed_report_name: String,
    overwrite: bool,
}

impl ReportGenerator {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            report_name: DEFAULT_REPORT_NAME.to_string(),
            detailed_report_name: DEFAULT_DETAILED_REPORT_NAME.to_string(),
            overwrite: false,
        }
    }

    pub fn with_names(mut self, report_name: impl Into<String>, detailed: impl Into<String>) -> Self {
        self.report_name = report_name.into();
        self.detailed_report_name = detailed.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// `<dir>/<name>_<YYYY-MM-DD>.html`, dated by the run's execution date
    pub fn artifact_path(&self, name: &str, run: &RunContext) -> PathBuf {
        self.dir
            .join(format!("{}_{}.html", name, run.execution_date.format("%Y-%m-%d")))
    }

    #[instrument(skip_all, fields(run_id = %input.run.run_id))]
    pub async fn generate(&self, input: &ReportInput<'_>) -> Result<ReportArtifacts> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            EtlError::Report(format!("cannot create report directory {}: {}", self.dir.display(), e))
        })?;

        let (summary_html, detailed_html) = self.render(input)?;
        let summary_path = self.artifact_path(&self.report_name, input.run);
        let detailed_path = self.artifact_path(&self.detailed_report_name, input.run);

        let summary = ReportArtifact {
            status: write_artifact(&summary_path, &summary_html, self.overwrite).await?,
            path: summary_path,
        };
        let detailed = ReportArtifact {
            status: write_artifact(&detailed_path, &detailed_html, self.overwrite).await?,
            path: detailed_path,
        };
        info!(
            "Reports ready: {} ({:?}), {} ({:?})",
            summary.path.display(),
            summary.status,
            detailed.path.display(),
            detailed.status
        );
        Ok(ReportArtifacts { summary, detailed })
    }

    /// Render both documents without touching the filesystem
    pub fn render(&self, input: &ReportInput<'_>) -> Result<(String, String)> {
        let run = input.run;
        let execution_date = run.execution_date.format("%Y-%m-%d").to_string();
        let generated_at = run.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let tasks = task_rows(input.steps);
        let analytics = &input.analytics.result;
        let warnings = &input.analytics.warnings;

        let summary = SummaryReportTemplate {
            title: "MeetingBank ETL Report",
            dag_id: &run.dag_id,
            run_id: &run.run_id,
            execution_date: &execution_date,
            generated_at: &generated_at,
            tasks: &tasks,
            headline: headline(analytics, input.clean),
            warnings,
        }
        .render()?;

        let (scalars, summaries, distributions) = split_metrics(analytics);
        let detailed = DetailedReportTemplate {
            title: "MeetingBank ETL Detailed Report",
            dag_id: &run.dag_id,
            run_id: &run.run_id,
            execution_date: &execution_date,
            generated_at: &generated_at,
            tasks: &tasks,
            data_stats: data_stats(input.clean, input.loads),
            scalars,
            summaries,
            distributions,
            warnings,
        }
        .render()?;

        Ok((summary, detailed))
    }
}

async fn write_artifact(path: &Path, content: &str, overwrite: bool) -> Result<ArtifactStatus> {
    match tokio::fs::read(path).await {
        Ok(existing) if existing == content.as_bytes() => {
            metrics::report::unchanged();
            return Ok(ArtifactStatus::Unchanged);
        }
        Ok(_) if !overwrite => return Err(EtlError::ReportExists(path.to_path_buf())),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(EtlError::Report(format!("cannot read {}: {}", path.display(), e)));
        }
    }

    let tmp = path.with_extension("html.tmp");
    let write = async {
        tokio::fs::write(&tmp, content.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await
    };
    write
        .await
        .map_err(|e| EtlError::Report(format!("cannot write {}: {}", path.display(), e)))?;
    metrics::report::written();
    Ok(ArtifactStatus::Written)
}

fn task_rows(steps: &[StepSummary]) -> Vec<TaskRow> {
    steps
        .iter()
        .map(|s| TaskRow {
            name: s.step.clone(),
            state: s.state.as_str().to_string(),
            attempts: s.attempts,
            processed: s.processed_count,
            failed: s.failed_count,
            message: s.message.clone().unwrap_or_default(),
            details: s
                .metadata
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect()
}

fn headline(analytics: &AnalyticsResult, clean: Option<&CleanReport>) -> Vec<StatRow> {
    let mut rows = Vec::new();
    for (label, name) in [
        ("Meetings loaded", TOTAL_MEETINGS),
        ("Documents loaded", TOTAL_DOCUMENTS),
        ("Cities", TOTAL_CITIES),
    ] {
        rows.push(StatRow::new(label, analytics.count(name).unwrap_or(0)));
    }
    if let Some(clean) = clean {
        rows.push(StatRow::new("Records read", clean.input_count));
        rows.push(StatRow::new("Records dropped", clean.dropped_count));
    }
    rows
}

fn data_stats(clean: Option<&CleanReport>, loads: &[LoadReport]) -> Vec<StatRow> {
    let mut rows = Vec::new();
    if let Some(clean) = clean {
        rows.push(StatRow::new("Records read", clean.input_count));
        rows.push(StatRow::new("Records kept", clean.emitted_count));
        rows.push(StatRow::new("Records dropped", clean.dropped_count));
        rows.push(StatRow::new("Defaults filled", clean.defaults_filled));
        for (reason, count) in &clean.drop_reasons {
            rows.push(StatRow::new(format!("Dropped: {}", reason.as_str()), count));
        }
    }
    for load in loads {
        rows.push(StatRow::new(format!("{} rows inserted", load.store), load.inserted));
        rows.push(StatRow::new(format!("{} rows updated", load.store), load.updated));
    }
    rows
}

fn split_metrics(analytics: &AnalyticsResult) -> (Vec<StatRow>, Vec<SummaryView>, Vec<DistributionView>) {
    let mut scalars = Vec::new();
    let mut summaries = Vec::new();
    let mut distributions = Vec::new();
    for (name, value) in &analytics.metrics {
        match value {
            MetricValue::Count { .. } | MetricValue::Number { .. } => {
                scalars.push(StatRow::new(name.clone(), value));
            }
            MetricValue::Summary(s) => summaries.push(SummaryView {
                name: name.clone(),
                count: s.count,
                min: format_number(s.min),
                max: format_number(s.max),
                mean: format_number(s.mean),
                median: format_number(s.median),
            }),
            MetricValue::Distribution { buckets } => distributions.push(DistributionView {
                name: name.clone(),
                label_header: "Group",
                value_header: "Meetings",
                rows: buckets.iter().map(|(k, v)| StatRow::new(k.clone(), v)).collect(),
            }),
            MetricValue::Ranking { entries } => distributions.push(DistributionView {
                name: name.clone(),
                label_header: "Term",
                value_header: "Occurrences",
                rows: entries
                    .iter()
                    .map(|e| StatRow::new(e.label.clone(), e.count))
                    .collect(),
            }),
        }
    }
    (scalars, summaries, distributions)
}

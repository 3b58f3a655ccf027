//! Pipeline metrics
//!
//! Each stage records through its own submodule. Names follow Prometheus
//! conventions and are rendered in-process or served on `ETL_METRICS_ADDR`.

use std::fmt;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Enum representing all metric names used in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Extract
    ExtractRecords,
    ExtractDuration,
    ExtractSourceBytes,
    ExtractErrors,

    // Clean
    CleanRecordsEmitted,
    CleanRecordsDropped,
    CleanDefaultsFilled,

    // Transform
    TransformRecords,

    // Load
    LoadRecordsUpserted,
    LoadErrors,
    LoadDuration,

    // Analytics
    AnalyticsRuns,
    AnalyticsEmptyResults,

    // Report
    ReportArtifactsWritten,
    ReportArtifactsUnchanged,

    // DAG runner
    StepAttempts,
    StepRetries,
    StepFailures,
    StepDuration,
    DagRuns,

    // Run summary gauges
    RunSuccess,
    RunStepsSucceeded,
    RunStepsFailed,
    RunRecordsProcessed,
    RunDurationSeconds,
    RunLastTimestampSeconds,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ExtractRecords => "etl_extract_records_total",
            MetricName::ExtractDuration => "etl_extract_duration_seconds",
            MetricName::ExtractSourceBytes => "etl_extract_source_bytes",
            MetricName::ExtractErrors => "etl_extract_errors_total",

            MetricName::CleanRecordsEmitted => "etl_clean_records_emitted_total",
            MetricName::CleanRecordsDropped => "etl_clean_records_dropped_total",
            MetricName::CleanDefaultsFilled => "etl_clean_defaults_filled_total",

            MetricName::TransformRecords => "etl_transform_records_total",

            MetricName::LoadRecordsUpserted => "etl_load_records_upserted_total",
            MetricName::LoadErrors => "etl_load_errors_total",
            MetricName::LoadDuration => "etl_load_duration_seconds",

            MetricName::AnalyticsRuns => "etl_analytics_runs_total",
            MetricName::AnalyticsEmptyResults => "etl_analytics_empty_results_total",

            MetricName::ReportArtifactsWritten => "etl_report_artifacts_written_total",
            MetricName::ReportArtifactsUnchanged => "etl_report_artifacts_unchanged_total",

            MetricName::StepAttempts => "etl_step_attempts_total",
            MetricName::StepRetries => "etl_step_retries_total",
            MetricName::StepFailures => "etl_step_failures_total",
            MetricName::StepDuration => "etl_step_duration_seconds",
            MetricName::DagRuns => "etl_dag_runs_total",

            MetricName::RunSuccess => "etl_run_success",
            MetricName::RunStepsSucceeded => "etl_run_steps_succeeded",
            MetricName::RunStepsFailed => "etl_run_steps_failed",
            MetricName::RunRecordsProcessed => "etl_run_records_processed",
            MetricName::RunDurationSeconds => "etl_run_duration_seconds",
            MetricName::RunLastTimestampSeconds => "etl_run_last_timestamp_seconds",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MetricName::ExtractRecords => "Raw records read from the source",
            MetricName::ExtractDuration => "Time spent reading and parsing the source",
            MetricName::ExtractSourceBytes => "Size of the source payload",
            MetricName::ExtractErrors => "Extraction failures",
            MetricName::CleanRecordsEmitted => "Records that passed cleaning",
            MetricName::CleanRecordsDropped => "Records dropped during cleaning, by reason",
            MetricName::CleanDefaultsFilled => "Optional fields filled with defaults",
            MetricName::TransformRecords => "Records transformed into structured and document form",
            MetricName::LoadRecordsUpserted => "Records upserted, by store and outcome",
            MetricName::LoadErrors => "Load failures, by store",
            MetricName::LoadDuration => "Time spent loading, by store",
            MetricName::AnalyticsRuns => "Analytics computations",
            MetricName::AnalyticsEmptyResults => "Analytics runs that found no loaded data",
            MetricName::ReportArtifactsWritten => "HTML report files written",
            MetricName::ReportArtifactsUnchanged => "HTML report files already present with identical content",
            MetricName::StepAttempts => "Step attempts, by step",
            MetricName::StepRetries => "Step retries, by step",
            MetricName::StepFailures => "Steps that failed after exhausting retries",
            MetricName::StepDuration => "Step wall time, by step",
            MetricName::DagRuns => "DAG runs, by outcome",
            MetricName::RunSuccess => "1 if the last run succeeded, 0 otherwise",
            MetricName::RunStepsSucceeded => "Steps that succeeded in the last run",
            MetricName::RunStepsFailed => "Steps that failed or were skipped in the last run",
            MetricName::RunRecordsProcessed => "Records processed across all steps of the last run",
            MetricName::RunDurationSeconds => "Wall time of the last run",
            MetricName::RunLastTimestampSeconds => "Unix time the last run completed",
        }
    }

    /// Get all metric names (for registration)
    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            ExtractRecords,
            ExtractDuration,
            ExtractSourceBytes,
            ExtractErrors,
            CleanRecordsEmitted,
            CleanRecordsDropped,
            CleanDefaultsFilled,
            TransformRecords,
            LoadRecordsUpserted,
            LoadErrors,
            LoadDuration,
            AnalyticsRuns,
            AnalyticsEmptyResults,
            ReportArtifactsWritten,
            ReportArtifactsUnchanged,
            StepAttempts,
            StepRetries,
            StepFailures,
            StepDuration,
            DagRuns,
            RunSuccess,
            RunStepsSucceeded,
            RunStepsFailed,
            RunRecordsProcessed,
            RunDurationSeconds,
            RunLastTimestampSeconds,
        ]
        .into_iter()
    }

    fn is_gauge(&self) -> bool {
        self.as_str().starts_with("etl_run_")
    }

    fn is_histogram(&self) -> bool {
        let name = self.as_str();
        !self.is_gauge() && (name.ends_with("_seconds") || name.ends_with("_bytes"))
    }
}

static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe every metric.
///
/// Idempotent; a second call is a no-op. Must be called inside a tokio runtime
/// when `ETL_METRICS_ADDR` is set.
pub fn init() {
    if HANDLE.get().is_some() {
        return;
    }
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    // With ETL_METRICS_ADDR set, also serve /metrics for the lifetime of the process
    if let Some(addr) = std::env::var("ETL_METRICS_ADDR")
        .ok()
        .and_then(|v| v.parse::<std::net::SocketAddr>().ok())
    {
        match builder.with_http_listener(addr).build() {
            Ok((recorder, exporter)) => {
                let handle = recorder.handle();
                if ::metrics::set_global_recorder(recorder).is_err() {
                    warn!("A metrics recorder was already installed");
                    return;
                }
                tokio::spawn(exporter);
                finish_init(handle);
                info!("Prometheus exporter listening on {}", addr);
            }
            Err(e) => warn!("Failed to build Prometheus exporter: {}", e),
        }
        return;
    }

    match builder.install_recorder() {
        Ok(handle) => {
            finish_init(handle);
            info!("Prometheus recorder installed");
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
        }
    }
}

fn finish_init(handle: metrics_exporter_prometheus::PrometheusHandle) {
    let _ = HANDLE.set(handle);
    for metric in MetricName::all_metrics() {
        if metric.is_gauge() {
            ::metrics::describe_gauge!(metric.as_str(), metric.description());
        } else if metric.is_histogram() {
            ::metrics::describe_histogram!(metric.as_str(), metric.description());
        } else {
            ::metrics::describe_counter!(metric.as_str(), metric.description());
        }
    }
}

/// Render the current metrics in Prometheus text format, if the recorder is installed
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

pub mod extract {
    use super::MetricName;

    pub fn records(count: usize) {
        ::metrics::counter!(MetricName::ExtractRecords.as_str()).increment(count as u64);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::ExtractDuration.as_str()).record(secs);
    }

    pub fn source_bytes(bytes: usize) {
        ::metrics::histogram!(MetricName::ExtractSourceBytes.as_str()).record(bytes as f64);
    }

    pub fn error() {
        ::metrics::counter!(MetricName::ExtractErrors.as_str()).increment(1);
    }
}

pub mod clean {
    use super::MetricName;

    pub fn emitted(count: usize) {
        ::metrics::counter!(MetricName::CleanRecordsEmitted.as_str()).increment(count as u64);
    }

    pub fn dropped(reason: &str, count: usize) {
        ::metrics::counter!(MetricName::CleanRecordsDropped.as_str(), "reason" => reason.to_string())
            .increment(count as u64);
    }

    pub fn defaults_filled(count: usize) {
        ::metrics::counter!(MetricName::CleanDefaultsFilled.as_str()).increment(count as u64);
    }
}

pub mod transform {
    use super::MetricName;

    pub fn records(count: usize) {
        ::metrics::counter!(MetricName::TransformRecords.as_str()).increment(count as u64);
    }
}

pub mod load {
    use super::MetricName;

    pub fn upserted(store: &str, outcome: &str) {
        ::metrics::counter!(
            MetricName::LoadRecordsUpserted.as_str(),
            "store" => store.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    pub fn error(store: &str) {
        ::metrics::counter!(MetricName::LoadErrors.as_str(), "store" => store.to_string()).increment(1);
    }

    pub fn duration(store: &str, secs: f64) {
        ::metrics::histogram!(MetricName::LoadDuration.as_str(), "store" => store.to_string()).record(secs);
    }
}

pub mod analytics {
    use super::MetricName;

    pub fn run() {
        ::metrics::counter!(MetricName::AnalyticsRuns.as_str()).increment(1);
    }

    pub fn empty_result() {
        ::metrics::counter!(MetricName::AnalyticsEmptyResults.as_str()).increment(1);
    }
}

pub mod report {
    use super::MetricName;

    pub fn written() {
        ::metrics::counter!(MetricName::ReportArtifactsWritten.as_str()).increment(1);
    }

    pub fn unchanged() {
        ::metrics::counter!(MetricName::ReportArtifactsUnchanged.as_str()).increment(1);
    }
}

pub mod dag {
    use super::MetricName;

    pub fn attempt(step: &str) {
        ::metrics::counter!(MetricName::StepAttempts.as_str(), "step" => step.to_string()).increment(1);
    }

    pub fn retry(step: &str) {
        ::metrics::counter!(MetricName::StepRetries.as_str(), "step" => step.to_string()).increment(1);
    }

    pub fn failure(step: &str, kind: &str) {
        ::metrics::counter!(
            MetricName::StepFailures.as_str(),
            "step" => step.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn duration(step: &str, secs: f64) {
        ::metrics::histogram!(MetricName::StepDuration.as_str(), "step" => step.to_string()).record(secs);
    }

    pub fn run_finished(status: &str) {
        ::metrics::counter!(MetricName::DagRuns.as_str(), "status" => status.to_string()).increment(1);
    }
}

pub mod run {
    use super::MetricName;

    pub fn success(succeeded: bool) {
        ::metrics::gauge!(MetricName::RunSuccess.as_str()).set(if succeeded { 1.0 } else { 0.0 });
    }

    pub fn steps(succeeded: usize, failed: usize) {
        ::metrics::gauge!(MetricName::RunStepsSucceeded.as_str()).set(succeeded as f64);
        ::metrics::gauge!(MetricName::RunStepsFailed.as_str()).set(failed as f64);
    }

    pub fn records_processed(count: usize) {
        ::metrics::gauge!(MetricName::RunRecordsProcessed.as_str()).set(count as f64);
    }

    pub fn duration(secs: f64) {
        ::metrics::gauge!(MetricName::RunDurationSeconds.as_str()).set(secs);
    }

    pub fn completed_at(timestamp: i64) {
        ::metrics::gauge!(MetricName::RunLastTimestampSeconds.as_str()).set(timestamp as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let names: Vec<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
        assert!(names.iter().all(|n| n.starts_with("etl_")));
    }

    #[test]
    fn run_duration_is_a_gauge_not_a_histogram() {
        assert!(MetricName::RunDurationSeconds.is_gauge());
        assert!(!MetricName::RunDurationSeconds.is_histogram());
        assert!(MetricName::StepDuration.is_histogram());
    }
}

use crate::observability::metrics;
use crate::pipeline::orchestrator::{DagRunResult, TaskState};
use tracing::{info, warn};

/// Record the run summary gauges and push the rendered registry to a Prometheus
/// Pushgateway when `ETL_PUSHGATEWAY_URL` is set.
///
/// Failures are logged and never fail the run.
pub async fn push_run_summary(result: &DagRunResult) {
    record_run_summary(result);

    let base = match std::env::var("ETL_PUSHGATEWAY_URL") {
        Ok(v) if !v.trim().is_empty() => v,
        _ => return,
    };
    let Some(metrics_text) = metrics::render() else {
        warn!("Metrics recorder not installed, skipping Pushgateway push");
        return;
    };
    info!("Collected {} bytes of metrics", metrics_text.len());

    let push_url = format!(
        "{}/metrics/job/{}/instance/{}",
        base.trim_end_matches('/'),
        result.dag_id,
        result.run_id
    );

    let client = reqwest::Client::new();
    let push_res = client
        .post(&push_url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(metrics_text)
        .send()
        .await;

    match push_res {
        Ok(r) if r.status().is_success() => {
            info!("Pushed run summary to Pushgateway for run={}", result.run_id);
        }
        Ok(r) => {
            warn!(
                "Pushgateway push responded with status {} for run={}",
                r.status().as_u16(),
                result.run_id
            );
        }
        Err(e) => {
            warn!("Failed to push run summary for run={}: {}", result.run_id, e);
        }
    }
}

/// Set the `etl_run_*` gauges from a finished run
pub fn record_run_summary(result: &DagRunResult) {
    let succeeded = result
        .steps
        .iter()
        .filter(|s| s.state == TaskState::Success)
        .count();
    let failed = result
        .steps
        .iter()
        .filter(|s| matches!(s.state, TaskState::Failed | TaskState::UpstreamFailed))
        .count();
    let processed: usize = result.steps.iter().map(|s| s.processed_count).sum();
    let duration_secs = (result.completed_at - result.started_at).num_milliseconds() as f64 / 1000.0;

    metrics::run::success(result.succeeded());
    metrics::run::steps(succeeded, failed);
    metrics::run::records_processed(processed);
    metrics::run::duration(duration_secs);
    metrics::run::completed_at(result.completed_at.timestamp());
}

use crate::common::error::{EtlError, Result};
use crate::observability::metrics;
use crate::pipeline::dag::Dag;
use crate::pipeline::run_state::{RunState, StageEvent};
use crate::pipeline::steps::{PipelineStep, StepResult, TaskContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Retry and timeout rules applied to every step attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub retry_delay: Duration,
    pub exponential_backoff: bool,
    pub max_retry_delay: Duration,
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(300),
            exponential_backoff: true,
            max_retry_delay: Duration::from_secs(900),
            timeout: Some(Duration::from_secs(3600)),
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = if self.exponential_backoff {
            let factor = 2u32.saturating_pow(retry.saturating_sub(1));
            self.retry_delay.saturating_mul(factor)
        } else {
            self.retry_delay
        };
        delay.min(self.max_retry_delay)
    }
}

/// State of one step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed,
    UpstreamFailed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::UpstreamFailed => "upstream_failed",
        }
    }
}

/// Outcome of one step within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step: String,
    pub state: TaskState,
    pub attempts: u32,
    pub processed_count: usize,
    pub failed_count: usize,
    pub message: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StepSummary {
    fn upstream_failed(step: &str, failed: &str) -> Self {
        Self {
            step: step.to_string(),
            state: TaskState::UpstreamFailed,
            attempts: 0,
            processed_count: 0,
            failed_count: 0,
            message: Some(format!("upstream step '{failed}' failed")),
            warnings: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    fn from_attempts(step: &str, attempted: Attempted) -> Self {
        match attempted.outcome {
            Ok(result) => Self {
                step: step.to_string(),
                state: TaskState::Success,
                attempts: attempted.attempts,
                processed_count: result.processed_count,
                failed_count: result.failed_count,
                message: Some(result.message),
                warnings: result.warnings,
                metadata: result.metadata,
            },
            Err(e) => Self {
                step: step.to_string(),
                state: TaskState::Failed,
                attempts: attempted.attempts,
                processed_count: 0,
                failed_count: 0,
                message: Some(e.to_string()),
                warnings: Vec::new(),
                metadata: BTreeMap::new(),
            },
        }
    }
}

/// Everything known about a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRunResult {
    pub dag_id: String,
    pub run_id: String,
    pub state: RunState,
    /// In topological order
    pub steps: Vec<StepSummary>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DagRunResult {
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.state == TaskState::Success)
    }

    pub fn step(&self, name: &str) -> Option<&StepSummary> {
        self.steps.iter().find(|s| s.step == name)
    }

    /// The first step that failed on its own, if any
    pub fn first_failure(&self) -> Option<&StepSummary> {
        self.steps.iter().find(|s| s.state == TaskState::Failed)
    }
}

struct Attempted {
    attempts: u32,
    outcome: Result<StepResult>,
}

/// Runs a DAG: eligible steps run concurrently, each with retries and a timeout
pub struct DagRunner {
    dag: Arc<Dag>,
    policy: RetryPolicy,
}

impl DagRunner {
    pub fn new(dag: Arc<Dag>, policy: RetryPolicy) -> Self {
        Self { dag, policy }
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Run every step in dependency order.
    ///
    /// A failed step marks its transitive dependents `upstream_failed`; steps
    /// that do not depend on it still run.
    pub async fn run(&self, ctx: Arc<TaskContext>) -> DagRunResult {
        let started_at = Utc::now();
        let run_id = ctx.run().run_id.clone();
        info!(
            "🚀 Starting DAG '{}' run {} ({} steps)",
            self.dag.dag_id(),
            run_id,
            self.dag.len()
        );

        let mut states: HashMap<&'static str, TaskState> = self
            .dag
            .steps()
            .iter()
            .map(|s| (s.step_name(), TaskState::Pending))
            .collect();
        let mut summaries: HashMap<&'static str, StepSummary> = HashMap::new();
        let mut run_state = RunState::Pending;

        loop {
            let ready: Vec<Arc<dyn PipelineStep>> = self
                .dag
                .steps()
                .iter()
                .filter(|s| states.get(s.step_name()) == Some(&TaskState::Pending))
                .filter(|s| {
                    s.dependencies()
                        .iter()
                        .all(|d| states.get(d) == Some(&TaskState::Success))
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(ready.len());
            for step in ready {
                let name = step.step_name();
                states.insert(name, TaskState::Running);
                info!("🔄 Executing step: {}", name);
                let task_step = step.clone();
                let task_ctx = ctx.clone();
                let policy = self.policy.clone();
                let handle = tokio::spawn(async move {
                    execute_with_retries(task_step, &task_ctx, &policy).await
                });
                handles.push((name, step, handle));
            }

            for (name, step, handle) in handles {
                let attempted = handle.await.unwrap_or_else(|e| Attempted {
                    attempts: 1,
                    outcome: Err(EtlError::Dag(format!("step '{name}' aborted: {e}"))),
                });
                let summary = StepSummary::from_attempts(name, attempted);

                if summary.state == TaskState::Success {
                    info!(
                        "✅ Step '{}' completed: {}",
                        name,
                        summary.message.as_deref().unwrap_or_default()
                    );
                    if let Some(event) = step.completes() {
                        run_state = advance(run_state, event);
                    }
                } else {
                    let message = summary.message.clone().unwrap_or_default();
                    error!("❌ Step '{}' failed after {} attempts: {}", name, summary.attempts, message);
                    run_state = advance(run_state, StageEvent::Failed);
                    for dependent in self.dag.descendants(name) {
                        if states.get(dependent) == Some(&TaskState::Pending) {
                            warn!("⏹️ Skipping '{}': upstream '{}' failed", dependent, name);
                            states.insert(dependent, TaskState::UpstreamFailed);
                            let skipped = StepSummary::upstream_failed(dependent, name);
                            self.log_step(&ctx, &skipped).await;
                            summaries.insert(dependent, skipped);
                        }
                    }
                }
                states.insert(name, summary.state);
                self.log_step(&ctx, &summary).await;
                summaries.insert(name, summary);
            }
        }

        let steps: Vec<StepSummary> = self
            .dag
            .steps()
            .iter()
            .filter_map(|s| summaries.remove(s.step_name()))
            .collect();
        let result = DagRunResult {
            dag_id: self.dag.dag_id().to_string(),
            run_id,
            state: run_state,
            steps,
            started_at,
            completed_at: Utc::now(),
        };

        let status = if result.succeeded() { "success" } else { "failed" };
        metrics::dag::run_finished(status);
        if result.succeeded() {
            info!(
                "🎉 DAG '{}' run {} finished in state {}",
                result.dag_id,
                result.run_id,
                result.state.label()
            );
        } else {
            error!(
                "💥 DAG '{}' run {} failed in state {}",
                result.dag_id,
                result.run_id,
                result.state.label()
            );
        }
        result
    }

    /// Run one step by name, ignoring predecessor state; its inputs must already be staged
    pub async fn run_single(&self, name: &str, ctx: Arc<TaskContext>) -> Result<StepSummary> {
        let step = self
            .dag
            .step(name)
            .cloned()
            .ok_or_else(|| EtlError::Dag(format!("unknown step '{name}'")))?;
        info!("🔄 Running single step '{}' for run {}", name, ctx.run().run_id);
        let attempted = execute_with_retries(step.clone(), &ctx, &self.policy).await;
        let summary = StepSummary::from_attempts(step.step_name(), attempted);
        self.log_step(&ctx, &summary).await;
        Ok(summary)
    }

    async fn log_step(&self, ctx: &TaskContext, summary: &StepSummary) {
        if let Err(e) = ctx.record_step(summary).await {
            warn!("Failed to record step log for '{}': {}", summary.step, e);
        }
    }
}

fn advance(state: RunState, event: StageEvent) -> RunState {
    match state.apply(event) {
        Ok(next) => next,
        Err(e) => {
            warn!("{}", e);
            state
        }
    }
}

async fn execute_with_retries(
    step: Arc<dyn PipelineStep>,
    ctx: &TaskContext,
    policy: &RetryPolicy,
) -> Attempted {
    let name = step.step_name();
    let mut attempts = 0;
    loop {
        attempts += 1;
        metrics::dag::attempt(name);
        let started = Instant::now();

        let outcome = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, step.execute(ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(EtlError::Timeout {
                    step: name.to_string(),
                    seconds: limit.as_secs(),
                }),
            },
            None => step.execute(ctx).await,
        };
        // A step may also report failure without an error
        let outcome = outcome.and_then(|result| {
            if result.success {
                Ok(result)
            } else {
                Err(EtlError::Dag(format!("step '{}' reported failure: {}", name, result.message)))
            }
        });
        metrics::dag::duration(name, started.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => return Attempted { attempts, outcome: Ok(result) },
            Err(e) if attempts <= policy.retries && e.is_retryable() => {
                let delay = policy.delay_for(attempts);
                warn!(
                    "⚠️ Step '{}' attempt {} failed: {}; retrying in {:?}",
                    name, attempts, e, delay
                );
                metrics::dag::retry(name);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                metrics::dag::failure(name, e.kind());
                return Attempted {
                    attempts,
                    outcome: Err(e),
                };
            }
        }
    }
}

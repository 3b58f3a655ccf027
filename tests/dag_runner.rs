use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use meetingbank_etl::domain::RunContext;
use meetingbank_etl::pipeline::{Dag, DagRunner, PipelineStep, RetryPolicy, StepResult, TaskContext, TaskState};
use meetingbank_etl::EtlError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

enum Behaviour {
    Succeed,
    Fail,
    /// Fails until the given attempt, then succeeds
    FlakyUntil(u32),
    Hang,
    ReportFailure,
    Invalid,
    Rendezvous(Arc<Barrier>),
}

struct TestStep {
    name: &'static str,
    deps: Vec<&'static str>,
    behaviour: Behaviour,
    calls: AtomicU32,
}

impl TestStep {
    fn new(name: &'static str, deps: &[&'static str], behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            deps: deps.to_vec(),
            behaviour,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl PipelineStep for TestStep {
    async fn execute(&self, _ctx: &TaskContext) -> meetingbank_etl::Result<StepResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behaviour {
            Behaviour::Succeed => Ok(StepResult::success(1, format!("{} ok", self.name))),
            Behaviour::Fail => Err(EtlError::extraction(self.name, "broke")),
            Behaviour::FlakyUntil(n) if call < *n => Err(EtlError::Storage("transient".to_string())),
            Behaviour::FlakyUntil(_) => Ok(StepResult::success(1, "recovered".to_string())),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(StepResult::success(0, "late".to_string()))
            }
            Behaviour::ReportFailure => Ok(StepResult::failure("nothing to do".to_string())),
            Behaviour::Invalid => Err(EtlError::Validation("meeting_id column missing".to_string())),
            Behaviour::Rendezvous(barrier) => {
                barrier.wait().await;
                Ok(StepResult::success(1, "met".to_string()))
            }
        }
    }

    fn step_name(&self) -> &'static str {
        self.name
    }

    fn dependencies(&self) -> Vec<&'static str> {
        self.deps.clone()
    }
}

fn dag(steps: Vec<Arc<TestStep>>) -> meetingbank_etl::Result<Dag> {
    let steps: Vec<Arc<dyn PipelineStep>> = steps
        .into_iter()
        .map(|s| s as Arc<dyn PipelineStep>)
        .collect();
    Dag::new("test_dag", steps)
}

fn context() -> Arc<TaskContext> {
    Arc::new(TaskContext::new(RunContext::manual("test_dag", Utc::now())))
}

fn fast_policy(retries: u32) -> RetryPolicy {
    RetryPolicy {
        retries,
        retry_delay: Duration::from_millis(5),
        exponential_backoff: true,
        max_retry_delay: Duration::from_millis(20),
        timeout: Some(Duration::from_secs(5)),
    }
}

#[tokio::test]
async fn failure_skips_dependents_but_not_siblings() -> Result<()> {
    let dag = dag(vec![
        TestStep::new("root", &[], Behaviour::Succeed),
        TestStep::new("broken", &["root"], Behaviour::Fail),
        TestStep::new("sibling", &["root"], Behaviour::Succeed),
        TestStep::new("after_broken", &["broken"], Behaviour::Succeed),
        TestStep::new("join", &["broken", "sibling"], Behaviour::Succeed),
    ])?;
    let result = DagRunner::new(Arc::new(dag), fast_policy(0)).run(context()).await;

    assert!(!result.succeeded());
    assert_eq!(result.step("root").unwrap().state, TaskState::Success);
    assert_eq!(result.step("sibling").unwrap().state, TaskState::Success);
    assert_eq!(result.step("broken").unwrap().state, TaskState::Failed);
    assert_eq!(result.step("after_broken").unwrap().state, TaskState::UpstreamFailed);
    assert_eq!(result.step("join").unwrap().state, TaskState::UpstreamFailed);
    assert_eq!(result.first_failure().unwrap().step, "broken");
    assert!(result.step("broken").unwrap().message.as_deref().unwrap_or_default().contains("broke"));
    Ok(())
}

#[tokio::test]
async fn flaky_step_succeeds_on_third_attempt() -> Result<()> {
    let flaky = TestStep::new("flaky", &[], Behaviour::FlakyUntil(3));
    let dag = dag(vec![flaky.clone()])?;
    let result = DagRunner::new(Arc::new(dag), fast_policy(3)).run(context()).await;

    assert!(result.succeeded());
    let summary = result.step("flaky").unwrap();
    assert_eq!(summary.attempts, 3);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn retries_are_bounded() -> Result<()> {
    let flaky = TestStep::new("flaky", &[], Behaviour::FlakyUntil(10));
    let dag = dag(vec![flaky.clone()])?;
    let result = DagRunner::new(Arc::new(dag), fast_policy(2)).run(context()).await;

    let summary = result.step("flaky").unwrap();
    assert_eq!(summary.state, TaskState::Failed);
    assert_eq!(summary.attempts, 3);
    Ok(())
}

#[tokio::test]
async fn validation_errors_are_not_retried() -> Result<()> {
    let invalid = TestStep::new("invalid", &[], Behaviour::Invalid);
    let dag = dag(vec![invalid.clone()])?;
    let result = DagRunner::new(Arc::new(dag), fast_policy(3)).run(context()).await;

    let summary = result.step("invalid").unwrap();
    assert_eq!(summary.state, TaskState::Failed);
    assert_eq!(summary.attempts, 1);
    assert_eq!(invalid.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn hung_step_times_out() -> Result<()> {
    let dag = dag(vec![TestStep::new("slow", &[], Behaviour::Hang)])?;
    let policy = RetryPolicy {
        timeout: Some(Duration::from_millis(50)),
        ..fast_policy(0)
    };
    let result = DagRunner::new(Arc::new(dag), policy).run(context()).await;

    let summary = result.step("slow").unwrap();
    assert_eq!(summary.state, TaskState::Failed);
    assert!(summary.message.as_deref().unwrap_or_default().contains("timed out"));
    Ok(())
}

#[tokio::test]
async fn reported_failure_counts_as_failed() -> Result<()> {
    let dag = dag(vec![
        TestStep::new("quiet", &[], Behaviour::ReportFailure),
        TestStep::new("next", &["quiet"], Behaviour::Succeed),
    ])?;
    let result = DagRunner::new(Arc::new(dag), fast_policy(0)).run(context()).await;

    assert_eq!(result.step("quiet").unwrap().state, TaskState::Failed);
    assert_eq!(result.step("next").unwrap().state, TaskState::UpstreamFailed);
    Ok(())
}

#[tokio::test]
async fn independent_steps_run_concurrently() -> Result<()> {
    // Each loader waits for the other; sequential execution would hit the timeout
    let barrier = Arc::new(Barrier::new(2));
    let dag = dag(vec![
        TestStep::new("source", &[], Behaviour::Succeed),
        TestStep::new("left", &["source"], Behaviour::Rendezvous(barrier.clone())),
        TestStep::new("right", &["source"], Behaviour::Rendezvous(barrier)),
        TestStep::new("sink", &["left", "right"], Behaviour::Succeed),
    ])?;
    let policy = RetryPolicy {
        timeout: Some(Duration::from_secs(2)),
        ..fast_policy(0)
    };
    let result = DagRunner::new(Arc::new(dag), policy).run(context()).await;

    assert!(result.succeeded(), "{:?}", result.first_failure());
    let order: Vec<&str> = result.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(order, vec!["source", "left", "right", "sink"]);
    Ok(())
}

#[test]
fn cycles_and_unknown_predecessors_are_rejected() {
    let cycle = dag(vec![
        TestStep::new("a", &["b"], Behaviour::Succeed),
        TestStep::new("b", &["a"], Behaviour::Succeed),
    ]);
    assert!(matches!(cycle, Err(EtlError::Dag(_))));

    let dangling = dag(vec![TestStep::new("a", &["ghost"], Behaviour::Succeed)]);
    assert!(matches!(dangling, Err(EtlError::Dag(_))));
}

#[tokio::test]
async fn run_single_ignores_predecessors() -> Result<()> {
    let dag = dag(vec![
        TestStep::new("first", &[], Behaviour::Fail),
        TestStep::new("second", &["first"], Behaviour::Succeed),
    ])?;
    let runner = DagRunner::new(Arc::new(dag), fast_policy(0));
    let summary = runner.run_single("second", context()).await?;
    assert_eq!(summary.state, TaskState::Success);
    assert!(runner.run_single("missing", context()).await.is_err());
    Ok(())
}

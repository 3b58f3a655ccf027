use super::{PipelineStep, StepResult, TaskContext};
use crate::common::constants::{ANALYTICS_KEY, LOAD_DOCUMENTS, LOAD_RELATIONAL, RUN_ANALYTICS};
use crate::common::error::Result;
use crate::pipeline::analytics::{AnalyticsEngine, TOTAL_MEETINGS};
use crate::pipeline::run_state::StageEvent;
use async_trait::async_trait;
use tracing::{info, warn};

/// Pipeline step computing descriptive statistics over both stores
pub struct RunAnalyticsStep {
    engine: AnalyticsEngine,
}

impl RunAnalyticsStep {
    pub fn new(engine: AnalyticsEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl PipelineStep for RunAnalyticsStep {
    async fn execute(&self, ctx: &TaskContext) -> Result<StepResult> {
        info!("📊 Running analytics");
        let run = self.engine.compute().await?;
        ctx.publish(ANALYTICS_KEY, &run).await?;

        for warning in &run.warnings {
            warn!("⚠️ {}", warning);
        }
        let meetings = run.result.count(TOTAL_MEETINGS).unwrap_or(0);
        let message = format!(
            "Computed {} metrics over {} meetings",
            run.result.metrics.len(),
            meetings
        );
        info!("✅ {}", message);
        Ok(StepResult::success(run.result.metrics.len(), message).with_warnings(run.warnings))
    }

    fn step_name(&self) -> &'static str {
        RUN_ANALYTICS
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![LOAD_RELATIONAL, LOAD_DOCUMENTS]
    }

    fn completes(&self) -> Option<StageEvent> {
        Some(StageEvent::Analyzed)
    }
}

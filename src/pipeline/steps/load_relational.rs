use super::{PipelineStep, StepResult, TaskContext};
use crate::common::constants::{LOAD_RELATIONAL, RELATIONAL_LOAD_KEY, TRANSFORM_DATA, TRANSFORM_OUTPUT_KEY};
use crate::common::error::Result;
use crate::pipeline::load::RelationalLoader;
use crate::pipeline::run_state::StageEvent;
use crate::pipeline::transform::TransformOutput;
use async_trait::async_trait;
use tracing::info;

/// Pipeline step upserting structured rows into the relational store
pub struct LoadRelationalStep {
    loader: RelationalLoader,
}

impl LoadRelationalStep {
    pub fn new(loader: RelationalLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl PipelineStep for LoadRelationalStep {
    async fn execute(&self, ctx: &TaskContext) -> Result<StepResult> {
        info!("🗄️ Loading structured rows into the relational store");
        let output: TransformOutput = ctx.fetch(TRANSFORM_OUTPUT_KEY).await?;
        let report = self.loader.load(&output.structured).await?;
        ctx.publish(RELATIONAL_LOAD_KEY, &report).await?;

        let message = format!(
            "Relational store: {} inserted, {} updated",
            report.inserted, report.updated
        );
        info!("✅ {}", message);
        Ok(StepResult::success(report.written(), message)
            .with_metadata("inserted", report.inserted)
            .with_metadata("updated", report.updated))
    }

    fn step_name(&self) -> &'static str {
        LOAD_RELATIONAL
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![TRANSFORM_DATA]
    }

    fn completes(&self) -> Option<StageEvent> {
        Some(StageEvent::RelationalLoaded)
    }
}

use super::{PipelineStep, StepResult, TaskContext};
use crate::common::constants::{CLEAN_DATA, CLEAN_OUTPUT_KEY, TRANSFORM_DATA, TRANSFORM_OUTPUT_KEY};
use crate::common::error::Result;
use crate::domain::CleanRecord;
use crate::pipeline::run_state::StageEvent;
use crate::pipeline::transform::Transformer;
use async_trait::async_trait;
use tracing::info;

/// Pipeline step deriving structured rows and documents from clean records
pub struct TransformDataStep {
    transformer: Transformer,
}

impl TransformDataStep {
    pub fn new() -> Self {
        Self {
            transformer: Transformer,
        }
    }
}

impl Default for TransformDataStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStep for TransformDataStep {
    async fn execute(&self, ctx: &TaskContext) -> Result<StepResult> {
        info!("🔧 Transforming clean records");
        let records: Vec<CleanRecord> = ctx.fetch(CLEAN_OUTPUT_KEY).await?;
        let output = self.transformer.transform(&records);
        ctx.publish(TRANSFORM_OUTPUT_KEY, &output).await?;

        let message = format!(
            "Transformed {} records into {} structured rows and {} documents",
            records.len(),
            output.structured.len(),
            output.documents.len()
        );
        info!("✅ {}", message);
        Ok(StepResult::success(output.len(), message))
    }

    fn step_name(&self) -> &'static str {
        TRANSFORM_DATA
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![CLEAN_DATA]
    }

    fn completes(&self) -> Option<StageEvent> {
        Some(StageEvent::Transformed)
    }
}

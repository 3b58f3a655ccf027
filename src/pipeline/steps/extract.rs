use super::{PipelineStep, StepResult, TaskContext};
use crate::common::constants::{FETCH_DATA, RAW_BATCH_KEY};
use crate::common::error::Result;
use crate::pipeline::extract::Extractor;
use crate::pipeline::run_state::StageEvent;
use async_trait::async_trait;
use tracing::info;

/// Pipeline step that reads the raw source into a batch
pub struct FetchDataStep {
    extractor: Extractor,
}

impl FetchDataStep {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl PipelineStep for FetchDataStep {
    async fn execute(&self, ctx: &TaskContext) -> Result<StepResult> {
        info!("📥 Fetching meeting records from {}", self.extractor.location());
        let batch = self.extractor.extract().await?;
        ctx.publish(RAW_BATCH_KEY, &batch).await?;

        let message = format!(
            "Fetched {} records from {}",
            batch.records.len(),
            batch.source_location
        );
        info!("✅ {}", message);
        Ok(StepResult::success(batch.records.len(), message)
            .with_metadata("columns", batch.columns.join(",")))
    }

    fn step_name(&self) -> &'static str {
        FETCH_DATA
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }

    fn completes(&self) -> Option<StageEvent> {
        Some(StageEvent::Extracted)
    }
}

use super::{PipelineStep, StepResult, TaskContext};
use crate::common::constants::{DOCUMENT_LOAD_KEY, LOAD_DOCUMENTS, TRANSFORM_DATA, TRANSFORM_OUTPUT_KEY};
use crate::common::error::Result;
use crate::pipeline::load::DocumentLoader;
use crate::pipeline::run_state::StageEvent;
use crate::pipeline::transform::TransformOutput;
use async_trait::async_trait;
use tracing::info;

/// Pipeline step upserting documents into the document collection
pub struct LoadDocumentsStep {
    loader: DocumentLoader,
}

impl LoadDocumentsStep {
    pub fn new(loader: DocumentLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl PipelineStep for LoadDocumentsStep {
    async fn execute(&self, ctx: &TaskContext) -> Result<StepResult> {
        info!("📄 Loading documents into collection '{}'", self.loader.collection());
        let output: TransformOutput = ctx.fetch(TRANSFORM_OUTPUT_KEY).await?;
        let report = self.loader.load(&output.documents).await?;
        ctx.publish(DOCUMENT_LOAD_KEY, &report).await?;

        let message = format!(
            "Document store: {} inserted, {} updated",
            report.inserted, report.updated
        );
        info!("✅ {}", message);
        Ok(StepResult::success(report.written(), message)
            .with_metadata("inserted", report.inserted)
            .with_metadata("updated", report.updated))
    }

    fn step_name(&self) -> &'static str {
        LOAD_DOCUMENTS
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![TRANSFORM_DATA]
    }

    fn completes(&self) -> Option<StageEvent> {
        Some(StageEvent::DocumentLoaded)
    }
}

use super::{PipelineStep, StepResult, TaskContext};
use crate::common::constants::{CLEAN_DATA, CLEAN_OUTPUT_KEY, CLEAN_REPORT_KEY, FETCH_DATA, RAW_BATCH_KEY};
use crate::common::error::Result;
use crate::domain::RawBatch;
use crate::pipeline::clean::Cleaner;
use crate::pipeline::run_state::StageEvent;
use async_trait::async_trait;
use tracing::info;

/// Pipeline step for validating and normalizing raw records
pub struct CleanDataStep {
    cleaner: Cleaner,
}

impl CleanDataStep {
    pub fn new(cleaner: Cleaner) -> Self {
        Self { cleaner }
    }
}

#[async_trait]
impl PipelineStep for CleanDataStep {
    async fn execute(&self, ctx: &TaskContext) -> Result<StepResult> {
        info!("🧹 Cleaning raw meeting records");
        let batch: RawBatch = ctx.fetch(RAW_BATCH_KEY).await?;
        let output = self.cleaner.clean(&batch)?;

        ctx.publish(CLEAN_OUTPUT_KEY, &output.records).await?;
        ctx.publish(CLEAN_REPORT_KEY, &output.report).await?;

        let report = &output.report;
        let message = format!(
            "Cleaned {} of {} records ({} dropped)",
            report.emitted_count, report.input_count, report.dropped_count
        );
        info!("✅ {}", message);

        let mut result = StepResult::success(report.emitted_count, message)
            .with_metadata("defaults_filled", report.defaults_filled);
        // Dropped rows are reported, not failures of the step
        result.failed_count = report.dropped_count;
        for (reason, count) in &report.drop_reasons {
            result = result.with_metadata(&format!("dropped.{}", reason.as_str()), count);
        }
        Ok(result)
    }

    fn step_name(&self) -> &'static str {
        CLEAN_DATA
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![FETCH_DATA]
    }

    fn completes(&self) -> Option<StageEvent> {
        Some(StageEvent::Cleaned)
    }
}

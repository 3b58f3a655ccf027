use super::{PipelineStep, StepResult, TaskContext};
use crate::common::constants::{
    ANALYTICS_KEY, CLEAN_REPORT_KEY, DOCUMENT_LOAD_KEY, GENERATE_HTML_REPORT, RELATIONAL_LOAD_KEY,
    REPORT_ARTIFACTS_KEY, RUN_ANALYTICS,
};
use crate::common::error::Result;
use crate::pipeline::analytics::AnalyticsRun;
use crate::pipeline::clean::CleanReport;
use crate::pipeline::load::LoadReport;
use crate::pipeline::report::{ReportGenerator, ReportInput};
use crate::pipeline::run_state::StageEvent;
use async_trait::async_trait;
use tracing::info;

/// Pipeline step rendering the summary and detailed HTML reports
pub struct GenerateReportStep {
    generator: ReportGenerator,
}

impl GenerateReportStep {
    pub fn new(generator: ReportGenerator) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl PipelineStep for GenerateReportStep {
    async fn execute(&self, ctx: &TaskContext) -> Result<StepResult> {
        info!("📝 Generating HTML reports");
        let analytics: AnalyticsRun = ctx.fetch(ANALYTICS_KEY).await?;
        let clean: Option<CleanReport> = ctx.fetch_optional(CLEAN_REPORT_KEY).await?;
        let mut loads = Vec::new();
        for key in [RELATIONAL_LOAD_KEY, DOCUMENT_LOAD_KEY] {
            if let Some(report) = ctx.fetch_optional::<LoadReport>(key).await? {
                loads.push(report);
            }
        }
        // Excludes this step's own entry from an earlier invocation
        let mut steps = ctx.step_log().await?;
        steps.retain(|s| s.step != self.step_name());

        let input = ReportInput {
            run: ctx.run(),
            analytics: &analytics,
            steps: &steps,
            clean: clean.as_ref(),
            loads: &loads,
        };
        let artifacts = self.generator.generate(&input).await?;
        ctx.publish(REPORT_ARTIFACTS_KEY, &artifacts).await?;

        let message = format!(
            "Reports at {} and {} ({} written)",
            artifacts.summary.path.display(),
            artifacts.detailed.path.display(),
            artifacts.written()
        );
        info!("✅ {}", message);
        Ok(StepResult::success(2, message))
    }

    fn step_name(&self) -> &'static str {
        GENERATE_HTML_REPORT
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![RUN_ANALYTICS]
    }

    fn completes(&self) -> Option<StageEvent> {
        Some(StageEvent::Reported)
    }
}

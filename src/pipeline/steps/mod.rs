use crate::common::constants::STEP_LOG_KEY;
use crate::common::error::{EtlError, Result};
use crate::domain::RunContext;
use crate::pipeline::orchestrator::StepSummary;
use crate::pipeline::run_state::StageEvent;
use crate::pipeline::staging::StagingArea;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Common trait for all pipeline steps
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Run the step once. Inputs come from the context; outputs are published
    /// to it only when the step succeeds.
    async fn execute(&self, ctx: &TaskContext) -> Result<StepResult>;

    /// Get the name of this pipeline step
    fn step_name(&self) -> &'static str;

    /// Steps that must succeed before this one may run
    fn dependencies(&self) -> Vec<&'static str>;

    /// Run-state event emitted when this step succeeds
    fn completes(&self) -> Option<StageEvent> {
        None
    }
}

/// Result of executing a pipeline step
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub success: bool,
    pub processed_count: usize,
    pub failed_count: usize,
    pub message: String,
    /// Step-specific figures carried into the run summary and the detailed report
    pub metadata: BTreeMap<String, String>,
    /// Non-fatal conditions surfaced in the run summary
    pub warnings: Vec<String>,
}

impl StepResult {
    pub fn success(processed: usize, message: String) -> Self {
        Self {
            success: true,
            processed_count: processed,
            message,
            ..Default::default()
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// Shared state for one run: identity plus the hand-off slots between steps.
///
/// Every published value is kept in memory and, when a staging area is
/// configured, also written to disk so a later single-step invocation can
/// pick it up.
pub struct TaskContext {
    run: RunContext,
    staging: Option<StagingArea>,
    slots: Mutex<HashMap<String, Value>>,
}

impl TaskContext {
    pub fn new(run: RunContext) -> Self {
        Self {
            run,
            staging: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_staging(mut self, staging: StagingArea) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn staging(&self) -> Option<&StagingArea> {
        self.staging.as_ref()
    }

    pub async fn publish<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        if let Some(staging) = &self.staging {
            staging.put(&self.run.run_id, key, &json).await?;
        }
        self.slots_guard()?.insert(key.to_string(), json);
        Ok(())
    }

    pub async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.fetch_optional(key)
            .await?
            .ok_or_else(|| EtlError::StagingMissing {
                run_id: self.run.run_id.clone(),
                key: key.to_string(),
            })
    }

    pub async fn fetch_optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let in_memory = self.slots_guard()?.get(key).cloned();
        if let Some(value) = in_memory {
            return Ok(Some(serde_json::from_value(value)?));
        }
        let Some(staging) = &self.staging else {
            return Ok(None);
        };
        match staging.get::<Value>(&self.run.run_id, key).await {
            Ok(value) => {
                let typed = serde_json::from_value(value.clone())?;
                self.slots_guard()?.insert(key.to_string(), value);
                Ok(Some(typed))
            }
            Err(EtlError::StagingMissing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Add or replace a step's entry in the run's step log
    pub async fn record_step(&self, summary: &StepSummary) -> Result<()> {
        let mut log = self.step_log().await?;
        match log.iter_mut().find(|s| s.step == summary.step) {
            Some(existing) => *existing = summary.clone(),
            None => log.push(summary.clone()),
        }
        self.publish(STEP_LOG_KEY, &log).await
    }

    pub async fn step_log(&self) -> Result<Vec<StepSummary>> {
        Ok(self.fetch_optional(STEP_LOG_KEY).await?.unwrap_or_default())
    }

    fn slots_guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.slots
            .lock()
            .map_err(|_| EtlError::Dag("task context lock poisoned".to_string()))
    }
}

// Re-export all pipeline steps
pub mod analytics;
pub mod clean;
pub mod extract;
pub mod load_documents;
pub mod load_relational;
pub mod report;
pub mod transform;

pub use analytics::RunAnalyticsStep;
pub use clean::CleanDataStep;
pub use extract::FetchDataStep;
pub use load_documents::LoadDocumentsStep;
pub use load_relational::LoadRelationalStep;
pub use report::GenerateReportStep;
pub use transform::TransformDataStep;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn published_values_survive_into_a_new_context_via_staging() {
        let dir = TempDir::new().unwrap();
        let run = RunContext::manual("dag", Utc::now());

        let first = TaskContext::new(run.clone()).with_staging(StagingArea::new(dir.path()));
        first.publish("answer", &42u32).await.unwrap();

        let second = TaskContext::new(run).with_staging(StagingArea::new(dir.path()));
        assert_eq!(second.fetch::<u32>("answer").await.unwrap(), 42);
        assert!(second.fetch_optional::<u32>("missing").await.unwrap().is_none());
        assert!(matches!(
            second.fetch::<u32>("missing").await,
            Err(EtlError::StagingMissing { .. })
        ));
    }

    #[tokio::test]
    async fn in_memory_context_works_without_staging() {
        let ctx = TaskContext::new(RunContext::manual("dag", Utc::now()));
        ctx.publish("k", &vec!["a".to_string()]).await.unwrap();
        let back: Vec<String> = ctx.fetch("k").await.unwrap();
        assert_eq!(back, vec!["a"]);
    }
}

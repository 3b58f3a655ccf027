// Meeting ETL stages, the steps that wrap them, and the DAG that runs them

pub mod analytics;
pub mod clean;
pub mod dag;
pub mod extract;
pub mod load;
pub mod meeting_dag;
pub mod orchestrator;
pub mod report;
pub mod run_state;
pub mod staging;
pub mod steps;
pub mod transform;

pub use dag::Dag;
pub use meeting_dag::{build_meeting_dag, PipelineStores};
pub use orchestrator::{DagRunResult, DagRunner, RetryPolicy, StepSummary, TaskState};
pub use steps::{PipelineStep, StepResult, TaskContext};

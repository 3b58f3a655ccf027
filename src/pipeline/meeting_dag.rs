use crate::common::error::Result;
use crate::config::EtlConfig;
use crate::pipeline::analytics::AnalyticsEngine;
use crate::pipeline::clean::Cleaner;
use crate::pipeline::dag::Dag;
use crate::pipeline::extract::Extractor;
use crate::pipeline::load::{DocumentLoader, RelationalLoader};
use crate::pipeline::report::ReportGenerator;
use crate::pipeline::steps::{
    CleanDataStep, FetchDataStep, GenerateReportStep, LoadDocumentsStep, LoadRelationalStep,
    PipelineStep, RunAnalyticsStep, TransformDataStep,
};
use crate::storage::{
    DocumentStore, FileDocumentStore, InMemoryDocumentStore, InMemoryRelationalStore,
    RelationalStore, SqliteRelationalStore,
};
use std::sync::Arc;
use std::time::Duration;

/// The two stores a run writes to
#[derive(Clone)]
pub struct PipelineStores {
    pub relational: Arc<dyn RelationalStore>,
    pub documents: Arc<dyn DocumentStore>,
}

impl PipelineStores {
    pub fn from_config(config: &EtlConfig) -> Result<Self> {
        let relational: Arc<dyn RelationalStore> = if config.relational.sqlite_path == ":memory:" {
            Arc::new(SqliteRelationalStore::open_in_memory()?)
        } else {
            Arc::new(SqliteRelationalStore::open(&config.relational.sqlite_path)?)
        };
        Ok(Self {
            relational,
            documents: Arc::new(FileDocumentStore::new(&config.documents.root)),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            relational: Arc::new(InMemoryRelationalStore::new()),
            documents: Arc::new(InMemoryDocumentStore::new()),
        }
    }
}

/// fetch_data → clean_data → transform_data → {load_relational, load_documents}
/// → run_analytics → generate_html_report
pub fn build_meeting_dag(config: &EtlConfig, stores: &PipelineStores) -> Result<Dag> {
    let extractor = Extractor::new(config.source.location.clone())
        .with_format(config.source.format)
        .with_http_timeout(Duration::from_secs(config.source.http_timeout_secs));
    let relational_loader = RelationalLoader::new(stores.relational.clone())
        .with_schema_migration(config.relational.apply_migrations);
    let document_loader = DocumentLoader::new(stores.documents.clone())?
        .with_collection(config.documents.collection.clone())
        .with_max_document_bytes(config.documents.max_document_bytes);
    let engine = AnalyticsEngine::new(stores.relational.clone(), stores.documents.clone())
        .with_collection(config.documents.collection.clone())
        .with_top_terms(config.analytics.top_terms);
    let generator = ReportGenerator::new(&config.reports.dir)
        .with_names(
            config.reports.report_name.clone(),
            config.reports.detailed_report_name.clone(),
        )
        .with_overwrite(config.reports.overwrite);

    let steps: Vec<Arc<dyn PipelineStep>> = vec![
        Arc::new(FetchDataStep::new(extractor)),
        Arc::new(CleanDataStep::new(Cleaner::new(config.cleaning.clone()))),
        Arc::new(TransformDataStep::new()),
        Arc::new(LoadRelationalStep::new(relational_loader)),
        Arc::new(LoadDocumentsStep::new(document_loader)),
        Arc::new(RunAnalyticsStep::new(engine)),
        Arc::new(GenerateReportStep::new(generator)),
    ];
    Dag::new(config.dag.dag_id.clone(), steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::all_steps;

    #[test]
    fn meeting_dag_orders_all_steps() {
        let dag = build_meeting_dag(&EtlConfig::default(), &PipelineStores::in_memory()).unwrap();
        let names: Vec<&str> = dag.steps().iter().map(|s| s.step_name()).collect();
        assert_eq!(names, all_steps());
        assert_eq!(
            dag.descendants("load_documents"),
            vec!["run_analytics", "generate_html_report"]
        );
    }
}

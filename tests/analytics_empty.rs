use anyhow::Result;
use chrono::Utc;
use meetingbank_etl::domain::{MetricValue, RunContext};
use meetingbank_etl::pipeline::analytics::{AnalyticsEngine, TOP_TERMS, TOTAL_CITIES, TOTAL_DOCUMENTS, TOTAL_MEETINGS};
use meetingbank_etl::pipeline::report::{ArtifactStatus, ReportGenerator, ReportInput};
use meetingbank_etl::storage::document_fs::FileDocumentStore;
use meetingbank_etl::storage::sqlite::SqliteRelationalStore;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn empty_stores_give_zeroed_metrics_and_a_warning() -> Result<()> {
    let temp_dir = tempdir()?;
    // Never migrated, never loaded
    let relational = Arc::new(SqliteRelationalStore::open(temp_dir.path().join("empty.db"))?);
    let documents = Arc::new(FileDocumentStore::new(temp_dir.path().join("documents")));

    let run = AnalyticsEngine::new(relational, documents).compute().await?;
    assert_eq!(run.result.count(TOTAL_MEETINGS), Some(0));
    assert_eq!(run.result.count(TOTAL_DOCUMENTS), Some(0));
    assert_eq!(run.result.count(TOTAL_CITIES), Some(0));
    match run.result.get(TOP_TERMS) {
        Some(MetricValue::Ranking { entries }) => assert!(entries.is_empty()),
        other => panic!("unexpected top_terms value: {other:?}"),
    }
    assert_eq!(run.warnings.len(), 1);

    // A report still renders for an empty run
    let generator = ReportGenerator::new(temp_dir.path().join("reports"));
    let context = RunContext::manual("meetingbank_etl_pipeline", Utc::now());
    let input = ReportInput {
        run: &context,
        analytics: &run,
        steps: &[],
        clean: None,
        loads: &[],
    };
    let artifacts = generator.generate(&input).await?;
    assert_eq!(artifacts.summary.status, ArtifactStatus::Written);
    let html = std::fs::read_to_string(&artifacts.detailed.path)?;
    assert!(html.contains("No data."));
    assert!(html.contains("no loaded meetings"));
    Ok(())
}

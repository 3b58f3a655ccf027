use anyhow::Result;
use meetingbank_etl::pipeline::clean::{Cleaner, CleaningPolicy};
use meetingbank_etl::pipeline::extract::Extractor;
use meetingbank_etl::pipeline::load::{DocumentLoader, RelationalLoader};
use meetingbank_etl::pipeline::transform::{TransformOutput, Transformer};
use meetingbank_etl::storage::document_fs::FileDocumentStore;
use meetingbank_etl::storage::sqlite::SqliteRelationalStore;
use meetingbank_etl::storage::{DocumentStore, MeetingDimension, RelationalStore};
use std::sync::Arc;
use tempfile::tempdir;

const MEETINGS: &str = "\
meeting_id,city,meeting_date,speaker,transcript,agenda
a-1,Denver,2024-03-04,Chair,\"Motion to approve the transit corridor plan.\",Transit
a-2,Denver,2024-03-11,Chair,\"Second reading of the housing levy.\",Housing; Levy
a-3,Long Beach,03/18/2024,Mayor,\"Harbor commission appointments.\",
";

async fn transformed(dir: &std::path::Path) -> Result<TransformOutput> {
    let source = dir.join("meetings.csv");
    std::fs::write(&source, MEETINGS)?;
    let batch = Extractor::new(source.to_string_lossy().to_string()).extract().await?;
    let cleaned = Cleaner::new(CleaningPolicy::default()).clean(&batch)?;
    assert_eq!(cleaned.report.dropped_count, 0);
    Ok(Transformer.transform(&cleaned.records))
}

#[tokio::test]
async fn reloading_the_same_batch_updates_in_place() -> Result<()> {
    let temp_dir = tempdir()?;
    let output = transformed(temp_dir.path()).await?;

    let relational: Arc<dyn RelationalStore> =
        Arc::new(SqliteRelationalStore::open(temp_dir.path().join("db/meetings.db"))?);
    let documents: Arc<dyn DocumentStore> =
        Arc::new(FileDocumentStore::new(temp_dir.path().join("documents")));
    let relational_loader = RelationalLoader::new(relational.clone());
    let document_loader = DocumentLoader::new(documents.clone())?;

    let first = relational_loader.load(&output.structured).await?;
    assert_eq!((first.inserted, first.updated), (3, 0));
    let first_docs = document_loader.load(&output.documents).await?;
    assert_eq!((first_docs.inserted, first_docs.updated), (3, 0));

    let second = relational_loader.load(&output.structured).await?;
    assert_eq!((second.inserted, second.updated), (0, 3));
    let second_docs = document_loader.load(&output.documents).await?;
    assert_eq!((second_docs.inserted, second_docs.updated), (0, 3));

    assert_eq!(relational.meeting_count().await?, 3);
    assert_eq!(relational.city_count().await?, 2);
    assert_eq!(documents.count("meetings").await?, 3);

    let by_city = relational.count_by(MeetingDimension::City).await?;
    assert_eq!(by_city.get("Denver"), Some(&2));
    assert_eq!(by_city.get("Long Beach"), Some(&1));
    Ok(())
}

#[tokio::test]
async fn sqlite_store_survives_reopen() -> Result<()> {
    let temp_dir = tempdir()?;
    let output = transformed(temp_dir.path()).await?;
    let path = temp_dir.path().join("meetings.db");

    {
        let store: Arc<dyn RelationalStore> = Arc::new(SqliteRelationalStore::open(&path)?);
        RelationalLoader::new(store).load(&output.structured).await?;
    }

    let reopened: Arc<dyn RelationalStore> = Arc::new(SqliteRelationalStore::open(&path)?);
    let report = RelationalLoader::new(reopened.clone()).load(&output.structured).await?;
    assert_eq!(report.updated, 3);
    assert_eq!(reopened.meeting_count().await?, 3);
    Ok(())
}

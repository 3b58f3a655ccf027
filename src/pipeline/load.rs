use crate::common::constants::{DEFAULT_COLLECTION, DOCUMENT_STORE, MAX_DOCUMENT_BYTES, RELATIONAL_STORE};
use crate::common::error::{EtlError, Result};
use crate::domain::{DocumentRecord, StructuredRecord};
use crate::observability::metrics;
use crate::storage::{DocumentStore, RelationalStore, UpsertOutcome};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

const MEETING_DOCUMENT_SCHEMA: &str = include_str!("../../schemas/meeting_document.v1.json");

static COMPILED_SCHEMA: Lazy<std::result::Result<JSONSchema, String>> = Lazy::new(|| {
    let schema: Value = serde_json::from_str(MEETING_DOCUMENT_SCHEMA).map_err(|e| e.to_string())?;
    JSONSchema::options()
        .compile(&schema)
        .map_err(|e| e.to_string())
});

/// What a loader did to its store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub store: String,
    pub attempted: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl LoadReport {
    fn new(store: &str, attempted: usize) -> Self {
        Self {
            store: store.to_string(),
            attempted,
            inserted: 0,
            updated: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
        metrics::load::upserted(&self.store, outcome.as_str());
    }
}

/// Upserts structured records one by one, keyed by `meeting_id`
pub struct RelationalLoader {
    store: Arc<dyn RelationalStore>,
    apply_schema: bool,
}

impl RelationalLoader {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self {
            store,
            apply_schema: true,
        }
    }

    pub fn with_schema_migration(mut self, apply: bool) -> Self {
        self.apply_schema = apply;
        self
    }

    /// Stops at the first failing record; rows written before it stay committed.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn load(&self, records: &[StructuredRecord]) -> Result<LoadReport> {
        let started = Instant::now();
        if self.apply_schema {
            self.store
                .ensure_schema()
                .await
                .map_err(|e| EtlError::load(RELATIONAL_STORE, 0, e))?;
        }

        let mut report = LoadReport::new(RELATIONAL_STORE, records.len());
        for record in records {
            match self.store.upsert_meeting(record).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    metrics::load::error(RELATIONAL_STORE);
                    error!("Relational upsert failed for meeting {}: {}", record.meeting_id, e);
                    return Err(EtlError::load(
                        RELATIONAL_STORE,
                        report.written(),
                        format!("meeting {}: {}", record.meeting_id, e),
                    ));
                }
            }
        }

        metrics::load::duration(RELATIONAL_STORE, started.elapsed().as_secs_f64());
        info!(
            "Relational load complete: {} inserted, {} updated",
            report.inserted, report.updated
        );
        Ok(report)
    }
}

/// Checks documents against the collection schema and the size ceiling
pub struct DocumentValidator {
    schema: &'static JSONSchema,
    max_bytes: usize,
}

impl DocumentValidator {
    pub fn new(max_bytes: usize) -> Result<Self> {
        let schema = COMPILED_SCHEMA
            .as_ref()
            .map_err(|e| EtlError::Config(format!("invalid document schema: {e}")))?;
        Ok(Self { schema, max_bytes })
    }

    /// Serialize and validate one document
    pub fn prepare(&self, document: &DocumentRecord) -> std::result::Result<Value, String> {
        let value = serde_json::to_value(document).map_err(|e| format!("serialization failed: {e}"))?;
        let size = serde_json::to_vec(&value)
            .map_err(|e| format!("serialization failed: {e}"))?
            .len();
        if size > self.max_bytes {
            return Err(format!(
                "document is {size} bytes, above the {} byte limit",
                self.max_bytes
            ));
        }
        if let Err(errors) = self.schema.validate(&value) {
            let messages: Vec<String> = errors
                .take(3)
                .map(|e| format!("{} at {}", e, e.instance_path))
                .collect();
            return Err(format!("schema violation: {}", messages.join("; ")));
        }
        Ok(value)
    }
}

/// Upserts document records into a collection keyed by `_id`
pub struct DocumentLoader {
    store: Arc<dyn DocumentStore>,
    collection: String,
    validator: DocumentValidator,
}

impl DocumentLoader {
    pub fn new(store: Arc<dyn DocumentStore>) -> Result<Self> {
        Ok(Self {
            store,
            collection: DEFAULT_COLLECTION.to_string(),
            validator: DocumentValidator::new(MAX_DOCUMENT_BYTES)?,
        })
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_max_document_bytes(mut self, max_bytes: usize) -> Self {
        self.validator.max_bytes = max_bytes;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[instrument(skip_all, fields(collection = %self.collection, records = documents.len()))]
    pub async fn load(&self, documents: &[DocumentRecord]) -> Result<LoadReport> {
        let started = Instant::now();
        let mut report = LoadReport::new(DOCUMENT_STORE, documents.len());

        for document in documents {
            let outcome = match self.validator.prepare(document) {
                Ok(value) => self
                    .store
                    .upsert(&self.collection, &document.id, &value)
                    .await
                    .map_err(|e| e.to_string()),
                Err(message) => Err(message),
            };
            match outcome {
                Ok(outcome) => report.record(outcome),
                Err(message) => {
                    metrics::load::error(DOCUMENT_STORE);
                    error!("Document upsert failed for {}: {}", document.id, message);
                    return Err(EtlError::load(
                        DOCUMENT_STORE,
                        report.written(),
                        format!("document {}: {}", document.id, message),
                    ));
                }
            }
        }

        metrics::load::duration(DOCUMENT_STORE, started.elapsed().as_secs_f64());
        info!(
            "Document load complete: {} inserted, {} updated",
            report.inserted, report.updated
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CleanRecord;
    use crate::pipeline::transform::transform_record;
    use crate::storage::{InMemoryDocumentStore, InMemoryRelationalStore};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn sample(id: &str, transcript: &str) -> (StructuredRecord, DocumentRecord) {
        transform_record(&CleanRecord {
            row_number: 1,
            meeting_id: id.to_string(),
            city: "Seattle".to_string(),
            meeting_date: NaiveDate::from_ymd_opt(2022, 9, 12).unwrap(),
            speaker: "Chair".to_string(),
            transcript: transcript.to_string(),
            summary: None,
            agenda: vec!["Item".to_string()],
            source: "unknown".to_string(),
            metadata: BTreeMap::new(),
        })
    }

    #[test]
    fn generated_documents_satisfy_the_schema() {
        let validator = DocumentValidator::new(MAX_DOCUMENT_BYTES).unwrap();
        let (_, doc) = sample("m1", "Hello council");
        assert!(validator.prepare(&doc).is_ok());
    }

    #[test]
    fn schema_violations_and_oversize_are_rejected() {
        let validator = DocumentValidator::new(MAX_DOCUMENT_BYTES).unwrap();
        let (_, mut doc) = sample("m1", "Hello council");
        doc.lineage.content_hash = "not-a-hash".to_string();
        let err = validator.prepare(&doc).unwrap_err();
        assert!(err.starts_with("schema violation"));

        let tiny = DocumentValidator::new(64).unwrap();
        let (_, doc) = sample("m1", "Hello council");
        assert!(tiny.prepare(&doc).unwrap_err().contains("byte limit"));
    }

    #[tokio::test]
    async fn relational_reload_updates_instead_of_duplicating() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let loader = RelationalLoader::new(store.clone());
        let rows = vec![sample("a", "one").0, sample("b", "two").0];

        let first = loader.load(&rows).await.unwrap();
        let second = loader.load(&rows).await.unwrap();
        assert_eq!((first.inserted, first.updated), (2, 0));
        assert_eq!((second.inserted, second.updated), (0, 2));
        assert_eq!(store.meeting_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn document_failure_reports_partial_count() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let loader = DocumentLoader::new(store.clone()).unwrap();
        let good = sample("a", "fine").1;
        let mut bad = sample("b", "fine").1;
        bad.meeting.city = String::new();

        match loader.load(&[good, bad]).await {
            Err(EtlError::Load { store: s, written, .. }) => {
                assert_eq!(s, DOCUMENT_STORE);
                assert_eq!(written, 1);
            }
            other => panic!("expected load error, got {other:?}"),
        }
        assert_eq!(store.count(DEFAULT_COLLECTION).await.unwrap(), 1);
    }
}

use crate::common::error::{EtlError, Result};
use crate::domain::StructuredRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub mod document_fs;
pub mod in_memory;
pub mod sqlite;

pub use document_fs::FileDocumentStore;
pub use in_memory::{InMemoryDocumentStore, InMemoryRelationalStore};
pub use sqlite::SqliteRelationalStore;

/// Whether an upsert created a new row/document or replaced an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
        }
    }
}

/// Grouping dimensions for meeting counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingDimension {
    City,
    Speaker,
    /// `YYYY-MM`
    Month,
    Weekday,
}

/// Numeric meeting columns analytics can summarize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericColumn {
    WordCount,
    AgendaItemCount,
    SummaryWordCount,
}

impl NumericColumn {
    pub fn read(&self, record: &StructuredRecord) -> f64 {
        let value = match self {
            NumericColumn::WordCount => record.word_count,
            NumericColumn::AgendaItemCount => record.agenda_item_count,
            NumericColumn::SummaryWordCount => record.summary_word_count,
        };
        value as f64
    }
}

/// Relational store holding `cities` and `meetings`
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Create tables and indexes if they do not exist
    async fn ensure_schema(&self) -> Result<()>;

    /// Upsert the meeting's city, then the meeting keyed by `meeting_id`
    async fn upsert_meeting(&self, record: &StructuredRecord) -> Result<UpsertOutcome>;

    async fn meeting_count(&self) -> Result<u64>;
    async fn city_count(&self) -> Result<u64>;
    async fn count_by(&self, dimension: MeetingDimension) -> Result<BTreeMap<String, u64>>;
    async fn numeric_column(&self, column: NumericColumn) -> Result<Vec<f64>>;
    async fn count_with_summary(&self) -> Result<u64>;
}

/// Document store organised in named collections of JSON documents keyed by `_id`
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<UpsertOutcome>;
    async fn count(&self, collection: &str) -> Result<u64>;
    /// All documents in the collection, ordered by `_id`
    async fn find_all(&self, collection: &str) -> Result<Vec<Value>>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| EtlError::Storage("store lock poisoned".to_string()))
}

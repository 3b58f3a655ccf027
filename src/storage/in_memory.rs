use super::{lock, DocumentStore, MeetingDimension, NumericColumn, RelationalStore, UpsertOutcome};
use crate::common::error::Result;
use crate::domain::StructuredRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// In-memory relational store for development/testing
#[derive(Default)]
pub struct InMemoryRelationalStore {
    cities: Mutex<HashMap<Uuid, String>>,
    meetings: Mutex<BTreeMap<String, StructuredRecord>>,
}

impl InMemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_meeting(&self, record: &StructuredRecord) -> Result<UpsertOutcome> {
        lock(&self.cities)?.insert(record.city_id, record.city_name.clone());
        let previous = lock(&self.meetings)?.insert(record.meeting_id.clone(), record.clone());
        debug!("Upserted meeting {} in memory", record.meeting_id);
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn meeting_count(&self) -> Result<u64> {
        Ok(lock(&self.meetings)?.len() as u64)
    }

    async fn city_count(&self) -> Result<u64> {
        let meetings = lock(&self.meetings)?;
        let cities: HashSet<Uuid> = meetings.values().map(|m| m.city_id).collect();
        Ok(cities.len() as u64)
    }

    async fn count_by(&self, dimension: MeetingDimension) -> Result<BTreeMap<String, u64>> {
        let cities = lock(&self.cities)?;
        let meetings = lock(&self.meetings)?;
        let mut counts = BTreeMap::new();
        for m in meetings.values() {
            let key = match dimension {
                MeetingDimension::City => cities
                    .get(&m.city_id)
                    .cloned()
                    .unwrap_or_else(|| m.city_name.clone()),
                MeetingDimension::Speaker => m.speaker.clone(),
                MeetingDimension::Month => m.meeting_date.format("%Y-%m").to_string(),
                MeetingDimension::Weekday => m.weekday.clone(),
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn numeric_column(&self, column: NumericColumn) -> Result<Vec<f64>> {
        Ok(lock(&self.meetings)?.values().map(|m| column.read(m)).collect())
    }

    async fn count_with_summary(&self) -> Result<u64> {
        Ok(lock(&self.meetings)?
            .values()
            .filter(|m| m.summary_word_count > 0)
            .count() as u64)
    }
}

/// In-memory document store for development/testing
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<UpsertOutcome> {
        let mut collections = lock(&self.collections)?;
        let previous = collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(lock(&self.collections)?
            .get(collection)
            .map(|c| c.len() as u64)
            .unwrap_or(0))
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(lock(&self.collections)?
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transform::city_id;
    use chrono::NaiveDate;
    use serde_json::json;

    fn meeting(id: &str, city: &str, summary_words: usize) -> StructuredRecord {
        StructuredRecord {
            meeting_id: id.to_string(),
            city_id: city_id(city),
            city_name: city.to_string(),
            meeting_date: NaiveDate::from_ymd_opt(2024, 2, 6).unwrap(),
            meeting_year: 2024,
            meeting_month: 2,
            weekday: "Tuesday".to_string(),
            speaker: "Clerk".to_string(),
            word_count: 10,
            char_count: 50,
            agenda_item_count: 1,
            summary_word_count: summary_words,
            source: "test".to_string(),
            content_hash: "h".to_string(),
        }
    }

    #[tokio::test]
    async fn relational_upsert_is_keyed_by_meeting_id() {
        let store = InMemoryRelationalStore::new();
        assert_eq!(store.upsert_meeting(&meeting("a", "Boston", 0)).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_meeting(&meeting("a", "Boston", 3)).await.unwrap(), UpsertOutcome::Updated);
        store.upsert_meeting(&meeting("b", "Denver", 0)).await.unwrap();

        assert_eq!(store.meeting_count().await.unwrap(), 2);
        assert_eq!(store.city_count().await.unwrap(), 2);
        assert_eq!(store.count_with_summary().await.unwrap(), 1);
        let by_month = store.count_by(MeetingDimension::Month).await.unwrap();
        assert_eq!(by_month.get("2024-02"), Some(&2));
    }

    #[tokio::test]
    async fn city_count_follows_meetings_that_move() {
        let store = InMemoryRelationalStore::new();
        store.upsert_meeting(&meeting("m1", "Boston", 0)).await.unwrap();
        store.upsert_meeting(&meeting("m1", "Denver", 0)).await.unwrap();

        assert_eq!(store.meeting_count().await.unwrap(), 1);
        assert_eq!(store.city_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn document_collections_are_independent() {
        let store = InMemoryDocumentStore::new();
        store.upsert("meetings", "a", &json!({"_id": "a"})).await.unwrap();
        let again = store.upsert("meetings", "a", &json!({"_id": "a", "v": 2})).await.unwrap();
        assert_eq!(again, UpsertOutcome::Updated);
        assert_eq!(store.count("meetings").await.unwrap(), 1);
        assert_eq!(store.count("other").await.unwrap(), 0);
        assert_eq!(store.find_all("meetings").await.unwrap()[0]["v"], 2);
    }
}

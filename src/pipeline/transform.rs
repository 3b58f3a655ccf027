use crate::domain::{
    AgendaEntry, CleanRecord, DocumentRecord, Lineage, MeetingHeader, SourceInfo, StructuredRecord,
    TextMetrics,
};
use crate::observability::metrics;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};
use uuid::Uuid;

/// Both shapes derived from one batch of clean records, index-aligned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub structured: Vec<StructuredRecord>,
    pub documents: Vec<DocumentRecord>,
}

impl TransformOutput {
    pub fn len(&self) -> usize {
        self.structured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structured.is_empty()
    }
}

/// Derives relational rows and nested documents from clean records.
///
/// Pure and deterministic: the same input always yields byte-identical output.
#[derive(Debug, Default, Clone, Copy)]
pub struct Transformer;

impl Transformer {
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn transform(&self, records: &[CleanRecord]) -> TransformOutput {
        let mut output = TransformOutput {
            structured: Vec::with_capacity(records.len()),
            documents: Vec::with_capacity(records.len()),
        };
        for record in records {
            let (structured, document) = transform_record(record);
            output.structured.push(structured);
            output.documents.push(document);
        }
        metrics::transform::records(records.len());
        info!("Transformed {} records into structured and document form", records.len());
        output
    }
}

pub fn transform_record(record: &CleanRecord) -> (StructuredRecord, DocumentRecord) {
    let text_metrics = TextMetrics {
        word_count: word_count(&record.transcript),
        char_count: record.transcript.chars().count(),
        agenda_item_count: record.agenda.len(),
        summary_word_count: record.summary.as_deref().map(word_count).unwrap_or(0),
    };
    let content_hash = content_hash(&record.transcript);
    let date = record.meeting_date;

    let structured = StructuredRecord {
        meeting_id: record.meeting_id.clone(),
        city_id: city_id(&record.city),
        city_name: record.city.clone(),
        meeting_date: date,
        meeting_year: date.year(),
        meeting_month: date.month(),
        weekday: date.format("%A").to_string(),
        speaker: record.speaker.clone(),
        word_count: text_metrics.word_count,
        char_count: text_metrics.char_count,
        agenda_item_count: text_metrics.agenda_item_count,
        summary_word_count: text_metrics.summary_word_count,
        source: record.source.clone(),
        content_hash: content_hash.clone(),
    };

    let document = DocumentRecord {
        id: record.meeting_id.clone(),
        meeting: MeetingHeader {
            meeting_id: record.meeting_id.clone(),
            city: record.city.clone(),
            meeting_date: date,
            speaker: record.speaker.clone(),
        },
        transcript: record.transcript.clone(),
        summary: record.summary.clone(),
        agenda: record
            .agenda
            .iter()
            .enumerate()
            .map(|(i, text)| AgendaEntry {
                position: i + 1,
                text: text.clone(),
            })
            .collect(),
        tags: vec![
            format!("city:{}", slugify(&record.city)),
            format!("year:{:04}", date.year()),
            format!("speaker:{}", slugify(&record.speaker)),
        ],
        text_metrics,
        source: SourceInfo {
            name: record.source.clone(),
            metadata: record.metadata.clone(),
        },
        lineage: Lineage {
            row_number: record.row_number,
            content_hash,
        },
    };

    (structured, document)
}

/// Deterministic id for a city, stable across runs and case-insensitive
pub fn city_id(city: &str) -> Uuid {
    let key = format!("meetingbank:city:{}", city.trim().to_lowercase());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Hex-encoded SHA-256 of the text
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercase alphanumerics joined by single dashes
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c);
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn clean(id: &str, city: &str) -> CleanRecord {
        CleanRecord {
            row_number: 3,
            meeting_id: id.to_string(),
            city: city.to_string(),
            meeting_date: NaiveDate::from_ymd_opt(2023, 6, 5).unwrap(),
            speaker: "Council Member Ortiz".to_string(),
            transcript: "The meeting is called to order".to_string(),
            summary: Some("Opened meeting".to_string()),
            agenda: vec!["Roll call".to_string(), "Budget".to_string()],
            source: "seattle.gov".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn one_structured_and_one_document_per_record_in_order() {
        let records = vec![clean("a", "Seattle"), clean("b", "Denver")];
        let out = Transformer.transform(&records);
        assert_eq!(out.structured.len(), 2);
        assert_eq!(out.documents.len(), 2);
        assert_eq!(out.structured[1].meeting_id, "b");
        assert_eq!(out.documents[1].id, "b");
    }

    #[test]
    fn derived_fields_are_computed() {
        let (s, d) = transform_record(&clean("a", "Long Beach"));
        assert_eq!(s.word_count, 6);
        assert_eq!(s.summary_word_count, 2);
        assert_eq!(s.agenda_item_count, 2);
        assert_eq!(s.meeting_year, 2023);
        assert_eq!(s.meeting_month, 6);
        assert_eq!(s.weekday, "Monday");
        assert_eq!(s.content_hash.len(), 64);
        assert_eq!(d.lineage.content_hash, s.content_hash);
        assert_eq!(d.lineage.row_number, 3);
        assert_eq!(
            d.tags,
            vec!["city:long-beach", "year:2023", "speaker:council-member-ortiz"]
        );
        assert_eq!(d.agenda[1].position, 2);
    }

    #[test]
    fn city_ids_ignore_case_and_surrounding_space() {
        assert_eq!(city_id("Seattle"), city_id("  seattle "));
        assert_ne!(city_id("Seattle"), city_id("Denver"));
    }

    #[test]
    fn transform_is_deterministic() {
        let records = vec![clean("a", "Seattle")];
        let first = serde_json::to_string(&Transformer.transform(&records)).unwrap();
        let second = serde_json::to_string(&Transformer.transform(&records)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("St. Paul, MN"), "st-paul-mn");
        assert_eq!(slugify("!!!"), "unknown");
    }
}

use crate::common::constants::DEFAULT_COLLECTION;
use crate::common::error::{EtlError, Result};
use crate::domain::{AnalyticsResult, MetricValue, NumericSummary, RankedEntry};
use crate::observability::metrics;
use crate::storage::{DocumentStore, MeetingDimension, NumericColumn, RelationalStore};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const TOTAL_MEETINGS: &str = "total_meetings";
pub const TOTAL_DOCUMENTS: &str = "total_documents";
pub const TOTAL_CITIES: &str = "total_cities";
pub const MEETINGS_BY_CITY: &str = "meetings_by_city";
pub const MEETINGS_BY_SPEAKER: &str = "meetings_by_speaker";
pub const MEETINGS_BY_MONTH: &str = "meetings_by_month";
pub const MEETINGS_BY_WEEKDAY: &str = "meetings_by_weekday";
pub const WORD_COUNT: &str = "word_count";
pub const AGENDA_ITEMS: &str = "agenda_items";
pub const SUMMARY_WORDS: &str = "summary_words";
pub const MEETINGS_WITH_SUMMARY: &str = "meetings_with_summary";
pub const TOP_TERMS: &str = "top_terms";
pub const STORE_CONSISTENCY: &str = "store_consistency";

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z][a-z']+").expect("valid word regex"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
        "been", "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had",
        "has", "have", "he", "her", "here", "him", "his", "how", "i", "if", "in", "into", "is",
        "it", "it's", "its", "just", "like", "me", "more", "my", "no", "not", "now", "of", "on",
        "one", "or", "our", "out", "she", "so", "some", "than", "that", "that's", "the", "their",
        "them", "then", "there", "these", "they", "this", "those", "to", "up", "us", "very",
        "was", "we", "we're", "were", "what", "when", "where", "which", "who", "will", "with",
        "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Analytics values plus non-fatal conditions found while computing them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRun {
    pub result: AnalyticsResult,
    pub warnings: Vec<String>,
}

/// Read-only descriptive statistics over both stores
pub struct AnalyticsEngine {
    relational: Arc<dyn RelationalStore>,
    documents: Arc<dyn DocumentStore>,
    collection: String,
    top_terms: usize,
}

impl AnalyticsEngine {
    pub fn new(relational: Arc<dyn RelationalStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            relational,
            documents,
            collection: DEFAULT_COLLECTION.to_string(),
            top_terms: 10,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_top_terms(mut self, top_terms: usize) -> Self {
        self.top_terms = top_terms;
        self
    }

    /// Compute every metric. Zero loaded rows is a warning, store read failures are errors.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn compute(&self) -> Result<AnalyticsRun> {
        metrics::analytics::run();
        let mut result = AnalyticsResult::default();

        let total_meetings = self.relational.meeting_count().await?;
        let total_documents = self.documents.count(&self.collection).await?;
        result.insert(TOTAL_MEETINGS, MetricValue::Count { value: total_meetings });
        result.insert(TOTAL_DOCUMENTS, MetricValue::Count { value: total_documents });
        result.insert(
            TOTAL_CITIES,
            MetricValue::Count {
                value: self.relational.city_count().await?,
            },
        );

        for (name, dimension) in [
            (MEETINGS_BY_CITY, MeetingDimension::City),
            (MEETINGS_BY_SPEAKER, MeetingDimension::Speaker),
            (MEETINGS_BY_MONTH, MeetingDimension::Month),
            (MEETINGS_BY_WEEKDAY, MeetingDimension::Weekday),
        ] {
            let buckets = self.relational.count_by(dimension).await?;
            result.insert(name, MetricValue::Distribution { buckets });
        }

        for (name, column) in [
            (WORD_COUNT, NumericColumn::WordCount),
            (AGENDA_ITEMS, NumericColumn::AgendaItemCount),
            (SUMMARY_WORDS, NumericColumn::SummaryWordCount),
        ] {
            let values = self.relational.numeric_column(column).await?;
            result.insert(name, MetricValue::Summary(NumericSummary::from_values(values)));
        }

        result.insert(
            MEETINGS_WITH_SUMMARY,
            MetricValue::Count {
                value: self.relational.count_with_summary().await?,
            },
        );

        let documents = if total_documents > 0 {
            self.documents.find_all(&self.collection).await?
        } else {
            Vec::new()
        };
        result.insert(
            TOP_TERMS,
            MetricValue::Ranking {
                entries: top_terms(&documents, self.top_terms),
            },
        );
        result.insert(
            STORE_CONSISTENCY,
            MetricValue::Number {
                value: total_meetings as f64 - total_documents as f64,
            },
        );

        let mut warnings = Vec::new();
        if total_meetings == 0 && total_documents == 0 {
            metrics::analytics::empty_result();
            let warning = EtlError::Analytics("no loaded meetings in either store".to_string());
            warn!("{}", warning);
            warnings.push(warning.to_string());
        } else if total_meetings != total_documents {
            let message = format!(
                "store counts differ: {} relational rows, {} documents",
                total_meetings, total_documents
            );
            warn!("{}", message);
            warnings.push(message);
        }

        info!(
            "Analytics computed: {} meetings, {} documents, {} metrics",
            total_meetings,
            total_documents,
            result.metrics.len()
        );
        Ok(AnalyticsRun { result, warnings })
    }
}

/// Most frequent non-stopword transcript terms, ties broken alphabetically
pub fn top_terms(documents: &[Value], limit: usize) -> Vec<RankedEntry> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for doc in documents {
        let Some(transcript) = doc.get("transcript").and_then(Value::as_str) else {
            continue;
        };
        let lower = transcript.to_lowercase();
        for m in WORD.find_iter(&lower) {
            let term = m.as_str().trim_end_matches('\'');
            if term.len() > 2 && !STOPWORDS.contains(term) {
                *counts.entry(term.to_string()).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(label, count)| RankedEntry { label, count })
        .collect()
}

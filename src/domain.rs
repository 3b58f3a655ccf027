use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Fields recognised in a source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordField {
    MeetingId,
    City,
    MeetingDate,
    Speaker,
    Transcript,
    Summary,
    Agenda,
    Source,
}

impl RecordField {
    pub const REQUIRED: [RecordField; 3] = [
        RecordField::MeetingId,
        RecordField::MeetingDate,
        RecordField::Transcript,
    ];

    /// Resolve a source column name (case-insensitive, with aliases)
    pub fn from_column(column: &str) -> Option<Self> {
        let name = column.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match name.as_str() {
            "meeting_id" | "id" | "uid" => Some(RecordField::MeetingId),
            "city" | "city_name" => Some(RecordField::City),
            "meeting_date" | "date" => Some(RecordField::MeetingDate),
            "speaker" | "speaker_name" => Some(RecordField::Speaker),
            "transcript" | "text" | "raw_text" => Some(RecordField::Transcript),
            "summary" => Some(RecordField::Summary),
            "agenda" | "agenda_items" => Some(RecordField::Agenda),
            "source" | "source_url" => Some(RecordField::Source),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::MeetingId => "meeting_id",
            RecordField::City => "city",
            RecordField::MeetingDate => "meeting_date",
            RecordField::Speaker => "speaker",
            RecordField::Transcript => "transcript",
            RecordField::Summary => "summary",
            RecordField::Agenda => "agenda",
            RecordField::Source => "source",
        }
    }
}

/// One meeting transcript entry exactly as read from the source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based position in the source
    pub row_number: usize,
    pub meeting_id: Option<String>,
    pub city: Option<String>,
    pub meeting_date: Option<String>,
    pub speaker: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub agenda: Option<String>,
    pub source: Option<String>,
    /// Columns the pipeline does not interpret, kept as source metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Set when the row itself could not be parsed; the cleaner drops such rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl RawRecord {
    pub fn new(row_number: usize) -> Self {
        Self {
            row_number,
            ..Default::default()
        }
    }

    pub fn malformed(row_number: usize, error: impl Into<String>) -> Self {
        Self {
            row_number,
            parse_error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn set(&mut self, field: RecordField, value: Option<String>) {
        let slot = match field {
            RecordField::MeetingId => &mut self.meeting_id,
            RecordField::City => &mut self.city,
            RecordField::MeetingDate => &mut self.meeting_date,
            RecordField::Speaker => &mut self.speaker,
            RecordField::Transcript => &mut self.transcript,
            RecordField::Summary => &mut self.summary,
            RecordField::Agenda => &mut self.agenda,
            RecordField::Source => &mut self.source,
        };
        *slot = value;
    }
}

/// Output of the extractor: the columns the source declared plus its records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    pub source_location: String,
    pub columns: Vec<String>,
    pub records: Vec<RawRecord>,
    pub extracted_at: DateTime<Utc>,
}

/// A validated record with normalized text and defaults filled in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    pub row_number: usize,
    pub meeting_id: String,
    pub city: String,
    pub meeting_date: NaiveDate,
    pub speaker: String,
    pub transcript: String,
    pub summary: Option<String>,
    pub agenda: Vec<String>,
    pub source: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Flat, fixed-column row destined for the relational store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub meeting_id: String,
    pub city_id: Uuid,
    pub city_name: String,
    pub meeting_date: NaiveDate,
    pub meeting_year: i32,
    pub meeting_month: u32,
    pub weekday: String,
    pub speaker: String,
    pub word_count: usize,
    pub char_count: usize,
    pub agenda_item_count: usize,
    pub summary_word_count: usize,
    pub source: String,
    pub content_hash: String,
}

/// Nested record destined for the document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub meeting: MeetingHeader,
    pub transcript: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub agenda: Vec<AgendaEntry>,
    pub tags: Vec<String>,
    pub text_metrics: TextMetrics,
    pub source: SourceInfo,
    pub lineage: Lineage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingHeader {
    pub meeting_id: String,
    pub city: String,
    pub meeting_date: NaiveDate,
    pub speaker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaEntry {
    pub position: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMetrics {
    pub word_count: usize,
    pub char_count: usize,
    pub agenda_item_count: usize,
    pub summary_word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Ties a document back to the source row it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub row_number: usize,
    pub content_hash: String,
}

/// A single analytics value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValue {
    Count { value: u64 },
    Number { value: f64 },
    Distribution { buckets: BTreeMap<String, u64> },
    /// Highest count first
    Ranking { entries: Vec<RankedEntry> },
    Summary(NumericSummary),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub label: String,
    pub count: u64,
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count { value } => write!(f, "{value}"),
            MetricValue::Number { value } => write!(f, "{}", format_number(*value)),
            MetricValue::Distribution { buckets } => {
                let total: u64 = buckets.values().sum();
                write!(f, "{} groups, {} total", buckets.len(), total)
            }
            MetricValue::Ranking { entries } => match entries.first() {
                Some(top) => write!(f, "{} ranked, top {} ({})", entries.len(), top.label, top.count),
                None => write!(f, "0 ranked"),
            },
            MetricValue::Summary(s) => write!(
                f,
                "n={} min={} max={} mean={} median={}",
                s.count,
                format_number(s.min),
                format_number(s.max),
                format_number(s.mean),
                format_number(s.median)
            ),
        }
    }
}

/// Integral values print without decimals
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl NumericSummary {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let count = values.len();
        let sum: f64 = values.iter().sum();
        let median = if count % 2 == 0 {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        } else {
            values[count / 2]
        };
        Self {
            count: count as u64,
            min: values[0],
            max: values[count - 1],
            mean: sum / count as f64,
            median,
        }
    }
}

/// Metric name to value, recomputed every run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResult {
    pub metrics: BTreeMap<String, MetricValue>,
}

impl AnalyticsResult {
    pub fn insert(&mut self, name: &str, value: MetricValue) {
        self.metrics.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn count(&self, name: &str) -> Option<u64> {
        match self.metrics.get(name) {
            Some(MetricValue::Count { value }) => Some(*value),
            _ => None,
        }
    }
}

/// Identity of one pipeline run. Reports embed these values rather than the wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub dag_id: String,
    pub run_id: String,
    /// Logical date of the run
    pub execution_date: NaiveDate,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(
        dag_id: impl Into<String>,
        run_id: impl Into<String>,
        execution_date: NaiveDate,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            dag_id: dag_id.into(),
            run_id: run_id.into(),
            execution_date,
            started_at,
        }
    }

    /// A manually triggered run whose logical date is the day it started
    pub fn manual(dag_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        let run_id = format!("manual__{}", started_at.format("%Y%m%dT%H%M%SZ"));
        Self::new(dag_id, run_id, started_at.date_naive(), started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn column_aliases_resolve() {
        assert_eq!(RecordField::from_column("ID"), Some(RecordField::MeetingId));
        assert_eq!(RecordField::from_column(" Meeting Date "), Some(RecordField::MeetingDate));
        assert_eq!(RecordField::from_column("raw_text"), Some(RecordField::Transcript));
        assert_eq!(RecordField::from_column("duration"), None);
    }

    #[test]
    fn numeric_summary_handles_even_and_empty() {
        let s = NumericSummary::from_values(vec![4.0, 1.0, 3.0, 2.0]);
        assert_eq!(s.count, 4);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert_eq!(s.mean, 2.5);
        assert_eq!(s.median, 2.5);
        assert_eq!(NumericSummary::from_values(Vec::new()), NumericSummary::default());
    }

    #[test]
    fn manual_run_id_is_derived_from_start_time() {
        let started = Utc.with_ymd_and_hms(2025, 12, 1, 6, 30, 0).unwrap();
        let run = RunContext::manual("dag", started);
        assert_eq!(run.run_id, "manual__20251201T063000Z");
        assert_eq!(run.execution_date, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
    }

    #[test]
    fn metric_values_display_compactly() {
        assert_eq!(MetricValue::Count { value: 2 }.to_string(), "2");
        assert_eq!(MetricValue::Number { value: 0.0 }.to_string(), "0");
        assert_eq!(MetricValue::Number { value: 1.5 }.to_string(), "1.50");
    }
}

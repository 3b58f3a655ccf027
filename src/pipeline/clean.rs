use crate::common::constants::{UNKNOWN_CITY, UNKNOWN_SOURCE, UNKNOWN_SPEAKER};
use crate::common::error::{EtlError, Result};
use crate::domain::{CleanRecord, RawBatch, RawRecord, RecordField};
use crate::observability::metrics;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, instrument, warn};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static MEETING_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:-]+$").expect("valid meeting id regex"));

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Null-handling and validation rules applied to every record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningPolicy {
    pub default_city: String,
    pub default_speaker: String,
    pub default_source: String,
    pub max_meeting_id_len: usize,
    pub max_transcript_chars: usize,
    pub min_year: i32,
    pub max_year: i32,
    /// Keep only the first record for each meeting id
    pub drop_duplicates: bool,
}

impl Default for CleaningPolicy {
    fn default() -> Self {
        Self {
            default_city: UNKNOWN_CITY.to_string(),
            default_speaker: UNKNOWN_SPEAKER.to_string(),
            default_source: UNKNOWN_SOURCE.to_string(),
            max_meeting_id_len: 128,
            max_transcript_chars: 5_000_000,
            min_year: 1900,
            max_year: 2100,
            drop_duplicates: true,
        }
    }
}

/// Why a record did not survive cleaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingMeetingId,
    MissingMeetingDate,
    MissingTranscript,
    InvalidMeetingId,
    InvalidMeetingDate,
    DateOutOfRange,
    TranscriptTooLong,
    Duplicate,
    /// The source row could not be parsed at all
    Malformed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingMeetingId => "missing_meeting_id",
            DropReason::MissingMeetingDate => "missing_meeting_date",
            DropReason::MissingTranscript => "missing_transcript",
            DropReason::InvalidMeetingId => "invalid_meeting_id",
            DropReason::InvalidMeetingDate => "invalid_meeting_date",
            DropReason::DateOutOfRange => "date_out_of_range",
            DropReason::TranscriptTooLong => "transcript_too_long",
            DropReason::Duplicate => "duplicate",
            DropReason::Malformed => "malformed_row",
        }
    }
}

/// Counts reported by the cleaner; dropped rows are reported, not fatal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    pub input_count: usize,
    pub emitted_count: usize,
    pub dropped_count: usize,
    pub drop_reasons: BTreeMap<DropReason, usize>,
    pub defaults_filled: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanOutput {
    pub records: Vec<CleanRecord>,
    pub report: CleanReport,
}

pub struct Cleaner {
    policy: CleaningPolicy,
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new(CleaningPolicy::default())
    }
}

impl Cleaner {
    pub fn new(policy: CleaningPolicy) -> Self {
        Self { policy }
    }

    /// Clean a whole batch.
    ///
    /// Fails only when the batch as a whole does not carry a required column.
    #[instrument(skip_all, fields(source = %batch.source_location, records = batch.records.len()))]
    pub fn clean(&self, batch: &RawBatch) -> Result<CleanOutput> {
        check_batch_schema(&batch.columns)?;

        let mut report = CleanReport {
            input_count: batch.records.len(),
            ..Default::default()
        };
        let mut records = Vec::with_capacity(batch.records.len());
        let mut seen_ids = HashSet::new();

        for raw in &batch.records {
            let outcome = self.clean_record(raw).and_then(|(record, filled)| {
                if self.policy.drop_duplicates && !seen_ids.insert(record.meeting_id.clone()) {
                    Err(DropReason::Duplicate)
                } else {
                    Ok((record, filled))
                }
            });
            match outcome {
                Ok((record, filled)) => {
                    report.defaults_filled += filled;
                    records.push(record);
                }
                Err(reason) => {
                    debug!("Dropping row {}: {}", raw.row_number, reason.as_str());
                    *report.drop_reasons.entry(reason).or_insert(0) += 1;
                    report.dropped_count += 1;
                }
            }
        }
        report.emitted_count = records.len();

        metrics::clean::emitted(report.emitted_count);
        metrics::clean::defaults_filled(report.defaults_filled);
        for (reason, count) in &report.drop_reasons {
            metrics::clean::dropped(reason.as_str(), *count);
        }
        if report.dropped_count > 0 {
            warn!(
                "Dropped {} of {} records during cleaning",
                report.dropped_count, report.input_count
            );
        }
        info!(
            "Cleaned {} records ({} dropped, {} defaults filled)",
            report.emitted_count, report.dropped_count, report.defaults_filled
        );

        Ok(CleanOutput { records, report })
    }

    /// Clean one record, returning it with the number of defaults filled
    pub fn clean_record(&self, raw: &RawRecord) -> std::result::Result<(CleanRecord, usize), DropReason> {
        if raw.parse_error.is_some() {
            return Err(DropReason::Malformed);
        }
        let meeting_id = non_blank(&raw.meeting_id).ok_or(DropReason::MissingMeetingId)?;
        let date_text = non_blank(&raw.meeting_date).ok_or(DropReason::MissingMeetingDate)?;
        let transcript = non_blank(&raw.transcript).ok_or(DropReason::MissingTranscript)?;

        if meeting_id.chars().count() > self.policy.max_meeting_id_len || !MEETING_ID.is_match(&meeting_id) {
            return Err(DropReason::InvalidMeetingId);
        }
        let meeting_date = parse_meeting_date(&date_text).ok_or(DropReason::InvalidMeetingDate)?;
        if meeting_date.year() < self.policy.min_year || meeting_date.year() > self.policy.max_year {
            return Err(DropReason::DateOutOfRange);
        }
        if transcript.chars().count() > self.policy.max_transcript_chars {
            return Err(DropReason::TranscriptTooLong);
        }

        let mut filled = 0;
        let mut or_default = |value: Option<String>, default: &str| {
            value.unwrap_or_else(|| {
                filled += 1;
                default.to_string()
            })
        };
        let city = or_default(non_blank(&raw.city), &self.policy.default_city);
        let speaker = or_default(non_blank(&raw.speaker), &self.policy.default_speaker);
        let source = or_default(non_blank(&raw.source), &self.policy.default_source);

        let agenda = raw
            .agenda
            .as_deref()
            .map(split_agenda)
            .unwrap_or_default();

        let record = CleanRecord {
            row_number: raw.row_number,
            meeting_id,
            city,
            meeting_date,
            speaker,
            transcript,
            summary: non_blank(&raw.summary),
            agenda,
            source,
            metadata: raw
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), normalize_text(v)))
                .collect(),
        };
        Ok((record, filled))
    }
}

/// Batch-level check: every required field must be present as a column
pub fn check_batch_schema(columns: &[String]) -> Result<()> {
    let present: HashSet<RecordField> = columns
        .iter()
        .filter_map(|c| RecordField::from_column(c))
        .collect();
    let missing: Vec<&str> = RecordField::REQUIRED
        .iter()
        .filter(|f| !present.contains(f))
        .map(|f| f.as_str())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::Validation(format!(
            "source is missing required columns: {}",
            missing.join(", ")
        )))
    }
}

/// Replace non-breaking spaces, strip control characters, collapse whitespace and trim
pub fn normalize_text(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    WHITESPACE.replace_all(&cleaned, " ").trim().to_string()
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(normalize_text)
        .filter(|s| !s.is_empty())
}

fn split_agenda(text: &str) -> Vec<String> {
    text.split([';', '\n'])
        .map(normalize_text)
        .filter(|item| !item.is_empty())
        .collect()
}

/// Accepts ISO dates, US-style dates, and full timestamps (date part kept)
pub fn parse_meeting_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn raw(row: usize, id: Option<&str>, date: Option<&str>, transcript: Option<&str>) -> RawRecord {
        RawRecord {
            row_number: row,
            meeting_id: id.map(String::from),
            meeting_date: date.map(String::from),
            transcript: transcript.map(String::from),
            ..Default::default()
        }
    }

    fn batch(records: Vec<RawRecord>) -> RawBatch {
        RawBatch {
            source_location: "test".to_string(),
            columns: vec!["meeting_id".into(), "meeting_date".into(), "transcript".into()],
            records,
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn normalize_text_collapses_whitespace_and_controls() {
        assert_eq!(normalize_text("  Call\u{00A0}to\t\torder\u{0007}.\n "), "Call to order.");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn parse_meeting_date_accepts_common_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 3, 14).unwrap();
        assert_eq!(parse_meeting_date("2023-03-14"), Some(expected));
        assert_eq!(parse_meeting_date("03/14/2023"), Some(expected));
        assert_eq!(parse_meeting_date("2023-03-14T18:00:00Z"), Some(expected));
        assert_eq!(parse_meeting_date("2023-03-14 18:00:00"), Some(expected));
        assert_eq!(parse_meeting_date("March 14"), None);
    }

    #[test]
    fn dropped_plus_emitted_equals_input() {
        let records = vec![
            raw(1, Some("m1"), Some("2023-01-01"), Some("hello")),
            raw(2, None, Some("2023-01-01"), Some("hello")),
            raw(3, Some("m3"), Some("not a date"), Some("hello")),
            raw(4, Some("m4"), Some("1850-01-01"), Some("hello")),
            raw(5, Some("m5"), Some("2023-01-01"), Some("   ")),
            raw(6, Some("m1"), Some("2023-01-02"), Some("again")),
            raw(7, Some("bad id!"), Some("2023-01-01"), Some("x")),
            RawRecord::malformed(8, "line 8: expected value"),
        ];
        let out = Cleaner::default().clean(&batch(records)).unwrap();
        let r = &out.report;
        assert_eq!(r.input_count, 8);
        assert_eq!(r.emitted_count, 1);
        assert_eq!(r.dropped_count + r.emitted_count, r.input_count);
        assert_eq!(r.drop_reasons[&DropReason::MissingMeetingId], 1);
        assert_eq!(r.drop_reasons[&DropReason::InvalidMeetingDate], 1);
        assert_eq!(r.drop_reasons[&DropReason::DateOutOfRange], 1);
        assert_eq!(r.drop_reasons[&DropReason::MissingTranscript], 1);
        assert_eq!(r.drop_reasons[&DropReason::Duplicate], 1);
        assert_eq!(r.drop_reasons[&DropReason::InvalidMeetingId], 1);
        assert_eq!(r.drop_reasons[&DropReason::Malformed], 1);
    }

    #[test]
    fn optional_fields_get_defaults_and_agenda_is_split() {
        let mut record = raw(1, Some(" m-1 "), Some("2023-01-01"), Some("  text  "));
        record.agenda = Some("Budget; ; Zoning\nParks".to_string());
        record.speaker = Some("  ".to_string());
        let (clean, filled) = Cleaner::default().clean_record(&record).unwrap();
        assert_eq!(clean.meeting_id, "m-1");
        assert_eq!(clean.transcript, "text");
        assert_eq!(clean.city, UNKNOWN_CITY);
        assert_eq!(clean.speaker, UNKNOWN_SPEAKER);
        assert_eq!(clean.source, UNKNOWN_SOURCE);
        assert_eq!(filled, 3);
        assert_eq!(clean.agenda, vec!["Budget", "Zoning", "Parks"]);
        assert_eq!(clean.summary, None);
    }

    #[test]
    fn missing_required_column_fails_the_batch() {
        let mut b = batch(vec![raw(1, Some("m1"), Some("2023-01-01"), Some("t"))]);
        b.columns = vec!["id".into(), "speaker".into(), "text".into()];
        match Cleaner::default().clean(&b) {
            Err(EtlError::Validation(msg)) => assert!(msg.contains("meeting_date")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}

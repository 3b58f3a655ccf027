use crate::common::error::{EtlError, Result};
use crate::domain::{RawBatch, RawRecord, RecordField};
use crate::observability::metrics;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// On-the-wire shape of a source dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Json,
    NdJson,
}

impl SourceFormat {
    /// Guess the format from a path or URL extension
    pub fn from_location(location: &str) -> Option<Self> {
        let path = location.split(['?', '#']).next().unwrap_or(location);
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(SourceFormat::Csv),
            "json" => Some(SourceFormat::Json),
            "jsonl" | "ndjson" => Some(SourceFormat::NdJson),
            _ => None,
        }
    }

    /// Fallback when the location has no usable extension
    fn sniff(bytes: &[u8]) -> Self {
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace()).copied();
        match first {
            Some(b'[') => SourceFormat::Json,
            Some(b'{') => {
                if serde_json::from_slice::<Value>(bytes).is_ok() {
                    SourceFormat::Json
                } else {
                    SourceFormat::NdJson
                }
            }
            _ => SourceFormat::Csv,
        }
    }
}

/// Reads raw meeting records from a file path or an http(s) URL
#[derive(Debug, Clone)]
pub struct Extractor {
    location: String,
    format: Option<SourceFormat>,
    http_timeout: Duration,
}

impl Extractor {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            format: None,
            http_timeout: Duration::from_secs(60),
        }
    }

    /// Force a format instead of detecting it
    pub fn with_format(mut self, format: Option<SourceFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Read the source into a raw batch.
    ///
    /// Fails with an extraction error when the source cannot be read or parsed,
    /// or when it holds no records. There are no internal retries.
    #[instrument(skip(self), fields(source = %self.location))]
    pub async fn extract(&self) -> Result<RawBatch> {
        let started = Instant::now();
        let result = self.read_and_parse().await;
        match &result {
            Ok(batch) => {
                metrics::extract::records(batch.records.len());
                metrics::extract::duration(started.elapsed().as_secs_f64());
                info!(
                    "Extracted {} raw records ({} columns)",
                    batch.records.len(),
                    batch.columns.len()
                );
            }
            Err(_) => metrics::extract::error(),
        }
        result
    }

    async fn read_and_parse(&self) -> Result<RawBatch> {
        let bytes = self.read_source().await?;
        metrics::extract::source_bytes(bytes.len());

        let format = self
            .format
            .or_else(|| SourceFormat::from_location(&self.location))
            .unwrap_or_else(|| SourceFormat::sniff(&bytes));
        debug!("Parsing {} bytes as {:?}", bytes.len(), format);

        let (columns, records) = match format {
            SourceFormat::Csv => parse_csv(&bytes).map_err(|e| e.to_string()),
            SourceFormat::Json => parse_json(&bytes),
            SourceFormat::NdJson => parse_ndjson(&bytes),
        }
        .map_err(|message| EtlError::extraction(&self.location, message))?;

        if records.is_empty() {
            return Err(EtlError::extraction(&self.location, "source contains no records"));
        }

        Ok(RawBatch {
            source_location: self.location.clone(),
            columns,
            records,
            extracted_at: Utc::now(),
        })
    }

    async fn read_source(&self) -> Result<Vec<u8>> {
        if self.location.starts_with("http://") || self.location.starts_with("https://") {
            let client = reqwest::Client::builder()
                .timeout(self.http_timeout)
                .build()?;
            let resp = client
                .get(&self.location)
                .send()
                .await
                .map_err(|e| EtlError::extraction(&self.location, e))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(EtlError::extraction(
                    &self.location,
                    format!("HTTP status {}", status.as_u16()),
                ));
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| EtlError::extraction(&self.location, e))?;
            Ok(bytes.to_vec())
        } else {
            tokio::fs::read(&self.location)
                .await
                .map_err(|e| EtlError::extraction(&self.location, e))
        }
    }
}

/// Parse a CSV document with a header row.
///
/// Cells are decoded lossily so a badly encoded row still reaches the cleaner.
pub fn parse_csv(bytes: &[u8]) -> std::result::Result<(Vec<String>, Vec<RawRecord>), csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = rdr
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    let fields: Vec<Option<RecordField>> =
        headers.iter().map(|h| RecordField::from_column(h)).collect();

    let mut records = Vec::new();
    for (i, row) in rdr.byte_records().enumerate() {
        let row = row?;
        let mut record = RawRecord::new(i + 1);
        for (idx, cell) in row.iter().enumerate() {
            // An empty cell is CSV's null
            let value = (!cell.is_empty()).then(|| String::from_utf8_lossy(cell).into_owned());
            match fields.get(idx).copied().flatten() {
                Some(field) => record.set(field, value),
                None => {
                    if let (Some(header), Some(value)) = (headers.get(idx), value) {
                        record.metadata.insert(header.clone(), value);
                    }
                }
            }
        }
        records.push(record);
    }
    Ok((headers, records))
}

/// Parse either a top-level array of objects or `{"meetings": [...]}`
pub fn parse_json(bytes: &[u8]) -> std::result::Result<(Vec<String>, Vec<RawRecord>), String> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("meetings") {
            Some(Value::Array(items)) => items,
            _ => return Err("expected an array of records or an object with a 'meetings' array".to_string()),
        },
        _ => return Err("expected an array of records".to_string()),
    };
    records_from_objects(items.into_iter().map(Ok).collect())
}

/// Parse newline-delimited JSON objects, skipping blank lines.
///
/// An unparsable line becomes a malformed record; only a source with no
/// parsable line at all is an error.
pub fn parse_ndjson(bytes: &[u8]) -> std::result::Result<(Vec<String>, Vec<RawRecord>), String> {
    let text = String::from_utf8_lossy(bytes);
    let mut items = Vec::new();
    let mut first_error = None;
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str::<Value>(line).map_err(|e| format!("line {}: {}", lineno + 1, e));
        if let Err(e) = &item {
            first_error.get_or_insert_with(|| e.clone());
        }
        items.push(item);
    }
    if let Some(error) = first_error {
        if items.iter().all(|item| item.is_err()) {
            return Err(error);
        }
    }
    records_from_objects(items)
}

fn records_from_objects(
    items: Vec<std::result::Result<Value, String>>,
) -> std::result::Result<(Vec<String>, Vec<RawRecord>), String> {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(items.len());

    for (i, item) in items.into_iter().enumerate() {
        let map = match item {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                records.push(RawRecord::malformed(i + 1, format!("record is not an object: {other}")));
                continue;
            }
            Err(e) => {
                records.push(RawRecord::malformed(i + 1, e));
                continue;
            }
        };
        let mut record = RawRecord::new(i + 1);
        for (key, value) in map {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
            let text = json_to_text(value);
            match RecordField::from_column(&key) {
                Some(field) => record.set(field, text),
                None => {
                    if let Some(text) = text {
                        record.metadata.insert(key, text);
                    }
                }
            }
        }
        records.push(record);
    }
    if !records.is_empty() && records.iter().all(|r| r.parse_error.is_some()) {
        return Err("no record in the source is an object".to_string());
    }
    Ok((columns, records))
}

fn json_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(list_item_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

// Agenda items arrive either as strings or as objects with a text-ish field
fn list_item_text(item: Value) -> Option<String> {
    if let Value::Object(map) = &item {
        for key in ["text", "title", "item", "description"] {
            if let Some(Value::String(s)) = map.get(key) {
                return Some(s.clone());
            }
        }
        return Some(item.to_string());
    }
    json_to_text(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn csv_headers_map_through_aliases() {
        let data = "id,date,speaker,text,duration\n\
                    m1,2023-01-05,Mayor,\"Call to order.\",3600\n\
                    m2,,Clerk,Roll call,\n";
        let (columns, records) = parse_csv(data.as_bytes()).unwrap();
        assert_eq!(columns, vec!["id", "date", "speaker", "text", "duration"]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].meeting_id.as_deref(), Some("m1"));
        assert_eq!(records[0].transcript.as_deref(), Some("Call to order."));
        assert_eq!(records[0].metadata.get("duration").map(String::as_str), Some("3600"));
        assert_eq!(records[1].meeting_date, None);
        assert_eq!(records[1].row_number, 2);
    }

    #[test]
    fn json_accepts_meetings_wrapper_and_agenda_arrays() {
        let data = r#"{"meetings": [
            {"meeting_id": "a", "meeting_date": "2023-02-01", "transcript": "t",
             "agenda": ["Budget", {"title": "Zoning"}], "city": null}
        ]}"#;
        let (_, records) = parse_json(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agenda.as_deref(), Some("Budget; Zoning"));
        assert_eq!(records[0].city, None);
    }

    #[test]
    fn ndjson_skips_blank_lines_and_keeps_bad_lines_as_malformed() {
        let data = "{\"id\": \"a\"}\n\n{\"id\": \"b\"}\n";
        let (_, records) = parse_ndjson(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let (_, records) = parse_ndjson(b"{\"id\": 1}\n{bad\n").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].parse_error.is_none());
        assert!(records[1].parse_error.as_deref().unwrap().starts_with("line 2"));

        let err = parse_ndjson(b"not json\n{bad\n").unwrap_err();
        assert!(err.starts_with("line 1"));
    }

    #[test]
    fn json_array_elements_that_are_not_objects_become_malformed() {
        let (_, records) = parse_json(br#"[{"id": "a"}, 42]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].meeting_id.as_deref(), Some("a"));
        assert!(records[1].parse_error.is_some());
        assert_eq!(records[1].row_number, 2);

        assert!(parse_json(b"[1, 2]").is_err());
    }

    #[tokio::test]
    async fn badly_encoded_csv_row_does_not_fail_extraction() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"meeting_id,city,meeting_date,transcript\n").unwrap();
        file.write_all(b"m1,Boston,2024-01-01,First\n").unwrap();
        file.write_all(b"m2,caf\xE9,2024-01-02,Second\n").unwrap();
        file.write_all(b"m3,Denver,2024-01-03,Third\n").unwrap();

        let batch = Extractor::new(file.path().to_string_lossy().to_string())
            .with_format(Some(SourceFormat::Csv))
            .extract()
            .await
            .unwrap();
        assert_eq!(batch.records.len(), 3);
        assert_eq!(batch.records[1].city.as_deref(), Some("caf\u{FFFD}"));
        assert_eq!(batch.records[2].meeting_id.as_deref(), Some("m3"));
    }

    #[test]
    fn format_detection_ignores_query_strings() {
        assert_eq!(
            SourceFormat::from_location("https://host/data.ndjson?token=x"),
            Some(SourceFormat::NdJson)
        );
        assert_eq!(SourceFormat::from_location("data/raw/meetings"), None);
        assert_eq!(SourceFormat::sniff(b"  [{}]"), SourceFormat::Json);
        assert_eq!(SourceFormat::sniff(b"{\"a\":1}\n{\"a\":2}"), SourceFormat::NdJson);
        assert_eq!(SourceFormat::sniff(b"id,date"), SourceFormat::Csv);
    }

    #[tokio::test]
    async fn missing_and_empty_sources_are_extraction_errors() {
        let missing = Extractor::new("/definitely/not/here.csv").extract().await;
        assert!(matches!(missing, Err(EtlError::Extraction { .. })));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "meeting_id,meeting_date,transcript").unwrap();
        let empty = Extractor::new(file.path().to_string_lossy().to_string())
            .with_format(Some(SourceFormat::Csv))
            .extract()
            .await;
        match empty {
            Err(EtlError::Extraction { message, .. }) => assert!(message.contains("no records")),
            other => panic!("expected extraction error, got {other:?}"),
        }
    }
}

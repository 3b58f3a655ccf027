use super::{lock, MeetingDimension, NumericColumn, RelationalStore, UpsertOutcome};
use crate::common::error::Result;
use crate::domain::StructuredRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../../migrations/001_create_meetings.sql");

/// SQLite-backed relational store
pub struct SqliteRelationalStore {
    conn: Mutex<Connection>,
}

impl SqliteRelationalStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        info!("Opened relational store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // Reads against a database that was never loaded count as empty
    fn has_meetings_table(conn: &Connection) -> Result<bool> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'meetings'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn scalar(&self, sql: &str) -> Result<u64> {
        let conn = lock(&self.conn)?;
        if !Self::has_meetings_table(&conn)? {
            return Ok(0);
        }
        let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(value.max(0) as u64)
    }
}

#[async_trait]
impl RelationalStore for SqliteRelationalStore {
    async fn ensure_schema(&self) -> Result<()> {
        lock(&self.conn)?.execute_batch(SCHEMA)?;
        debug!("Relational schema applied");
        Ok(())
    }

    async fn upsert_meeting(&self, record: &StructuredRecord) -> Result<UpsertOutcome> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        let city_id = record.city_id.to_string();
        tx.execute(
            "INSERT INTO cities (city_id, city_name) VALUES (?1, ?2)
             ON CONFLICT(city_id) DO UPDATE SET city_name = excluded.city_name",
            params![city_id, record.city_name],
        )?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT meeting_id FROM meetings WHERE meeting_id = ?1",
                params![record.meeting_id],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO meetings (
                meeting_id, city_id, meeting_date, meeting_year, meeting_month, weekday,
                speaker, word_count, char_count, agenda_item_count, summary_word_count,
                source, content_hash, loaded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, datetime('now'))
             ON CONFLICT(meeting_id) DO UPDATE SET
                city_id = excluded.city_id,
                meeting_date = excluded.meeting_date,
                meeting_year = excluded.meeting_year,
                meeting_month = excluded.meeting_month,
                weekday = excluded.weekday,
                speaker = excluded.speaker,
                word_count = excluded.word_count,
                char_count = excluded.char_count,
                agenda_item_count = excluded.agenda_item_count,
                summary_word_count = excluded.summary_word_count,
                source = excluded.source,
                content_hash = excluded.content_hash,
                loaded_at = excluded.loaded_at",
            params![
                record.meeting_id,
                city_id,
                record.meeting_date.format("%Y-%m-%d").to_string(),
                record.meeting_year,
                record.meeting_month,
                record.weekday,
                record.speaker,
                record.word_count as i64,
                record.char_count as i64,
                record.agenda_item_count as i64,
                record.summary_word_count as i64,
                record.source,
                record.content_hash,
            ],
        )?;
        tx.commit()?;

        Ok(if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn meeting_count(&self) -> Result<u64> {
        self.scalar("SELECT COUNT(*) FROM meetings")
    }

    async fn city_count(&self) -> Result<u64> {
        // Only cities that still have meetings
        self.scalar("SELECT COUNT(DISTINCT city_id) FROM meetings")
    }

    async fn count_by(&self, dimension: MeetingDimension) -> Result<BTreeMap<String, u64>> {
        let conn = lock(&self.conn)?;
        if !Self::has_meetings_table(&conn)? {
            return Ok(BTreeMap::new());
        }
        let sql = match dimension {
            MeetingDimension::City => {
                "SELECT c.city_name, COUNT(*) FROM meetings m
                 JOIN cities c ON c.city_id = m.city_id GROUP BY c.city_name"
            }
            MeetingDimension::Speaker => "SELECT speaker, COUNT(*) FROM meetings GROUP BY speaker",
            MeetingDimension::Month => {
                "SELECT substr(meeting_date, 1, 7), COUNT(*) FROM meetings GROUP BY 1"
            }
            MeetingDimension::Weekday => "SELECT weekday, COUNT(*) FROM meetings GROUP BY weekday",
        };
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(key, count.max(0) as u64);
        }
        Ok(counts)
    }

    async fn numeric_column(&self, column: NumericColumn) -> Result<Vec<f64>> {
        let conn = lock(&self.conn)?;
        if !Self::has_meetings_table(&conn)? {
            return Ok(Vec::new());
        }
        let sql = match column {
            NumericColumn::WordCount => "SELECT word_count FROM meetings",
            NumericColumn::AgendaItemCount => "SELECT agenda_item_count FROM meetings",
            NumericColumn::SummaryWordCount => "SELECT summary_word_count FROM meetings",
        };
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            let v: i64 = row.get(0)?;
            values.push(v as f64);
        }
        Ok(values)
    }

    async fn count_with_summary(&self) -> Result<u64> {
        self.scalar("SELECT COUNT(*) FROM meetings WHERE summary_word_count > 0")
    }
}

//! Storage layer for the transport log.
//!
//! Provides persistence for finished logs and the sync outbox using
//! `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization. The application drives
//! it from a single task.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format (e.g., `2024-01-15T10:30:00.000Z`)
//! and dates as `YYYY-MM-DD`. Lexicographic ordering matches chronological ordering.
//!
//! ## Outbox
//!
//! The `outbox` table holds one row per log that has not reached the remote
//! sink yet. Its own autoincrement `seq` column fixes the delivery order, and
//! rows disappear with their log through `ON DELETE CASCADE`.

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

use tl_core::{LogEntry, LogId, LogRecord, LogStore};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for log {log_id}: {timestamp}")]
    TimestampParse {
        log_id: i64,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

const LOG_COLUMNS: &str = "
    logs.id, logs.date, logs.departure_name, logs.arrival_name,
    logs.departure_time, logs.arrival_time, logs.driving_minutes, logs.break_minutes,
    logs.distance_km, logs.fuel_litres, logs.fuel_cost,
    logs.departure_lat, logs.departure_lng, logs.arrival_lat, logs.arrival_lng, logs.note
";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            -- Finished driving logs
            -- departure_time/arrival_time/created_at: ISO 8601 (e.g., '2024-01-15T10:30:00.000Z')
            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                departure_name TEXT NOT NULL,
                arrival_name TEXT NOT NULL,
                departure_time TEXT NOT NULL,
                arrival_time TEXT NOT NULL,
                driving_minutes INTEGER NOT NULL,
                break_minutes INTEGER NOT NULL,
                distance_km REAL NOT NULL,
                fuel_litres REAL NOT NULL DEFAULT 0,
                fuel_cost REAL NOT NULL DEFAULT 0,
                departure_lat REAL NOT NULL DEFAULT 0,
                departure_lng REAL NOT NULL DEFAULT 0,
                arrival_lat REAL NOT NULL DEFAULT 0,
                arrival_lng REAL NOT NULL DEFAULT 0,
                note TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_logs_date ON logs(date);

            -- Logs not yet delivered to the remote sink, in delivery order
            CREATE TABLE IF NOT EXISTS outbox (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                log_id INTEGER NOT NULL UNIQUE,
                queued_at TEXT NOT NULL,
                FOREIGN KEY (log_id) REFERENCES logs(id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    /// Appends a log at an explicit creation time.
    fn append_at(
        &mut self,
        entry: &LogEntry,
        queue_for_sync: bool,
        now: DateTime<Utc>,
    ) -> Result<LogId, DbError> {
        let created_at = format_timestamp(now);
        let tx = self.conn.transaction()?;
        tx.execute(
            "
            INSERT INTO logs
            (date, departure_name, arrival_name, departure_time, arrival_time,
             driving_minutes, break_minutes, distance_km, fuel_litres, fuel_cost,
             departure_lat, departure_lng, arrival_lat, arrival_lng, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                entry.date.format("%Y-%m-%d").to_string(),
                entry.departure_name,
                entry.arrival_name,
                format_timestamp(entry.departure_time),
                format_timestamp(entry.arrival_time),
                entry.driving_minutes,
                entry.break_minutes,
                entry.distance_km,
                entry.fuel_litres,
                entry.fuel_cost,
                entry.departure_lat,
                entry.departure_lng,
                entry.arrival_lat,
                entry.arrival_lng,
                entry.note,
                created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        if queue_for_sync {
            tx.execute(
                "INSERT INTO outbox (log_id, queued_at) VALUES (?, ?)",
                params![id, created_at],
            )?;
        }
        tx.commit()?;
        tracing::debug!(id, queued = queue_for_sync, "log stored");
        Ok(LogId::new(id))
    }

    fn query_logs(&self, sql: &str) -> Result<Vec<LogRecord>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], LogRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

impl LogStore for Database {
    type Error = DbError;

    fn append(&mut self, entry: &LogEntry, queue_for_sync: bool) -> Result<LogId, DbError> {
        self.append_at(entry, queue_for_sync, Utc::now())
    }

    fn get(&self, id: LogId) -> Result<Option<LogRecord>, DbError> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE logs.id = ?");
        let row = self
            .conn
            .query_row(&sql, [id.get()], LogRow::from_row)
            .optional()?;
        row.map(LogRow::into_record).transpose()
    }

    fn list_all(&self) -> Result<Vec<LogRecord>, DbError> {
        self.query_logs(&format!(
            "SELECT {LOG_COLUMNS} FROM logs ORDER BY logs.id ASC"
        ))
    }

    fn list_not_synced(&self) -> Result<Vec<LogRecord>, DbError> {
        self.query_logs(&format!(
            "
            SELECT {LOG_COLUMNS}
            FROM outbox
            JOIN logs ON logs.id = outbox.log_id
            ORDER BY outbox.seq ASC
            "
        ))
    }

    fn count_not_synced(&self) -> Result<usize, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn clear_not_synced(&mut self) -> Result<usize, DbError> {
        Ok(self.conn.execute("DELETE FROM outbox", [])?)
    }

    fn clear_delivered(&mut self, ids: &[LogId]) -> Result<usize, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM outbox WHERE log_id = ?")?;
            for id in ids {
                removed += stmt.execute([id.get()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn delete_by_id(&mut self, id: LogId) -> Result<bool, DbError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM outbox WHERE log_id = ?", [id.get()])?;
        let deleted = tx.execute("DELETE FROM logs WHERE id = ?", [id.get()])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

#[derive(Debug)]
struct LogRow {
    id: i64,
    date: String,
    departure_name: String,
    arrival_name: String,
    departure_time: String,
    arrival_time: String,
    driving_minutes: i64,
    break_minutes: i64,
    distance_km: f64,
    fuel_litres: f64,
    fuel_cost: f64,
    departure_lat: f64,
    departure_lng: f64,
    arrival_lat: f64,
    arrival_lng: f64,
    note: String,
}

impl LogRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            departure_name: row.get(2)?,
            arrival_name: row.get(3)?,
            departure_time: row.get(4)?,
            arrival_time: row.get(5)?,
            driving_minutes: row.get(6)?,
            break_minutes: row.get(7)?,
            distance_km: row.get(8)?,
            fuel_litres: row.get(9)?,
            fuel_cost: row.get(10)?,
            departure_lat: row.get(11)?,
            departure_lng: row.get(12)?,
            arrival_lat: row.get(13)?,
            arrival_lng: row.get(14)?,
            note: row.get(15)?,
        })
    }

    fn into_record(self) -> Result<LogRecord, DbError> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|source| {
            DbError::TimestampParse {
                log_id: self.id,
                timestamp: self.date.clone(),
                source,
            }
        })?;
        let departure_time = parse_timestamp(&self.departure_time, self.id)?;
        let arrival_time = parse_timestamp(&self.arrival_time, self.id)?;
        Ok(LogRecord {
            id: LogId::new(self.id),
            entry: LogEntry {
                date,
                departure_name: self.departure_name,
                arrival_name: self.arrival_name,
                departure_time,
                arrival_time,
                driving_minutes: self.driving_minutes,
                break_minutes: self.break_minutes,
                distance_km: self.distance_km,
                fuel_litres: self.fuel_litres,
                fuel_cost: self.fuel_cost,
                departure_lat: self.departure_lat,
                departure_lng: self.departure_lng,
                arrival_lat: self.arrival_lat,
                arrival_lng: self.arrival_lng,
                note: self.note,
            },
        })
    }
}

fn parse_timestamp(timestamp: &str, log_id: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            log_id,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn entry(note: &str) -> LogEntry {
        LogEntry {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            departure_name: "Depot".to_string(),
            arrival_name: "Harbour".to_string(),
            departure_time: ts("2025-01-01T08:00:00Z"),
            arrival_time: ts("2025-01-01T10:30:00Z"),
            driving_minutes: 135,
            break_minutes: 15,
            distance_km: 102.345,
            fuel_litres: 10.5,
            fuel_cost: 3000.0,
            departure_lat: 35.0,
            departure_lng: 139.0,
            arrival_lat: 35.4,
            arrival_lng: 139.6,
            note: note.to_string(),
        }
    }

    fn notes(records: &[LogRecord]) -> Vec<String> {
        records.iter().map(|r| r.entry.note.clone()).collect()
    }

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory().expect("open in-memory db");
        assert!(db.list_all().unwrap().is_empty());
    }

    #[test]
    fn schema_has_logs_and_outbox() {
        let db = Database::open_in_memory().unwrap();
        let mut stmt = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .unwrap();
        let tables: HashSet<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert!(tables.contains("logs"));
        assert!(tables.contains("outbox"));
    }

    #[test]
    fn append_is_visible_and_round_trips_fields() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db.append(&entry("first"), false).unwrap();
        let all = db.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].entry, entry("first"));
        assert_eq!(db.get(id).unwrap().unwrap().entry, entry("first"));
        assert!(db.list_not_synced().unwrap().is_empty());
    }

    #[test]
    fn ids_are_assigned_in_insertion_order() {
        let mut db = Database::open_in_memory().unwrap();
        let a = db.append(&entry("a"), false).unwrap();
        let b = db.append(&entry("b"), false).unwrap();
        assert!(a < b);
    }

    #[test]
    fn not_synced_lists_in_queue_order() {
        let mut db = Database::open_in_memory().unwrap();
        db.append(&entry("one"), true).unwrap();
        db.append(&entry("skipped"), false).unwrap();
        db.append(&entry("two"), true).unwrap();
        db.append(&entry("three"), true).unwrap();

        let pending = db.list_not_synced().unwrap();
        assert_eq!(notes(&pending), vec!["one", "two", "three"]);
        assert_eq!(db.count_not_synced().unwrap(), 3);
    }

    #[test]
    fn clear_not_synced_keeps_canonical_logs() {
        let mut db = Database::open_in_memory().unwrap();
        db.append(&entry("one"), true).unwrap();
        db.append(&entry("two"), true).unwrap();

        assert_eq!(db.clear_not_synced().unwrap(), 2);
        assert!(db.list_not_synced().unwrap().is_empty());
        assert_eq!(db.list_all().unwrap().len(), 2);
    }

    #[test]
    fn clear_delivered_leaves_later_entries_queued() {
        let mut db = Database::open_in_memory().unwrap();
        let a = db.append(&entry("a"), true).unwrap();
        let b = db.append(&entry("b"), true).unwrap();
        db.append(&entry("late"), true).unwrap();

        assert_eq!(db.clear_delivered(&[a, b]).unwrap(), 2);
        assert_eq!(notes(&db.list_not_synced().unwrap()), vec!["late"]);
        assert_eq!(db.clear_delivered(&[]).unwrap(), 0);
    }

    #[test]
    fn delete_removes_from_both_sets() {
        let mut db = Database::open_in_memory().unwrap();
        let a = db.append(&entry("a"), true).unwrap();
        db.append(&entry("b"), true).unwrap();

        assert!(db.delete_by_id(a).unwrap());
        assert_eq!(notes(&db.list_all().unwrap()), vec!["b"]);
        assert_eq!(notes(&db.list_not_synced().unwrap()), vec!["b"]);
        assert!(!db.delete_by_id(a).unwrap());
        assert!(db.get(a).unwrap().is_none());
    }

    #[test]
    fn data_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tl.db");
        {
            let mut db = Database::open(&path).unwrap();
            db.append(&entry("persisted"), true).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(notes(&db.list_all().unwrap()), vec!["persisted"]);
        assert_eq!(notes(&db.list_not_synced().unwrap()), vec!["persisted"]);
    }

    #[test]
    fn created_at_uses_given_clock() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .append_at(&entry("clock"), false, ts("2025-02-03T04:05:06Z"))
            .unwrap();
        let created_at: String = db
            .conn
            .query_row("SELECT created_at FROM logs WHERE id = ?", [id.get()], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(created_at, "2025-02-03T04:05:06.000Z");
    }
}

use super::{Backend, Record, RecordFields};
use crate::error::{Result, TemplateDbError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed record store: one row per record, fields kept as JSON.
/// Also tracks catalog revisions and an import log.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

/// One row of the import log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportLogEntry {
    pub session: String,
    pub roots: usize,
    pub failures: usize,
    pub imported_at: String,
}

impl SqliteBackend {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = SqliteBackend {
            conn: Mutex::new(conn),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = SqliteBackend {
            conn: Mutex::new(conn),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TemplateDbError::Other("sqlite connection lock poisoned".into()))
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS catalog_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL,
                catalog_yaml TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                data_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            );

            CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);

            CREATE TABLE IF NOT EXISTS import_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session TEXT NOT NULL,
                roots INTEGER NOT NULL,
                failures INTEGER NOT NULL,
                imported_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "
        )?;
        Ok(())
    }

    // ── Catalog State ────────────────────────────────────────────────

    /// Get the most recent catalog hash.
    pub fn get_last_catalog_hash(&self) -> Result<Option<String>> {
        let result = self.conn()?.query_row(
            "SELECT hash FROM catalog_history ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        ).optional()?;
        Ok(result)
    }

    /// Record a new catalog revision.
    pub fn record_catalog(&self, hash: &str, yaml: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO catalog_history (hash, catalog_yaml) VALUES (?1, ?2)",
            params![hash, yaml],
        )?;
        Ok(())
    }

    // ── Import Log ───────────────────────────────────────────────────

    pub fn record_import(&self, session: &str, roots: usize, failures: usize) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO import_log (session, roots, failures) VALUES (?1, ?2, ?3)",
            params![session, roots as i64, failures as i64],
        )?;
        Ok(())
    }

    /// Import log, most recent first.
    pub fn list_imports(&self) -> Result<Vec<ImportLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session, roots, failures, imported_at FROM import_log ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ImportLogEntry {
                session: row.get(0)?,
                roots: row.get::<_, i64>(1)? as usize,
                failures: row.get::<_, i64>(2)? as usize,
                imported_at: row.get(3)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Number of records of a kind.
    pub fn count_records(&self, kind: &str) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM records WHERE kind = ?1",
            params![kind],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Raw row from the records table
struct RecordRow {
    kind: String,
    key: String,
    data_json: String,
    created_at: String,
    modified_at: String,
}

impl RecordRow {
    fn into_record(self) -> Result<Record> {
        let fields = match serde_json::from_str(&self.data_json)? {
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(TemplateDbError::InvalidRecord {
                    kind: self.kind,
                    key: self.key,
                    reason: "stored data is not a JSON object".into(),
                })
            }
        };
        let created_at = parse_timestamp(&self.kind, &self.key, &self.created_at)?;
        let modified_at = parse_timestamp(&self.kind, &self.key, &self.modified_at)?;
        Ok(Record {
            kind: self.kind,
            key: self.key,
            fields,
            created_at,
            modified_at,
        })
    }
}

fn parse_timestamp(kind: &str, key: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TemplateDbError::InvalidRecord {
            kind: kind.to_string(),
            key: key.to_string(),
            reason: format!("bad timestamp '{raw}': {e}"),
        })
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        kind: row.get(0)?,
        key: row.get(1)?,
        data_json: row.get(2)?,
        created_at: row.get(3)?,
        modified_at: row.get(4)?,
    })
}

impl Backend for SqliteBackend {
    fn save_record(&self, kind: &str, key: &str, fields: &RecordFields) -> Result<()> {
        let data_json = serde_json::to_string(fields)?;
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO records (kind, key, data_json, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(kind, key) DO UPDATE SET
                data_json = excluded.data_json,
                modified_at = excluded.modified_at",
            params![kind, key, data_json, now],
        )?;
        Ok(())
    }

    fn load_record(&self, kind: &str, key: &str) -> Result<Option<Record>> {
        let row = self.conn()?.query_row(
            "SELECT kind, key, data_json, created_at, modified_at
             FROM records WHERE kind = ?1 AND key = ?2",
            params![kind, key],
            map_row,
        ).optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    fn list_records(&self, kind: &str) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, key, data_json, created_at, modified_at
             FROM records WHERE kind = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![kind], map_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    fn delete_record(&self, kind: &str, key: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            "DELETE FROM records WHERE kind = ?1 AND key = ?2",
            params![kind, key],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(json: serde_json::Value) -> RecordFields {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn test_create_and_query_record() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.save_record(
            "OpaqueMaterial",
            "OpaqueMaterial, Brick",
            &fields(serde_json::json!({ "Name": "Brick", "Density": 1900.0 })),
        )
        .unwrap();

        let record = db
            .load_record("OpaqueMaterial", "OpaqueMaterial, Brick")
            .unwrap()
            .unwrap();
        assert_eq!(record.kind, "OpaqueMaterial");
        assert_eq!(record.fields["Name"], "Brick");
        assert_eq!(record.fields["Density"], 1900.0);
    }

    #[test]
    fn test_list_records() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.save_record("DaySchedule", "b", &RecordFields::new()).unwrap();
        db.save_record("DaySchedule", "a", &RecordFields::new()).unwrap();
        db.save_record("WeekSchedule", "w", &RecordFields::new()).unwrap();

        let records = db.list_records("DaySchedule").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "a");
        assert_eq!(db.count_records("WeekSchedule").unwrap(), 1);
    }

    #[test]
    fn test_delete_record() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.save_record("K", "a", &RecordFields::new()).unwrap();

        assert!(db.delete_record("K", "a").unwrap());
        assert!(db.load_record("K", "a").unwrap().is_none());
        assert!(!db.delete_record("K", "a").unwrap());
    }

    #[test]
    fn test_upsert_updates_existing() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.save_record("K", "a", &fields(serde_json::json!({ "v": 1 }))).unwrap();
        let first = db.get_record("K", "a").unwrap();
        db.save_record("K", "a", &fields(serde_json::json!({ "v": 2 }))).unwrap();

        let records = db.list_records("K").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["v"], 2);
        assert_eq!(records[0].created_at, first.created_at);
    }

    #[test]
    fn test_catalog_history() {
        let db = SqliteBackend::open_in_memory().unwrap();

        assert!(db.get_last_catalog_hash().unwrap().is_none());

        db.record_catalog("abc123", "root: A").unwrap();
        assert_eq!(
            db.get_last_catalog_hash().unwrap(),
            Some("abc123".to_string())
        );

        db.record_catalog("def456", "root: B").unwrap();
        assert_eq!(
            db.get_last_catalog_hash().unwrap(),
            Some("def456".to_string())
        );
    }

    #[test]
    fn test_import_log() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.record_import("s1", 2, 0).unwrap();
        db.record_import("s2", 3, 1).unwrap();

        let log = db.list_imports().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].session, "s2");
        assert_eq!(log[0].failures, 1);
    }

    #[test]
    fn test_on_disk_database_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("templates.db");
        {
            let db = SqliteBackend::open(&path).unwrap();
            db.save_record("K", "a", &fields(serde_json::json!({ "v": true }))).unwrap();
        }
        let db = SqliteBackend::open(&path).unwrap();
        assert_eq!(db.get_record("K", "a").unwrap().fields["v"], true);
    }
}

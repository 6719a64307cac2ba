//! Persistence backends.
//!
//! The graph walk only needs four operations on records addressed by
//! `(kind, key)`. Backends must be safe to share between threads; each call
//! is one independent write or read, there is no multi-record transaction.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::{ImportLogEntry, SqliteBackend};

use crate::error::{Result, TemplateDbError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stored field values of one record
pub type RecordFields = serde_json::Map<String, serde_json::Value>;

/// Marker key of a stored reference
pub const REF_KEY: &str = "$ref";

/// Address of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoredKey {
    pub kind: String,
    pub key: String,
}

impl StoredKey {
    pub fn new(kind: &str, key: &str) -> Self {
        StoredKey {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    /// Stored form of a reference to this record:
    /// `{"$ref": <key>, "$kind": <kind>}`
    pub fn to_marker(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert(REF_KEY.into(), serde_json::Value::String(self.key.clone()));
        obj.insert(
            crate::node::KIND_KEY.into(),
            serde_json::Value::String(self.kind.clone()),
        );
        serde_json::Value::Object(obj)
    }

    /// Read a reference marker. Plain objects and strings are not markers.
    pub fn from_marker(value: &serde_json::Value) -> Option<StoredKey> {
        let obj = value.as_object()?;
        let key = obj.get(REF_KEY)?.as_str()?;
        let kind = obj.get(crate::node::KIND_KEY)?.as_str()?;
        Some(StoredKey::new(kind, key))
    }
}

impl fmt::Display for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

/// A stored record with its bookkeeping timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: String,
    pub key: String,
    pub fields: RecordFields,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Record {
    pub fn stored_key(&self) -> StoredKey {
        StoredKey::new(&self.kind, &self.key)
    }

    /// Every reference held anywhere in this record's fields
    pub fn references(&self) -> Vec<StoredKey> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            collect_references(value, &mut out);
        }
        out
    }
}

fn collect_references(value: &serde_json::Value, out: &mut Vec<StoredKey>) {
    if let Some(key) = StoredKey::from_marker(value) {
        out.push(key);
        return;
    }
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

/// Record storage used by the importer and exporter.
pub trait Backend: Send + Sync {
    /// Insert or overwrite the record at `(kind, key)`. An overwrite keeps
    /// the original `created_at`.
    fn save_record(&self, kind: &str, key: &str, fields: &RecordFields) -> Result<()>;

    fn load_record(&self, kind: &str, key: &str) -> Result<Option<Record>>;

    /// All records of a kind, ordered by key
    fn list_records(&self, kind: &str) -> Result<Vec<Record>>;

    /// Remove a record. Returns whether it existed.
    fn delete_record(&self, kind: &str, key: &str) -> Result<bool>;

    /// Load a record that must exist
    fn get_record(&self, kind: &str, key: &str) -> Result<Record> {
        self.load_record(kind, key)?
            .ok_or_else(|| TemplateDbError::NotFound {
                kind: kind.to_string(),
                key: key.to_string(),
            })
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn save_record(&self, kind: &str, key: &str, fields: &RecordFields) -> Result<()> {
        (**self).save_record(kind, key, fields)
    }

    fn load_record(&self, kind: &str, key: &str) -> Result<Option<Record>> {
        (**self).load_record(kind, key)
    }

    fn list_records(&self, kind: &str) -> Result<Vec<Record>> {
        (**self).list_records(kind)
    }

    fn delete_record(&self, kind: &str, key: &str) -> Result<bool> {
        (**self).delete_record(kind, key)
    }
}

use super::{Backend, Record, RecordFields};
use crate::error::{Result, TemplateDbError};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A backend that keeps records in process memory. Used in tests and for
/// one-shot conversions that never touch disk.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<BTreeMap<(String, String), Record>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all kinds
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> TemplateDbError {
    TemplateDbError::Other("memory backend lock poisoned".into())
}

impl Backend for MemoryBackend {
    fn save_record(&self, kind: &str, key: &str, fields: &RecordFields) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        let now = Utc::now();
        let created_at = records
            .get(&(kind.to_string(), key.to_string()))
            .map(|r| r.created_at)
            .unwrap_or(now);
        records.insert(
            (kind.to_string(), key.to_string()),
            Record {
                kind: kind.to_string(),
                key: key.to_string(),
                fields: fields.clone(),
                created_at,
                modified_at: now,
            },
        );
        Ok(())
    }

    fn load_record(&self, kind: &str, key: &str) -> Result<Option<Record>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(&(kind.to_string(), key.to_string())).cloned())
    }

    fn list_records(&self, kind: &str) -> Result<Vec<Record>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    fn delete_record(&self, kind: &str, key: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.remove(&(kind.to_string(), key.to_string())).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(json: serde_json::Value) -> RecordFields {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn test_save_and_load() {
        let backend = MemoryBackend::new();
        backend
            .save_record("DaySchedule", "d1", &fields(serde_json::json!({ "Type": "Fraction" })))
            .unwrap();

        let record = backend.load_record("DaySchedule", "d1").unwrap().unwrap();
        assert_eq!(record.fields["Type"], "Fraction");
        assert!(backend.load_record("DaySchedule", "d2").unwrap().is_none());
        assert!(backend.load_record("WeekSchedule", "d1").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_keeps_created_at() {
        let backend = MemoryBackend::new();
        backend
            .save_record("K", "a", &fields(serde_json::json!({ "v": 1 })))
            .unwrap();
        let first = backend.get_record("K", "a").unwrap();
        backend
            .save_record("K", "a", &fields(serde_json::json!({ "v": 2 })))
            .unwrap();
        let second = backend.get_record("K", "a").unwrap();

        assert_eq!(backend.len(), 1);
        assert_eq!(second.fields["v"], 2);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.modified_at >= first.modified_at);
    }

    #[test]
    fn test_list_is_per_kind_and_ordered() {
        let backend = MemoryBackend::new();
        let empty = RecordFields::new();
        backend.save_record("K", "b", &empty).unwrap();
        backend.save_record("K", "a", &empty).unwrap();
        backend.save_record("L", "c", &empty).unwrap();

        let keys: Vec<_> = backend
            .list_records("K")
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_delete_and_get_record_not_found() {
        let backend = MemoryBackend::new();
        backend.save_record("K", "a", &RecordFields::new()).unwrap();
        assert!(backend.delete_record("K", "a").unwrap());
        assert!(!backend.delete_record("K", "a").unwrap());

        let err = backend.get_record("K", "a").unwrap_err();
        assert!(matches!(err, TemplateDbError::NotFound { .. }));
    }
}

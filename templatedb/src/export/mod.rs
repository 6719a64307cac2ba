//! Graph exporter: rebuilds archive nodes from stored records.

mod snapshot;

pub use snapshot::{record_id, Snapshot, SnapshotGroup};

use crate::backend::{Backend, Record, StoredKey};
use crate::catalog::{Catalog, FieldCategory, FieldSpec, KindEntry};
use crate::error::{NodeLocation, Result, TemplateDbError};
use crate::node::{Archive, Embedded, Node, NodeId, Value, KIND_KEY, NAME_FIELD};
use std::collections::HashMap;

/// Kind given to undeclared nested objects that carry no `$kind`
const UNTYPED_OBJECT: &str = "Object";

pub struct Exporter<'a, B: Backend + ?Sized> {
    catalog: &'a Catalog,
    backend: &'a B,
}

/// Per-call state: the arena being filled, the memo of records already
/// rebuilt, and the records on the current path.
#[derive(Default)]
struct Session {
    archive: Archive,
    memo: HashMap<StoredKey, NodeId>,
    keys: HashMap<NodeId, StoredKey>,
    on_path: Vec<StoredKey>,
}

impl<'a, B: Backend + ?Sized> Exporter<'a, B> {
    pub fn new(catalog: &'a Catalog, backend: &'a B) -> Self {
        Exporter { catalog, backend }
    }

    /// Rebuild the node stored at `(kind, key)` and everything it references.
    /// The node is the archive's only root.
    pub fn export(&self, kind: &str, key: &str) -> Result<Archive> {
        log::info!("Exporting {kind}/{key}");
        let mut session = Session::default();
        let root = self.export_record(&mut session, &StoredKey::new(kind, key))?;
        session.archive.mark_root(root);
        Ok(session.archive)
    }

    /// Rebuild every stored record into one shared arena, grouped by kind.
    pub fn export_all(&self) -> Result<Snapshot> {
        let mut session = Session::default();
        let mut groups = Vec::new();

        for entry in self.catalog.stored_kinds() {
            let records = self.backend.list_records(&entry.name)?;
            if records.is_empty() {
                continue;
            }
            let mut members = Vec::with_capacity(records.len());
            for record in records {
                let key = record.stored_key();
                let id = self.export_loaded(&mut session, record)?;
                session.archive.mark_root(id);
                members.push(id);
                log::debug!("Exported {key}");
            }
            groups.push(SnapshotGroup {
                kind: entry.name.clone(),
                collection: entry.collection.clone(),
                members,
            });
        }

        log::info!(
            "Exported {} record(s) in {} collection(s)",
            session.archive.len(),
            groups.len()
        );
        Ok(Snapshot::new(session.archive, groups, session.keys))
    }

    fn export_record(&self, session: &mut Session, key: &StoredKey) -> Result<NodeId> {
        if let Some(id) = session.memo.get(key) {
            return Ok(*id);
        }
        if session.on_path.contains(key) {
            let mut path: Vec<String> = session.on_path.iter().map(|k| k.to_string()).collect();
            path.push(key.to_string());
            return Err(TemplateDbError::CyclicReference { path });
        }
        let record = self.backend.get_record(&key.kind, &key.key)?;
        self.export_loaded(session, record)
    }

    /// Rebuild an already loaded record, unless the memo has it.
    fn export_loaded(&self, session: &mut Session, record: Record) -> Result<NodeId> {
        let key = record.stored_key();
        if let Some(id) = session.memo.get(&key) {
            return Ok(*id);
        }

        session.on_path.push(key.clone());
        let result = self.build_node(session, &record);
        session.on_path.pop();

        let id = session.archive.add(result?);
        session.memo.insert(key.clone(), id);
        session.keys.insert(id, key);
        Ok(id)
    }

    fn build_node(&self, session: &mut Session, record: &Record) -> Result<Node> {
        let name = match record.fields.get(NAME_FIELD) {
            Some(serde_json::Value::String(name)) => name.clone(),
            _ => return Err(invalid(record, format!("missing '{NAME_FIELD}' field"))),
        };
        let location = NodeLocation::new(&record.kind, &name).with_key(&record.key);
        let entry = self.catalog.kind_of(&location)?;

        let mut node = Node::new(&entry.name, &name);
        for (field, json) in &record.fields {
            if field == NAME_FIELD {
                continue;
            }
            let spec = entry.field(field).map(|f| &f.spec);
            let value = self.read_value(session, record, field, spec, json)?;
            node.fields.insert(field.clone(), value);
        }

        if entry.name == self.catalog.root_kind() {
            self.fold_flattened_metadata(entry, &mut node);
        }
        Ok(node)
    }

    fn read_value(
        &self,
        session: &mut Session,
        record: &Record,
        field: &str,
        spec: Option<&FieldSpec>,
        json: &serde_json::Value,
    ) -> Result<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let category = match spec {
            Some(spec) => spec.category(),
            None => return self.read_untyped(session, json),
        };

        match category {
            FieldCategory::Reference(_) => match StoredKey::from_marker(json) {
                Some(target) => Ok(Value::Ref(self.export_record(session, &target)?)),
                None => Err(invalid(
                    record,
                    format!("field '{field}' should hold a reference, found {json}"),
                )),
            },
            FieldCategory::Embedded(target) => match json {
                serde_json::Value::Object(map) => {
                    let kind = map
                        .get(KIND_KEY)
                        .and_then(|k| k.as_str())
                        .unwrap_or(target);
                    self.read_embedded(session, record, field, kind, map)
                }
                other => Err(invalid(
                    record,
                    format!("field '{field}' should hold an embedded {target}, found {other}"),
                )),
            },
            FieldCategory::Sequence(items) => match json {
                serde_json::Value::Array(values) => {
                    let mut out = Vec::with_capacity(values.len());
                    for (i, v) in values.iter().enumerate() {
                        let path = format!("{field}[{i}]");
                        out.push(self.read_value(session, record, &path, Some(items), v)?);
                    }
                    Ok(Value::List(out))
                }
                other => Err(invalid(
                    record,
                    format!("field '{field}' should hold a list, found {other}"),
                )),
            },
            FieldCategory::Scalar(_) => match Value::from_json_scalar(json) {
                Some(value) => Ok(value),
                // Untyped lists and stray objects are kept by shape.
                None => self.read_untyped(session, json),
            },
        }
    }

    fn read_embedded(
        &self,
        session: &mut Session,
        record: &Record,
        field: &str,
        kind: &str,
        map: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Value> {
        let entry = self.catalog.get(kind);
        let mut embedded = Embedded::new(kind);
        for (name, v) in map {
            if name == KIND_KEY {
                continue;
            }
            let spec = entry.and_then(|e| e.field(name)).map(|f| &f.spec);
            let path = format!("{field}.{name}");
            embedded
                .fields
                .insert(name.clone(), self.read_value(session, record, &path, spec, v)?);
        }
        Ok(Value::Embedded(embedded))
    }

    /// Values of undeclared fields, converted by shape.
    fn read_untyped(&self, session: &mut Session, json: &serde_json::Value) -> Result<Value> {
        if let Some(target) = StoredKey::from_marker(json) {
            return Ok(Value::Ref(self.export_record(session, &target)?));
        }
        Ok(match json {
            serde_json::Value::Array(values) => {
                let mut out = Vec::with_capacity(values.len());
                for v in values {
                    out.push(self.read_untyped(session, v)?);
                }
                Value::List(out)
            }
            serde_json::Value::Object(map) => {
                let kind = map
                    .get(KIND_KEY)
                    .and_then(|k| k.as_str())
                    .unwrap_or(UNTYPED_OBJECT);
                let mut embedded = Embedded::new(kind);
                for (name, v) in map {
                    if name != KIND_KEY {
                        embedded.fields.insert(name.clone(), self.read_untyped(session, v)?);
                    }
                }
                Value::Embedded(embedded)
            }
            scalar => Value::from_json_scalar(scalar).unwrap_or(Value::Null),
        })
    }

    /// Older records keep metadata fields directly on the root record. Move
    /// them into the embedded metadata object.
    fn fold_flattened_metadata(&self, root: &KindEntry, node: &mut Node) {
        let (Some(field), Some(meta_kind)) =
            (self.catalog.metadata_field(), self.catalog.metadata_kind())
        else {
            return;
        };

        let flattened: Vec<String> = meta_kind
            .fields
            .iter()
            .map(|f| f.name.clone())
            .filter(|name| root.field(name).is_none() && node.fields.contains_key(name))
            .collect();
        if flattened.is_empty() {
            return;
        }

        let mut moved = Vec::with_capacity(flattened.len());
        for name in flattened {
            if let Some(value) = node.fields.shift_remove(&name) {
                moved.push((name, value));
            }
        }

        let slot = node
            .fields
            .entry(field.to_string())
            .or_insert(Value::Null);
        if !matches!(slot, Value::Embedded(_)) {
            *slot = Value::Embedded(Embedded::new(&meta_kind.name));
        }
        if let Value::Embedded(meta) = slot {
            for (name, value) in moved {
                meta.fields.entry(name).or_insert(value);
            }
        }
    }
}

fn invalid(record: &Record, reason: String) -> TemplateDbError {
    TemplateDbError::InvalidRecord {
        kind: record.kind.clone(),
        key: record.key.clone(),
        reason,
    }
}

//! Graph importer: walks an archive depth first and persists every distinct
//! node once, children before parents.

use crate::backend::{Backend, RecordFields, StoredKey};
use crate::catalog::{Catalog, FieldCategory, FieldSpec, KindEntry};
use crate::config::{Config, KeyScheme, SyntheticIds};
use crate::error::{NodeLocation, Result, TemplateDbError};
use crate::node::{Archive, Embedded, Fields, Node, NodeId, Value, KIND_KEY, NAME_FIELD};
use crate::validation;
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;

pub const DATE_CREATED: &str = "DateCreated";
pub const DATE_MODIFIED: &str = "DateModified";

/// Importer settings, usually taken from `Config`
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub key_scheme: KeyScheme,
    pub synthetic_ids: SyntheticIds,
    pub apply_defaults: bool,
}

impl From<&Config> for ImportOptions {
    fn from(config: &Config) -> Self {
        ImportOptions {
            key_scheme: config.key_scheme,
            synthetic_ids: config.synthetic_ids,
            apply_defaults: config.apply_defaults,
        }
    }
}

/// Outcome of importing every root of an archive independently
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Session token of the import call
    pub session: String,
    pub imported: Vec<StoredKey>,
    pub failed: Vec<(NodeLocation, TemplateDbError)>,
}

impl ImportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Importer<'a, B: Backend + ?Sized> {
    catalog: &'a Catalog,
    backend: &'a B,
    options: ImportOptions,
}

/// Per-call traversal state. Nothing outlives one `import` call.
struct Session<'s> {
    archive: &'s Archive,
    extra_metadata: &'s Fields,
    token: String,
    seq: HashMap<NodeId, usize>,
    visited: HashMap<NodeId, StoredKey>,
    in_progress: Vec<NodeId>,
}

impl<'s> Session<'s> {
    fn new(archive: &'s Archive, extra_metadata: &'s Fields, token: String) -> Self {
        Session {
            archive,
            extra_metadata,
            token,
            seq: HashMap::new(),
            visited: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Local index of a node, assigned on first encounter.
    fn local_index(&mut self, id: NodeId) -> usize {
        let next = self.seq.len();
        *self.seq.entry(id).or_insert(next)
    }

    fn cycle_path(&self, id: NodeId) -> Vec<String> {
        self.in_progress
            .iter()
            .chain(std::iter::once(&id))
            .filter_map(|n| self.archive.node(*n))
            .map(|n| format!("{}/{}", n.kind, n.name))
            .collect()
    }
}

impl<'a, B: Backend + ?Sized> Importer<'a, B> {
    pub fn new(catalog: &'a Catalog, backend: &'a B, options: ImportOptions) -> Self {
        Importer {
            catalog,
            backend,
            options,
        }
    }

    /// Import every root of the archive. Stops at the first failure; records
    /// persisted before it stay in the store.
    pub fn import(&self, archive: &Archive, extra_metadata: &Fields) -> Result<Vec<StoredKey>> {
        let mut session = Session::new(archive, extra_metadata, self.options.synthetic_ids.generate());
        log::info!(
            "Importing {} root node(s), session {}",
            archive.roots().len(),
            session.token
        );

        let mut keys = Vec::with_capacity(archive.roots().len());
        for &root in archive.roots() {
            keys.push(self.import_node(&mut session, root)?);
        }
        Ok(keys)
    }

    /// Import every root independently, collecting failures instead of
    /// stopping. Nodes shared between roots are still written once.
    pub fn import_each(&self, archive: &Archive, extra_metadata: &Fields) -> ImportReport {
        let mut session = Session::new(archive, extra_metadata, self.options.synthetic_ids.generate());
        let mut report = ImportReport {
            session: session.token.clone(),
            ..Default::default()
        };

        for &root in archive.roots() {
            match self.import_node(&mut session, root) {
                Ok(key) => report.imported.push(key),
                Err(e) => {
                    let location = match archive.node(root) {
                        Some(node) => NodeLocation::new(&node.kind, &node.name),
                        None => NodeLocation::new("<missing>", &root.to_string()),
                    };
                    log::warn!("Failed to import {location}: {e}");
                    report.failed.push((location, e));
                }
            }
        }

        log::info!(
            "Import session {}: {} imported, {} failed",
            report.session,
            report.imported.len(),
            report.failed.len()
        );
        report
    }

    fn import_node(&self, session: &mut Session<'_>, id: NodeId) -> Result<StoredKey> {
        if let Some(key) = session.visited.get(&id) {
            return Ok(key.clone());
        }
        let archive = session.archive;
        let node = archive
            .node(id)
            .ok_or_else(|| TemplateDbError::Other(format!("Archive has no node {id}")))?;
        if session.in_progress.contains(&id) {
            return Err(TemplateDbError::CyclicReference {
                path: session.cycle_path(id),
            });
        }

        let seq = session.local_index(id);
        session.in_progress.push(id);
        let result = self.persist_node(session, node, seq);
        session.in_progress.pop();

        let key = result?;
        session.visited.insert(id, key.clone());
        Ok(key)
    }

    fn persist_node(&self, session: &mut Session<'_>, node: &Node, seq: usize) -> Result<StoredKey> {
        let location = NodeLocation::new(&node.kind, &node.name);
        let entry = self.catalog.kind_of(&location)?;
        if entry.is_abstract {
            return Err(not_instantiable(&location, "is abstract"));
        }
        if entry.embedded {
            return Err(not_instantiable(&location, "is embedded-only"));
        }

        let key = self.compute_key(entry, node, seq, &session.token, &location)?;
        let location = location.with_key(&key);

        let is_root = entry.name == self.catalog.root_kind();
        let mut fields = node.fields.clone();
        if is_root {
            self.merge_metadata(entry, &mut fields, session.extra_metadata);
        }

        let warnings = validation::validate_and_prepare(
            self.catalog,
            entry,
            &mut fields,
            session.archive,
            self.options.apply_defaults,
            &location,
        )?;
        for warning in warnings {
            log::warn!("{location}: {warning}");
        }

        let mut record = RecordFields::new();
        record.insert(NAME_FIELD.into(), serde_json::Value::String(node.name.clone()));
        for (name, value) in &fields {
            let spec = entry.field(name).map(|f| &f.spec);
            let stored = self.convert_value(session, &location, name, value, spec)?;
            record.insert(name.clone(), stored);
        }

        if is_root {
            self.stamp_modified(entry, &mut record);
        }

        self.backend.save_record(&entry.name, &key, &record)?;
        log::debug!("Saved {}/{}", entry.name, key);
        Ok(StoredKey::new(&entry.name, &key))
    }

    fn compute_key(
        &self,
        entry: &KindEntry,
        node: &Node,
        seq: usize,
        token: &str,
        location: &NodeLocation,
    ) -> Result<String> {
        match self.options.key_scheme {
            KeyScheme::Natural => {
                if node.name.trim().is_empty() {
                    return Err(TemplateDbError::MissingRequiredField {
                        node: location.clone(),
                        field: NAME_FIELD.into(),
                    });
                }
                Ok(format!("{}, {}", entry.name, node.name))
            }
            KeyScheme::Synthetic => Ok(format!("{token}-{seq}")),
        }
    }

    fn convert_value(
        &self,
        session: &mut Session<'_>,
        location: &NodeLocation,
        path: &str,
        value: &Value,
        spec: Option<&FieldSpec>,
    ) -> Result<serde_json::Value> {
        Ok(match value {
            Value::Ref(id) => match spec.map(FieldSpec::category) {
                Some(FieldCategory::Embedded(_)) => {
                    let archive = session.archive;
                    let node = archive.node(*id).ok_or_else(|| {
                        TemplateDbError::Other(format!("Archive has no node {id}"))
                    })?;
                    self.convert_embedded(session, location, path, &node.kind, &node.fields)?
                }
                _ => self.import_node(session, *id)?.to_marker(),
            },
            Value::Embedded(embedded) => {
                self.convert_embedded(session, location, path, &embedded.kind, &embedded.fields)?
            }
            Value::List(items) => {
                let item_spec = spec.and_then(|s| s.items.as_deref());
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{i}]");
                    out.push(self.convert_value(session, location, &item_path, item, item_spec)?);
                }
                serde_json::Value::Array(out)
            }
            scalar => scalar
                .scalar_to_json()
                .ok_or_else(|| TemplateDbError::Validation {
                    node: location.clone(),
                    field: path.to_string(),
                    rule: format!("{scalar:?} cannot be stored"),
                })?,
        })
    }

    fn convert_embedded(
        &self,
        session: &mut Session<'_>,
        location: &NodeLocation,
        path: &str,
        kind: &str,
        fields: &Fields,
    ) -> Result<serde_json::Value> {
        let entry = self.catalog.get(kind);
        let mut obj = serde_json::Map::new();
        obj.insert(KIND_KEY.into(), serde_json::Value::String(kind.to_string()));
        for (name, value) in fields {
            let spec = entry.and_then(|e| e.field(name)).map(|f| &f.spec);
            let field_path = format!("{path}.{name}");
            obj.insert(
                name.clone(),
                self.convert_value(session, location, &field_path, value, spec)?,
            );
        }
        Ok(serde_json::Value::Object(obj))
    }

    /// Fold caller-supplied metadata into the root node. Extra values win.
    /// `DateCreated` is filled in when the catalog declares it and it is absent.
    fn merge_metadata(&self, root: &KindEntry, fields: &mut Fields, extra: &Fields) {
        let now = Value::String(now_rfc3339());

        match (self.catalog.metadata_field(), self.catalog.metadata_kind()) {
            (Some(field), Some(meta_kind)) => {
                let slot = fields.entry(field.to_string()).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = Value::Embedded(Embedded::new(&meta_kind.name));
                }
                // Any other shape is left for validation to reject.
                if let Value::Embedded(meta) = slot {
                    for (k, v) in extra {
                        meta.fields.insert(k.clone(), v.clone());
                    }
                    if meta_kind.field(DATE_CREATED).is_some() {
                        let created = meta.fields.entry(DATE_CREATED.into()).or_insert(Value::Null);
                        if created.is_null() {
                            *created = now;
                        }
                    }
                }
            }
            _ => {
                for (k, v) in extra {
                    fields.insert(k.clone(), v.clone());
                }
                if root.field(DATE_CREATED).is_some() {
                    let created = fields.entry(DATE_CREATED.into()).or_insert(Value::Null);
                    if created.is_null() {
                        *created = now;
                    }
                }
            }
        }
    }

    fn stamp_modified(&self, root: &KindEntry, record: &mut RecordFields) {
        let now = serde_json::Value::String(now_rfc3339());
        match (self.catalog.metadata_field(), self.catalog.metadata_kind()) {
            (Some(field), Some(meta_kind)) => {
                if meta_kind.field(DATE_MODIFIED).is_none() {
                    return;
                }
                if let Some(serde_json::Value::Object(meta)) = record.get_mut(field) {
                    meta.insert(DATE_MODIFIED.into(), now);
                }
            }
            _ => {
                if root.field(DATE_MODIFIED).is_some() {
                    record.insert(DATE_MODIFIED.into(), now);
                }
            }
        }
    }
}

fn not_instantiable(location: &NodeLocation, why: &str) -> TemplateDbError {
    TemplateDbError::Validation {
        node: location.clone(),
        field: KIND_KEY.into(),
        rule: format!("kind {} {why} and cannot be stored as a node", location.kind),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

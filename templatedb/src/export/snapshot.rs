use crate::backend::StoredKey;
use crate::catalog::{Catalog, FieldCategory, FieldSpec, KindEntry};
use crate::error::{Result, TemplateDbError};
use crate::node::{Archive, Fields, NodeId, Value, NAME_FIELD};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Field carrying a record's content-addressed id in the serialized export
pub const ID_FIELD: &str = "$id";

/// Suffix of fields that point at other records in the serialized export
const REF_SUFFIX: &str = "_id";

/// Every stored record of one kind
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotGroup {
    pub kind: String,
    pub collection: String,
    /// Members ordered by stored key
    pub members: Vec<NodeId>,
}

/// The whole store rebuilt into one arena.
#[derive(Debug, Clone)]
pub struct Snapshot {
    archive: Archive,
    groups: Vec<SnapshotGroup>,
    keys: HashMap<NodeId, StoredKey>,
}

/// Short content-addressed id of a stored record: the first 12 bytes of
/// SHA-256 over `"<kind>/<key>"`, hex encoded.
pub fn record_id(key: &StoredKey) -> String {
    let digest = Sha256::digest(key.to_string().as_bytes());
    hex::encode(&digest[..12])
}

impl Snapshot {
    pub(crate) fn new(
        archive: Archive,
        groups: Vec<SnapshotGroup>,
        keys: HashMap<NodeId, StoredKey>,
    ) -> Self {
        Snapshot {
            archive,
            groups,
            keys,
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn groups(&self) -> &[SnapshotGroup] {
        &self.groups
    }

    pub fn group(&self, kind: &str) -> Option<&SnapshotGroup> {
        self.groups.iter().find(|g| g.kind == kind)
    }

    /// Stored key a node was rebuilt from
    pub fn key_of(&self, id: NodeId) -> Option<&StoredKey> {
        self.keys.get(&id)
    }

    /// Render the serialized export: collection name → flattened records.
    /// Fields the catalog declares as references become `<field>_id`
    /// entries holding the target's `$id`.
    pub fn to_document(&self, catalog: &Catalog) -> Result<serde_json::Value> {
        let mut doc = serde_json::Map::new();
        for group in &self.groups {
            let mut records = Vec::with_capacity(group.members.len());
            for &id in &group.members {
                records.push(self.render_node(catalog, id)?);
            }
            doc.insert(group.collection.clone(), serde_json::Value::Array(records));
        }
        Ok(serde_json::Value::Object(doc))
    }

    fn render_node(&self, catalog: &Catalog, id: NodeId) -> Result<serde_json::Value> {
        let node = self
            .archive
            .node(id)
            .ok_or_else(|| TemplateDbError::Other(format!("Snapshot has no node {id}")))?;

        let mut obj = serde_json::Map::new();
        obj.insert(ID_FIELD.into(), serde_json::Value::String(self.id_of(id)?));
        obj.insert(NAME_FIELD.into(), serde_json::Value::String(node.name.clone()));
        self.render_fields(catalog, catalog.get(&node.kind), &node.fields, &mut obj)?;
        Ok(serde_json::Value::Object(obj))
    }

    fn render_fields(
        &self,
        catalog: &Catalog,
        entry: Option<&KindEntry>,
        fields: &Fields,
        obj: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        for (field, value) in fields {
            let spec = entry.and_then(|e| e.field(field)).map(|f| &f.spec);
            let name = if holds_references(spec, value) {
                format!("{field}{REF_SUFFIX}")
            } else {
                field.clone()
            };
            obj.insert(name, self.render_value(catalog, spec, value)?);
        }
        Ok(())
    }

    fn render_value(
        &self,
        catalog: &Catalog,
        spec: Option<&FieldSpec>,
        value: &Value,
    ) -> Result<serde_json::Value> {
        Ok(match value {
            Value::Ref(id) => serde_json::Value::String(self.id_of(*id)?),
            Value::Embedded(embedded) => {
                let mut obj = serde_json::Map::new();
                self.render_fields(catalog, catalog.get(&embedded.kind), &embedded.fields, &mut obj)?;
                serde_json::Value::Object(obj)
            }
            Value::List(items) => {
                let item_spec = spec.and_then(|s| s.items.as_deref());
                serde_json::Value::Array(
                    items
                        .iter()
                        .map(|item| self.render_value(catalog, item_spec, item))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            scalar => scalar.scalar_to_json().unwrap_or(serde_json::Value::Null),
        })
    }

    fn id_of(&self, id: NodeId) -> Result<String> {
        self.keys
            .get(&id)
            .map(record_id)
            .ok_or_else(|| TemplateDbError::Other(format!("Snapshot node {id} has no stored key")))
    }
}

/// Whether a field renders as `<field>_id`. Declared fields follow the
/// catalog; undeclared ones are judged by the references they hold.
fn holds_references(spec: Option<&FieldSpec>, value: &Value) -> bool {
    match spec.map(FieldSpec::category) {
        Some(FieldCategory::Reference(_)) => true,
        Some(FieldCategory::Sequence(items)) => {
            matches!(items.category(), FieldCategory::Reference(_))
        }
        Some(_) => false,
        None => match value {
            Value::Ref(_) => true,
            Value::List(items) => {
                !items.is_empty() && items.iter().all(|v| matches!(v, Value::Ref(_)))
            }
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend, RecordFields};
    use crate::export::Exporter;
    use crate::import::{ImportOptions, Importer};
    use crate::testing::building_template;

    fn fields(json: serde_json::Value) -> RecordFields {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn test_record_id_is_stable_and_short() {
        let key = StoredKey::new("OpaqueMaterial", "OpaqueMaterial, Concrete");
        let id = record_id(&key);
        assert_eq!(id.len(), 24);
        assert_eq!(id, record_id(&key.clone()));
        assert_ne!(id, record_id(&StoredKey::new("GlazingMaterial", "OpaqueMaterial, Concrete")));
    }

    #[test]
    fn test_document_renders_references_as_ids() {
        let catalog = Catalog::builtin().unwrap();
        let backend = MemoryBackend::new();
        let day = StoredKey::new("DaySchedule", "d");
        let brick = StoredKey::new("OpaqueMaterial", "b");
        backend
            .save_record(
                "DaySchedule",
                "d",
                &fields(serde_json::json!({ "Name": "Day", "Values": vec![0.5; 24] })),
            )
            .unwrap();
        backend
            .save_record(
                "WeekSchedule",
                "w",
                &fields(serde_json::json!({ "Name": "Week", "Days": vec![day.to_marker(); 7] })),
            )
            .unwrap();
        backend
            .save_record("OpaqueMaterial", "b", &fields(serde_json::json!({ "Name": "Brick" })))
            .unwrap();
        backend
            .save_record(
                "OpaqueConstruction",
                "c",
                &fields(serde_json::json!({
                    "Name": "Wall",
                    "Layers": [{ "$kind": "MaterialLayer", "Material": brick.to_marker(), "Thickness": 0.2 }]
                })),
            )
            .unwrap();

        let snapshot = Exporter::new(&catalog, &backend).export_all().unwrap();
        let doc = snapshot.to_document(&catalog).unwrap();

        let day_id = record_id(&day);
        let week = &doc["WeekSchedules"][0];
        assert_eq!(week["$id"], record_id(&StoredKey::new("WeekSchedule", "w")));
        assert_eq!(week["Name"], "Week");
        assert_eq!(week["Days_id"], serde_json::json!(vec![day_id.clone(); 7]));
        assert!(week.get("Days").is_none());
        assert!(week.get("$kind").is_none());

        assert_eq!(doc["DaySchedules"][0]["$id"], day_id);
        assert_eq!(doc["DaySchedules"][0]["Values"][3], 0.5);

        let layer = &doc["OpaqueConstructions"][0]["Layers"][0];
        assert_eq!(layer["Material_id"], record_id(&brick));
        assert_eq!(layer["Thickness"], 0.2);
        assert!(layer.get("$kind").is_none());
    }

    #[test]
    fn test_reference_fields_named_by_catalog_not_contents() {
        let catalog = Catalog::builtin().unwrap();
        let backend = MemoryBackend::new();
        backend
            .save_record(
                "WeekSchedule",
                "w",
                &fields(serde_json::json!({ "Name": "Empty", "Days": [] })),
            )
            .unwrap();
        backend
            .save_record(
                "OpaqueConstruction",
                "c",
                &fields(serde_json::json!({
                    "Name": "Bare",
                    "Layers": [{ "$kind": "MaterialLayer", "Material": null, "Thickness": 0.1 }]
                })),
            )
            .unwrap();

        let doc = Exporter::new(&catalog, &backend)
            .export_all()
            .unwrap()
            .to_document(&catalog)
            .unwrap();

        let week = &doc["WeekSchedules"][0];
        assert_eq!(week["Days_id"], serde_json::json!([]));
        assert!(week.get("Days").is_none());
        let layer = &doc["OpaqueConstructions"][0]["Layers"][0];
        assert!(layer["Material_id"].is_null());
        assert!(layer.get("Material").is_none());
    }

    #[test]
    fn test_document_covers_every_collection_once() {
        let catalog = Catalog::builtin().unwrap();
        let backend = MemoryBackend::new();
        Importer::new(&catalog, &backend, ImportOptions::default())
            .import(&building_template("Office").archive, &crate::node::Fields::new())
            .unwrap();

        let snapshot = Exporter::new(&catalog, &backend).export_all().unwrap();
        let doc = snapshot.to_document(&catalog).unwrap();

        assert_eq!(doc["OpaqueMaterials"].as_array().unwrap().len(), 2);
        assert_eq!(doc["Zones"].as_array().unwrap().len(), 2);
        let template = &doc["BuildingTemplates"][0];
        assert_eq!(template["Name"], "Office");
        assert_eq!(template["MetaData"]["Author"], "tester");
        assert_eq!(
            template["Core_id"],
            record_id(&StoredKey::new("ZoneDefinition", "ZoneDefinition, Core"))
        );
        let key = snapshot
            .key_of(snapshot.group("BuildingTemplate").unwrap().members[0])
            .unwrap();
        assert_eq!(key.key, "BuildingTemplate, Office");
    }
}

//! Entity catalog: the registry of node kinds and their declared fields.
//!
//! A catalog is parsed from YAML, checked once, and is read-only afterwards.
//! Inherited fields are resolved at build time so lookups are plain map hits.

mod parser;
mod types;

pub use parser::parse_catalog_str;
pub use types::{
    CatalogDefinition, FieldCategory, FieldDefinition, FieldSpec, FieldType, KindDefinition,
};

use crate::error::{NodeLocation, Result, TemplateDbError};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// The catalog shipped with the crate, covering the UMI template kinds.
pub const BUILTIN_CATALOG: &str = include_str!("umi.yaml");

/// A kind with its inheritance chain resolved
#[derive(Debug, Clone)]
pub struct KindEntry {
    pub name: String,
    pub collection: String,
    pub is_abstract: bool,
    pub embedded: bool,
    pub additional_properties: bool,
    /// Ancestors from the direct parent upward
    pub ancestors: Vec<String>,
    /// All fields, inherited first, in declaration order
    pub fields: Vec<FieldDefinition>,
}

impl KindEntry {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether records of this kind are persisted on their own
    pub fn is_stored(&self) -> bool {
        !self.is_abstract && !self.embedded
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    root: String,
    metadata_field: Option<String>,
    kinds: BTreeMap<String, KindEntry>,
    hash: String,
}

impl Catalog {
    /// Build the built-in UMI catalog
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition = parse_catalog_str(content)?;
        let mut catalog = Self::from_definition(definition)?;
        catalog.hash = hash_catalog(content);
        Ok(catalog)
    }

    pub fn from_definition(definition: CatalogDefinition) -> Result<Self> {
        let mut kinds = BTreeMap::new();
        for name in definition.kinds.keys() {
            let entry = resolve_kind(&definition, name)?;
            kinds.insert(name.clone(), entry);
        }

        let hash = hash_catalog(&serde_yaml::to_string(&definition)?);
        let catalog = Catalog {
            root: definition.root,
            metadata_field: definition.metadata_field,
            kinds,
            hash,
        };
        catalog.check()?;
        Ok(catalog)
    }

    /// Check cross-kind consistency: targets exist and have the right shape.
    fn check(&self) -> Result<()> {
        let root = self.kinds.get(&self.root).ok_or_else(|| {
            TemplateDbError::Catalog(format!("Root kind '{}' is not declared", self.root))
        })?;
        if !root.is_stored() {
            return Err(TemplateDbError::Catalog(format!(
                "Root kind '{}' must be a concrete stored kind",
                self.root
            )));
        }

        if let Some(meta) = &self.metadata_field {
            match root.field(meta).map(|f| f.spec.field_type) {
                Some(FieldType::Embedded) => {}
                _ => {
                    return Err(TemplateDbError::Catalog(format!(
                        "Metadata field '{meta}' must be an embedded field of '{}'",
                        self.root
                    )))
                }
            }
        }

        for entry in self.kinds.values() {
            for field in &entry.fields {
                self.check_spec(&entry.name, &field.name, &field.spec)?;
            }
        }
        Ok(())
    }

    fn target_entry(&self, kind: &str, field: &str, target: Option<&str>) -> Result<&KindEntry> {
        let target = target.ok_or_else(|| {
            TemplateDbError::Catalog(format!("Field '{kind}.{field}' needs a target"))
        })?;
        self.kinds.get(target).ok_or_else(|| {
            TemplateDbError::Catalog(format!(
                "Field '{kind}.{field}' targets unknown kind '{target}'"
            ))
        })
    }

    fn check_spec(&self, kind: &str, field: &str, spec: &FieldSpec) -> Result<()> {
        match spec.field_type {
            FieldType::Ref => {
                let target = self.target_entry(kind, field, spec.target.as_deref())?;
                if target.embedded {
                    return Err(TemplateDbError::Catalog(format!(
                        "Field '{kind}.{field}' references embedded kind '{}'",
                        target.name
                    )));
                }
            }
            FieldType::Embedded => {
                let target = self.target_entry(kind, field, spec.target.as_deref())?;
                if !target.embedded {
                    return Err(TemplateDbError::Catalog(format!(
                        "Field '{kind}.{field}' embeds stored kind '{}'",
                        target.name
                    )));
                }
            }
            FieldType::List => match &spec.items {
                Some(items) => self.check_spec(kind, field, items)?,
                None => {
                    return Err(TemplateDbError::Catalog(format!(
                        "List field '{kind}.{field}' needs an items type"
                    )))
                }
            },
            _ => {}
        }
        Ok(())
    }

    /// Look up a kind by exact name
    pub fn get(&self, kind: &str) -> Option<&KindEntry> {
        self.kinds.get(kind)
    }

    /// Look up the kind of a node, failing with `UnknownKind`
    pub fn kind_of(&self, node: &NodeLocation) -> Result<&KindEntry> {
        self.kinds
            .get(&node.kind)
            .ok_or_else(|| TemplateDbError::UnknownKind { node: node.clone() })
    }

    /// Ordered field list of a kind, inherited fields first
    pub fn fields(&self, kind: &str) -> Result<&[FieldDefinition]> {
        self.kind_of(&NodeLocation::new(kind, ""))
            .map(|entry| entry.fields.as_slice())
    }

    /// Whether `kind` is `ancestor` or inherits from it
    pub fn is_a(&self, kind: &str, ancestor: &str) -> bool {
        kind == ancestor
            || self
                .kinds
                .get(kind)
                .map(|e| e.ancestors.iter().any(|a| a == ancestor))
                .unwrap_or(false)
    }

    pub fn root_kind(&self) -> &str {
        &self.root
    }

    pub fn metadata_field(&self) -> Option<&str> {
        self.metadata_field.as_deref()
    }

    /// Kind of the root's embedded metadata object, if declared
    pub fn metadata_kind(&self) -> Option<&KindEntry> {
        let field = self.kinds.get(&self.root)?.field(self.metadata_field.as_deref()?)?;
        self.kinds.get(field.spec.target.as_deref()?)
    }

    /// Kinds persisted as their own records, in name order
    pub fn stored_kinds(&self) -> impl Iterator<Item = &KindEntry> {
        self.kinds.values().filter(|k| k.is_stored())
    }

    pub fn kinds(&self) -> impl Iterator<Item = &KindEntry> {
        self.kinds.values()
    }

    /// Content hash identifying this catalog revision
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

fn resolve_kind(definition: &CatalogDefinition, name: &str) -> Result<KindEntry> {
    let mut chain = vec![name.to_string()];
    let mut seen = HashSet::new();
    seen.insert(name.to_string());

    let mut current = &definition.kinds[name];
    while let Some(parent) = &current.extends {
        if !seen.insert(parent.clone()) {
            return Err(TemplateDbError::Catalog(format!(
                "Inheritance cycle through kind '{parent}'"
            )));
        }
        current = definition.kinds.get(parent).ok_or_else(|| {
            TemplateDbError::Catalog(format!("Kind '{name}' extends unknown kind '{parent}'"))
        })?;
        chain.push(parent.clone());
    }

    // Oldest ancestor first so its fields lead; redeclared fields replace in place.
    let mut fields: Vec<FieldDefinition> = Vec::new();
    for kind_name in chain.iter().rev() {
        for field in &definition.kinds[kind_name].fields {
            match fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => *existing = field.clone(),
                None => fields.push(field.clone()),
            }
        }
    }

    let own = &definition.kinds[name];
    if fields.iter().any(|f| f.name == crate::node::NAME_FIELD) {
        return Err(TemplateDbError::Catalog(format!(
            "Kind '{name}' declares reserved field '{}'",
            crate::node::NAME_FIELD
        )));
    }

    Ok(KindEntry {
        name: name.to_string(),
        collection: own.collection.clone().unwrap_or_else(|| format!("{name}s")),
        is_abstract: own.is_abstract,
        embedded: own.embedded,
        additional_properties: own.additional_properties,
        ancestors: chain[1..].to_vec(),
        fields,
    })
}

/// Compute a hash of the catalog YAML content.
pub fn hash_catalog(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..8])
}

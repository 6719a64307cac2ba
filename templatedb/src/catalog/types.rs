use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level catalog definition parsed from a catalog YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDefinition {
    /// The top-level kind of an archive (the template)
    pub root: String,
    /// Embedded field on the root kind that holds descriptive metadata
    #[serde(default)]
    pub metadata_field: Option<String>,
    #[serde(default)]
    pub kinds: BTreeMap<String, KindDefinition>,
}

/// Definition of a single node kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KindDefinition {
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    /// Embedded-only kinds live inline in their parent and are never stored on their own
    #[serde(default)]
    pub embedded: bool,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub additional_properties: bool,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// A named field of a kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub spec: FieldSpec,
}

/// Type and constraints of a field or of a list's items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Target kind for `ref` and `embedded` fields
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub items: Option<Box<FieldSpec>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(rename = "enum", default)]
    pub choices: Option<Vec<serde_json::Value>>,
    /// Fixed number of list elements
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Values below this only produce a warning
    #[serde(default)]
    pub recommended_min: Option<f64>,
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Datetime,
    Ref,
    Embedded,
    List,
}

/// How the graph walk treats a field
#[derive(Debug, Clone, Copy)]
pub enum FieldCategory<'a> {
    Scalar(FieldType),
    Embedded(&'a str),
    Reference(&'a str),
    Sequence(&'a FieldSpec),
}

impl FieldSpec {
    /// Category of this field. Targets and items are checked when the
    /// catalog is built, so a missing one only shows up on unchecked specs.
    pub fn category(&self) -> FieldCategory<'_> {
        match self.field_type {
            FieldType::Ref => FieldCategory::Reference(self.target.as_deref().unwrap_or_default()),
            FieldType::Embedded => {
                FieldCategory::Embedded(self.target.as_deref().unwrap_or_default())
            }
            FieldType::List => match &self.items {
                Some(items) => FieldCategory::Sequence(items),
                None => FieldCategory::Scalar(FieldType::List),
            },
            other => FieldCategory::Scalar(other),
        }
    }
}

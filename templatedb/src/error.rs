use std::fmt;
use thiserror::Error;

/// Identifies the node an import or export error belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLocation {
    pub kind: String,
    pub name: String,
    pub key: Option<String>,
}

impl NodeLocation {
    pub fn new(kind: &str, name: &str) -> Self {
        NodeLocation {
            kind: kind.to_string(),
            name: name.to_string(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }
}

impl fmt::Display for NodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)?;
        if let Some(key) = &self.key {
            write!(f, " (key: {key})")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum TemplateDbError {
    #[error("Unknown kind '{}' for node {node}", node.kind)]
    UnknownKind { node: NodeLocation },

    #[error("Validation error on {node}, field '{field}': {rule}")]
    Validation {
        node: NodeLocation,
        field: String,
        rule: String,
    },

    #[error("Missing required field '{field}' on {node}")]
    MissingRequiredField { node: NodeLocation, field: String },

    #[error("Record not found: {kind}/{key}")]
    NotFound { kind: String, key: String },

    #[error("Cyclic reference: {}", path.join(" -> "))]
    CyclicReference { path: Vec<String> },

    #[error("Invalid stored record {kind}/{key}: {reason}")]
    InvalidRecord {
        kind: String,
        key: String,
        reason: String,
    },

    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl TemplateDbError {
    /// The node this error is attached to, when it is node-scoped.
    pub fn node(&self) -> Option<&NodeLocation> {
        match self {
            TemplateDbError::UnknownKind { node }
            | TemplateDbError::Validation { node, .. }
            | TemplateDbError::MissingRequiredField { node, .. } => Some(node),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TemplateDbError>;

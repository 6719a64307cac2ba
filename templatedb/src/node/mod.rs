// In-memory archive model: an arena of nodes addressed by `NodeId`.
//
// References between nodes are `Value::Ref(NodeId)`, so a node shared by
// several parents is one arena slot. Embedded values are owned inline.

use crate::error::{Result, TemplateDbError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record field that carries a node's name.
pub const NAME_FIELD: &str = "Name";

/// Discriminator key written on nested objects in stored and rendered output.
pub const KIND_KEY: &str = "$kind";

pub type Fields = IndexMap<String, Value>;

/// Handle of a node inside an `Archive`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Pointer to an independently identified node
    Ref(NodeId),
    /// Inline value object owned by its parent
    Embedded(Embedded),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Ref(_) => "reference",
            Value::Embedded(_) => "embedded object",
            Value::List(_) => "list",
        }
    }

    /// JSON form of a scalar; `None` for references, embedded values, lists
    /// and floats JSON cannot hold (NaN, infinities).
    pub fn scalar_to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::Number(serde_json::Number::from_f64(*f)?),
            Value::String(s) => serde_json::Value::String(s.clone()),
            _ => return None,
        })
    }

    /// Scalar value from JSON; `None` for arrays and objects.
    pub fn from_json_scalar(json: &serde_json::Value) -> Option<Value> {
        Some(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) if !n.is_f64() => Value::Integer(i),
                _ => Value::Float(n.as_f64()?),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            _ => return None,
        })
    }

    /// Convert plain JSON (no references) into a value, keeping nested
    /// objects as embedded values of the given kind.
    pub fn from_plain_json(json: &serde_json::Value, object_kind: &str) -> Value {
        match json {
            serde_json::Value::Array(items) => Value::List(
                items
                    .iter()
                    .map(|item| Value::from_plain_json(item, object_kind))
                    .collect(),
            ),
            serde_json::Value::Object(map) => {
                let kind = map
                    .get(KIND_KEY)
                    .and_then(|k| k.as_str())
                    .unwrap_or(object_kind);
                let mut embedded = Embedded::new(kind);
                for (k, v) in map {
                    if k != KIND_KEY {
                        embedded
                            .fields
                            .insert(k.clone(), Value::from_plain_json(v, object_kind));
                    }
                }
                Value::Embedded(embedded)
            }
            scalar => Value::from_json_scalar(scalar).unwrap_or(Value::Null),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Value::Ref(v)
    }
}

impl From<Embedded> for Value {
    fn from(v: Embedded) -> Self {
        Value::Embedded(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// An inline value object with no identity of its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedded {
    pub kind: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Embedded {
    pub fn new(kind: &str) -> Self {
        Embedded {
            kind: kind.to_string(),
            fields: Fields::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }
}

/// One domain object instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Node {
    pub fn new(kind: &str, name: &str) -> Self {
        Node {
            kind: kind.to_string(),
            name: name.to_string(),
            fields: Fields::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// A parsed archive: the node arena plus the ids of its top-level nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    nodes: Vec<Node>,
    #[serde(default)]
    roots: Vec<NodeId>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the arena without making it a root
    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Add a node and register it as a top-level node
    pub fn add_root(&mut self, node: Node) -> NodeId {
        let id = self.add(node);
        self.roots.push(id);
        id
    }

    pub fn mark_root(&mut self, id: NodeId) {
        self.roots.push(id);
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Render a node in the archive's nested shape: references expanded in
    /// place, every object tagged with its kind.
    pub fn to_nested(&self, id: NodeId) -> Result<serde_json::Value> {
        let mut path = Vec::new();
        self.nested_node(id, &mut path)
    }

    fn nested_node(&self, id: NodeId, path: &mut Vec<NodeId>) -> Result<serde_json::Value> {
        let node = self.node(id).ok_or_else(|| {
            TemplateDbError::Other(format!("Archive has no node {id}"))
        })?;
        if path.contains(&id) {
            let mut names: Vec<String> = path
                .iter()
                .filter_map(|p| self.node(*p))
                .map(|n| format!("{}/{}", n.kind, n.name))
                .collect();
            names.push(format!("{}/{}", node.kind, node.name));
            return Err(TemplateDbError::CyclicReference { path: names });
        }

        path.push(id);
        let mut obj = serde_json::Map::new();
        obj.insert(KIND_KEY.into(), serde_json::Value::String(node.kind.clone()));
        obj.insert(NAME_FIELD.into(), serde_json::Value::String(node.name.clone()));
        for (field, value) in &node.fields {
            obj.insert(field.clone(), self.nested_value(value, path)?);
        }
        path.pop();

        Ok(serde_json::Value::Object(obj))
    }

    fn nested_value(&self, value: &Value, path: &mut Vec<NodeId>) -> Result<serde_json::Value> {
        Ok(match value {
            Value::Ref(id) => self.nested_node(*id, path)?,
            Value::Embedded(embedded) => {
                let mut obj = serde_json::Map::new();
                obj.insert(KIND_KEY.into(), serde_json::Value::String(embedded.kind.clone()));
                for (field, v) in &embedded.fields {
                    obj.insert(field.clone(), self.nested_value(v, path)?);
                }
                serde_json::Value::Object(obj)
            }
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.nested_value(item, path))
                    .collect::<Result<Vec<_>>>()?,
            ),
            scalar => scalar.scalar_to_json().unwrap_or(serde_json::Value::Null),
        })
    }
}

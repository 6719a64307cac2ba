use crate::catalog::{Catalog, FieldSpec, FieldType, KindEntry};
use crate::error::{NodeLocation, Result, TemplateDbError};
use crate::node::{Archive, Fields, Value, NAME_FIELD};

/// A single failed check
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Field path, e.g. `Layers[1].Thickness`
    pub field: String,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    Missing,
    Rule(String),
}

/// Result of validating a node's fields
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<Violation>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    fn rule(&mut self, field: &str, message: String) {
        self.errors.push(Violation {
            field: field.to_string(),
            kind: ViolationKind::Rule(message),
        });
    }

    /// Turn the first violation into an error for the given node.
    pub fn into_error(self, node: &NodeLocation) -> Option<TemplateDbError> {
        let extra = self.errors.len().saturating_sub(1);
        let first = self.errors.into_iter().next()?;
        Some(match first.kind {
            ViolationKind::Missing => TemplateDbError::MissingRequiredField {
                node: node.clone(),
                field: first.field,
            },
            ViolationKind::Rule(mut rule) => {
                if extra > 0 {
                    rule.push_str(&format!(" (and {extra} more)"));
                }
                TemplateDbError::Validation {
                    node: node.clone(),
                    field: first.field,
                    rule,
                }
            }
        })
    }
}

/// Validate the fields of a node (or embedded value) of kind `entry`.
/// References are resolved in `archive` to check their target kind.
pub fn validate_fields(
    catalog: &Catalog,
    entry: &KindEntry,
    fields: &Fields,
    archive: &Archive,
) -> ValidationResult {
    let mut result = ValidationResult::default();
    let mut checker = Checker {
        catalog,
        archive,
        result: &mut result,
        depth: 0,
    };
    checker.check_fields("", entry, fields);
    result
}

/// Apply catalog defaults to absent or null fields. Existing values are kept.
pub fn apply_defaults(entry: &KindEntry, fields: &mut Fields) {
    for field in &entry.fields {
        let has_value = fields.get(&field.name).map(|v| !v.is_null()).unwrap_or(false);
        if has_value {
            continue;
        }
        if let Some(default) = &field.spec.default {
            let target = field.spec.target.as_deref().unwrap_or("Object");
            fields.insert(field.name.clone(), Value::from_plain_json(default, target));
        }
    }
}

/// Optionally apply defaults, then validate. Fails on the first violation
/// and returns the warnings otherwise.
pub fn validate_and_prepare(
    catalog: &Catalog,
    entry: &KindEntry,
    fields: &mut Fields,
    archive: &Archive,
    with_defaults: bool,
    node: &NodeLocation,
) -> Result<Vec<String>> {
    if with_defaults {
        apply_defaults(entry, fields);
    }
    let result = validate_fields(catalog, entry, fields, archive);
    let warnings = result.warnings.clone();
    match result.into_error(node) {
        Some(err) => Err(err),
        None => Ok(warnings),
    }
}

// Embedded values that are really archive nodes could loop; stop well
// before the stack does.
const MAX_DEPTH: usize = 64;

struct Checker<'a> {
    catalog: &'a Catalog,
    archive: &'a Archive,
    result: &'a mut ValidationResult,
    depth: usize,
}

impl Checker<'_> {
    fn check_fields(&mut self, prefix: &str, entry: &KindEntry, fields: &Fields) {
        if self.depth > MAX_DEPTH {
            self.result
                .rule(prefix, "embedded values nested too deeply".into());
            return;
        }
        self.depth += 1;

        for field in &entry.fields {
            let path = join(prefix, &field.name);
            match fields.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.spec.required {
                        self.result.errors.push(Violation {
                            field: path,
                            kind: ViolationKind::Missing,
                        });
                    }
                }
                Some(value) => self.check_value(&path, &field.spec, value),
            }
        }

        for name in fields.keys() {
            if name == NAME_FIELD {
                self.result.rule(
                    &join(prefix, name),
                    format!("'{NAME_FIELD}' is reserved for the node name"),
                );
            } else if !entry.additional_properties && entry.field(name).is_none() {
                self.result.rule(
                    &join(prefix, name),
                    format!("unexpected field on {} (additional_properties is false)", entry.name),
                );
            }
        }

        self.depth -= 1;
    }

    fn check_value(&mut self, path: &str, spec: &FieldSpec, value: &Value) {
        match spec.field_type {
            FieldType::String => match value {
                Value::String(_) => self.check_choices(path, spec, value),
                other => self.mismatch(path, "string", other),
            },
            FieldType::Number => match value.as_f64() {
                Some(n) if !n.is_finite() => {
                    self.result.rule(path, format!("expected a finite number, got {n}"))
                }
                Some(n) => {
                    self.check_range(path, spec, n);
                    self.check_choices(path, spec, value);
                }
                None => self.mismatch(path, "number", value),
            },
            FieldType::Integer => match value {
                Value::Integer(i) => {
                    self.check_range(path, spec, *i as f64);
                    self.check_choices(path, spec, value);
                }
                other => self.mismatch(path, "integer", other),
            },
            FieldType::Boolean => {
                if !matches!(value, Value::Bool(_)) {
                    self.mismatch(path, "boolean", value);
                }
            }
            FieldType::Datetime => match value {
                Value::String(s) => {
                    if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                        self.result
                            .rule(path, format!("invalid RFC 3339 datetime '{s}'"));
                    }
                }
                other => self.mismatch(path, "datetime string", other),
            },
            FieldType::Ref => self.check_reference(path, spec, value),
            FieldType::Embedded => self.check_embedded(path, spec, value),
            FieldType::List => self.check_list(path, spec, value),
        }
    }

    fn check_reference(&mut self, path: &str, spec: &FieldSpec, value: &Value) {
        let target = spec.target.as_deref().unwrap_or_default();
        let id = match value {
            Value::Ref(id) => *id,
            other => return self.mismatch(path, &format!("reference to {target}"), other),
        };
        match self.archive.node(id) {
            None => self
                .result
                .rule(path, format!("reference to missing archive node {id}")),
            Some(node) if !self.catalog.is_a(&node.kind, target) => self.result.rule(
                path,
                format!("expected reference to {target}, got {} '{}'", node.kind, node.name),
            ),
            Some(_) => {}
        }
    }

    fn check_embedded(&mut self, path: &str, spec: &FieldSpec, value: &Value) {
        let target = spec.target.as_deref().unwrap_or_default();
        // A referenced node in an embedded slot is copied inline.
        let (kind, fields) = match value {
            Value::Embedded(e) => (e.kind.as_str(), &e.fields),
            Value::Ref(id) => match self.archive.node(*id) {
                Some(node) => (node.kind.as_str(), &node.fields),
                None => {
                    return self
                        .result
                        .rule(path, format!("reference to missing archive node {id}"))
                }
            },
            other => return self.mismatch(path, &format!("embedded {target}"), other),
        };

        if !self.catalog.is_a(kind, target) {
            return self
                .result
                .rule(path, format!("expected embedded {target}, got {kind}"));
        }
        match self.catalog.get(kind) {
            Some(entry) => self.check_fields(path, entry, fields),
            None => self.result.rule(path, format!("unknown embedded kind '{kind}'")),
        }
    }

    fn check_list(&mut self, path: &str, spec: &FieldSpec, value: &Value) {
        let items = match value {
            Value::List(items) => items,
            other => return self.mismatch(path, "list", other),
        };

        if let Some(length) = spec.length {
            if items.len() != length {
                self.result.rule(
                    path,
                    format!("expected exactly {length} elements, got {}", items.len()),
                );
            }
        }
        if let Some(max) = spec.max_length {
            if items.len() > max {
                self.result.rule(
                    path,
                    format!("expected at most {max} elements, got {}", items.len()),
                );
            }
        }

        if let Some(item_spec) = &spec.items {
            for (i, item) in items.iter().enumerate() {
                self.check_value(&format!("{path}[{i}]"), item_spec, item);
            }
        }
    }

    fn check_range(&mut self, path: &str, spec: &FieldSpec, n: f64) {
        if let Some(min) = spec.min {
            if n < min {
                self.result
                    .rule(path, format!("value {n} is below minimum {min}"));
            }
        }
        if let Some(max) = spec.max {
            if n > max {
                self.result
                    .rule(path, format!("value {n} is above maximum {max}"));
            }
        }
        if let Some(recommended) = spec.recommended_min {
            if n <= recommended {
                self.result.warnings.push(format!(
                    "Field '{path}' value {n} is at or below the recommended minimum {recommended}"
                ));
            }
        }
    }

    fn check_choices(&mut self, path: &str, spec: &FieldSpec, value: &Value) {
        let Some(choices) = &spec.choices else {
            return;
        };
        if !choices.iter().any(|c| choice_matches(value, c)) {
            let shown = value
                .scalar_to_json()
                .map(|j| j.to_string())
                .unwrap_or_else(|| value.type_name().to_string());
            let allowed: Vec<String> = choices.iter().map(|c| c.to_string()).collect();
            self.result.rule(
                path,
                format!("value {shown} is not one of [{}]", allowed.join(", ")),
            );
        }
    }

    fn mismatch(&mut self, path: &str, expected: &str, got: &Value) {
        self.result
            .rule(path, format!("expected {expected}, got {}", got.type_name()));
    }
}

fn choice_matches(value: &Value, choice: &serde_json::Value) -> bool {
    match (value.as_f64(), choice.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => value.scalar_to_json().as_ref() == Some(choice),
    }
}

fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

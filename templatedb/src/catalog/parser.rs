use crate::error::Result;
use super::types::CatalogDefinition;

/// Parse a catalog YAML string into a CatalogDefinition
pub fn parse_catalog_str(content: &str) -> Result<CatalogDefinition> {
    let catalog: CatalogDefinition = serde_yaml::from_str(content)?;
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;

    #[test]
    fn test_parse_field_shorthand() {
        let yaml = r#"
root: Day
kinds:
  Day:
    collection: Days
    fields:
      - { name: Values, type: list, length: 24, items: { type: number, min: 0, max: 1 } }
      - { name: Kind, type: string, enum: [Fraction, Temperature], default: Fraction }
"#;
        let def = parse_catalog_str(yaml).unwrap();
        let day = &def.kinds["Day"];
        assert_eq!(day.collection.as_deref(), Some("Days"));
        assert!(!day.is_abstract);

        let values = &day.fields[0].spec;
        assert_eq!(values.field_type, FieldType::List);
        assert_eq!(values.length, Some(24));
        assert_eq!(values.items.as_ref().unwrap().max, Some(1.0));

        let kind = &day.fields[1].spec;
        assert_eq!(kind.choices.as_ref().unwrap().len(), 2);
        assert_eq!(kind.default, Some(serde_json::json!("Fraction")));
    }

    #[test]
    fn test_unknown_field_type_is_an_error() {
        let yaml = "root: A\nkinds:\n  A:\n    fields:\n      - { name: x, type: blob }\n";
        assert!(parse_catalog_str(yaml).is_err());
    }
}

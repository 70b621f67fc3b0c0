//! Wire-format tags and typed value coercion.
//!
//! Every property carries a format tag string in its metadata. Tags are
//! parsed leniently: unrecognized or absent tags degrade to text so
//! ingestion never fails solely because a schema is loose.

use omega_core::{Error, Result};
use omega_storage::FieldValue;

/// Recognized wire-format tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyFormat {
    Integer,
    Long,
    Float,
    Double,
    Text,
    Boolean,
}

impl PropertyFormat {
    /// Parse a format tag. Anything unrecognized is `Text`.
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "int" | "integer" => Self::Integer,
            "long" => Self::Long,
            "float" | "single" => Self::Float,
            "double" => Self::Double,
            "boolean" => Self::Boolean,
            _ => Self::Text,
        }
    }
}

/// Coerce a wire-format string into a typed field value.
///
/// Deterministic and total over `Text`; the numeric and boolean formats
/// fail with `InvalidInput` when the string does not parse.
pub fn coerce_value(raw: &str, format: PropertyFormat) -> Result<FieldValue> {
    match format {
        PropertyFormat::Integer => raw
            .parse::<i32>()
            .map(FieldValue::Integer)
            .map_err(|_| parse_error(raw, "integer")),
        PropertyFormat::Long => raw
            .parse::<i64>()
            .map(FieldValue::Long)
            .map_err(|_| parse_error(raw, "long")),
        PropertyFormat::Float => raw
            .parse::<f32>()
            .map(FieldValue::Float)
            .map_err(|_| parse_error(raw, "float")),
        PropertyFormat::Double => raw
            .parse::<f64>()
            .map(FieldValue::Double)
            .map_err(|_| parse_error(raw, "double")),
        PropertyFormat::Boolean => raw
            .parse::<bool>()
            .map(FieldValue::Boolean)
            .map_err(|_| parse_error(raw, "boolean")),
        PropertyFormat::Text => Ok(FieldValue::Text(raw.to_string())),
    }
}

fn parse_error(raw: &str, format: &str) -> Error {
    Error::InvalidInput(format!("value {:?} does not parse as {}", raw, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(PropertyFormat::parse("int"), PropertyFormat::Integer);
        assert_eq!(PropertyFormat::parse("Integer"), PropertyFormat::Integer);
        assert_eq!(PropertyFormat::parse("single"), PropertyFormat::Float);
        assert_eq!(PropertyFormat::parse("string"), PropertyFormat::Text);
        assert_eq!(PropertyFormat::parse("text"), PropertyFormat::Text);
    }

    #[test]
    fn test_unrecognized_tag_degrades_to_text() {
        assert_eq!(PropertyFormat::parse("blob"), PropertyFormat::Text);
        assert_eq!(PropertyFormat::parse(""), PropertyFormat::Text);
    }

    #[test]
    fn test_coerce_typed() {
        assert_eq!(
            coerce_value("42", PropertyFormat::Integer).unwrap(),
            FieldValue::Integer(42)
        );
        assert_eq!(
            coerce_value("-7", PropertyFormat::Long).unwrap(),
            FieldValue::Long(-7)
        );
        assert_eq!(
            coerce_value("1.5", PropertyFormat::Double).unwrap(),
            FieldValue::Double(1.5)
        );
        assert_eq!(
            coerce_value("true", PropertyFormat::Boolean).unwrap(),
            FieldValue::Boolean(true)
        );
        assert_eq!(
            coerce_value("anything", PropertyFormat::Text).unwrap(),
            FieldValue::Text("anything".to_string())
        );
    }

    #[test]
    fn test_coerce_rejects_unparseable() {
        assert!(coerce_value("abc", PropertyFormat::Integer).is_err());
        assert!(coerce_value("1.5", PropertyFormat::Integer).is_err());
        assert!(coerce_value("yes", PropertyFormat::Boolean).is_err());
    }
}

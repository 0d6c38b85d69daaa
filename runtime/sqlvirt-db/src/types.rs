//! Mapping between native value kinds and `xsi:type` tags.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};

pub type ParseFn = fn(&str) -> std::result::Result<Value, String>;

/// One `(native kind, wire tag, parser)` entry.
#[derive(Clone)]
pub struct TypeMapping {
    kind: ValueKind,
    tag: String,
    parse: ParseFn,
}

impl TypeMapping {
    pub fn new(kind: ValueKind, tag: impl Into<String>, parse: ParseFn) -> Self {
        Self {
            kind,
            tag: tag.into(),
            parse,
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl std::fmt::Debug for TypeMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeMapping")
            .field("kind", &self.kind)
            .field("tag", &self.tag)
            .finish()
    }
}

/// A value ready to be written as an XML cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue<'a> {
    /// `None` means implicit string.
    pub tag: Option<&'a str>,
    pub text: String,
}

/// Registry of type mappings. Tags are unique; registering an existing tag
/// replaces its entry.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    mappings: Vec<TypeMapping>,
}

impl TypeRegistry {
    pub fn empty() -> Self {
        Self {
            mappings: Vec::new(),
        }
    }

    pub fn register(mut self, mapping: TypeMapping) -> Self {
        self.mappings.retain(|existing| existing.tag != mapping.tag);
        self.mappings.push(mapping);
        self
    }

    pub fn mappings(&self) -> &[TypeMapping] {
        &self.mappings
    }

    pub fn tag_for(&self, kind: ValueKind) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.kind == kind)
            .map(|mapping| mapping.tag.as_str())
    }

    /// Encodes a value; `None` for null. Unregistered text is an implicit
    /// string, any other unregistered kind cannot be represented and fails.
    pub fn encode(&self, value: &Value) -> Result<Option<EncodedValue<'_>>> {
        let (Some(kind), Some(text)) = (value.kind(), value.text()) else {
            return Ok(None);
        };
        if let Some(tag) = self.tag_for(kind) {
            return Ok(Some(EncodedValue {
                tag: Some(tag),
                text,
            }));
        }
        if kind == ValueKind::Text {
            return Ok(Some(EncodedValue { tag: None, text }));
        }
        Err(Error::UnmappedType { kind })
    }

    /// Unknown tags degrade to the raw text.
    pub fn decode(&self, tag: &str, text: &str) -> Result<Value> {
        match self.mappings.iter().find(|mapping| mapping.tag == tag) {
            Some(mapping) => (mapping.parse)(text).map_err(|err| {
                Error::unreadable(format!("cannot read '{text}' as {tag}: {err}"))
            }),
            None => Ok(Value::Text(text.to_string())),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::empty()
            .register(TypeMapping::new(ValueKind::Decimal, "xs:decimal", parse_decimal))
            .register(TypeMapping::new(ValueKind::Integer, "xs:integer", parse_integer))
            .register(TypeMapping::new(ValueKind::Long, "xs:long", parse_long))
    }
}

fn parse_decimal(text: &str) -> std::result::Result<Value, String> {
    Decimal::from_str(text)
        .map(Value::Decimal)
        .map_err(|err| err.to_string())
}

fn parse_integer(text: &str) -> std::result::Result<Value, String> {
    text.parse::<i32>()
        .map(Value::Integer)
        .map_err(|err| err.to_string())
}

fn parse_long(text: &str) -> std::result::Result<Value, String> {
    text.parse::<i64>()
        .map(Value::Long)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn default_registry_round_trips_known_kinds() {
        let registry = TypeRegistry::default();
        let decimal = Value::Decimal(Decimal::from_str("14.33").expect("decimal"));
        let encoded = registry.encode(&decimal).expect("encode").expect("non-null");
        assert_eq!(encoded.tag, Some("xs:decimal"));
        assert_eq!(encoded.text, "14.33");
        assert_eq!(registry.decode("xs:decimal", "14.33").expect("decode"), decimal);
        assert_eq!(registry.decode("xs:integer", "2").expect("decode"), Value::Integer(2));
        assert_eq!(registry.decode("xs:long", "3").expect("decode"), Value::Long(3));
    }

    #[test]
    fn unknown_tag_degrades_to_text() {
        let registry = TypeRegistry::default();
        assert_eq!(
            registry.decode("xs:date", "1900-01-04").expect("decode"),
            Value::Text("1900-01-04".into())
        );
    }

    #[test]
    fn text_without_mapping_is_implicit_string() {
        let registry = TypeRegistry::default();
        let encoded = registry
            .encode(&Value::from("hello"))
            .expect("encode")
            .expect("non-null");
        assert_eq!(encoded.tag, None);
        assert_eq!(encoded.text, "hello");
    }

    #[test]
    fn null_encodes_to_nothing() {
        assert!(TypeRegistry::default().encode(&Value::Null).expect("encode").is_none());
    }

    #[test]
    fn unmapped_non_text_fails_loudly() {
        let err = TypeRegistry::default()
            .encode(&Value::Real(1.5))
            .expect_err("real has no default mapping");
        assert!(matches!(err, Error::UnmappedType { kind: ValueKind::Real }));
    }

    #[test]
    fn malformed_typed_text_is_unreadable() {
        let err = TypeRegistry::default()
            .decode("xs:integer", "ten")
            .expect_err("not an integer");
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnreadablePayload(_))
        ));
    }

    #[test]
    fn replacement_registry_is_not_merged() {
        fn parse_real(text: &str) -> std::result::Result<Value, String> {
            text.parse::<f64>().map(Value::Real).map_err(|err| err.to_string())
        }
        let registry =
            TypeRegistry::empty().register(TypeMapping::new(ValueKind::Real, "xs:double", parse_real));
        assert_eq!(registry.tag_for(ValueKind::Real), Some("xs:double"));
        assert_eq!(registry.tag_for(ValueKind::Integer), None);
        assert_eq!(
            registry.decode("xs:integer", "7").expect("decode"),
            Value::Text("7".into())
        );
    }

    #[test]
    fn registering_a_tag_twice_replaces_it() {
        let registry = TypeRegistry::default()
            .register(TypeMapping::new(ValueKind::Long, "xs:integer", parse_long));
        assert_eq!(registry.mappings().len(), 3);
        assert_eq!(registry.decode("xs:integer", "5").expect("decode"), Value::Long(5));
    }
}

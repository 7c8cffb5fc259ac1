//! # Jolt
//!
//! JSON notation for PackStream values, as used for message fields in
//! scripts. Types JSON can't express directly are written as single key
//! maps whose key is a *sigil*:
//!
//! | Sigil | Type |
//! |-------|------|
//! | `?` | boolean |
//! | `Z` | integer (`{"Z": "123"}`) |
//! | `R` | float (`{"R": "1.5"}`) |
//! | `U` | string |
//! | `#` | bytes (`{"#": "CA FE"}`) |
//! | `{}` | map |
//! | `[]` | list |
//! | `T` | date, time, date time, duration |
//! | `@` | point (`{"@": "SRID=7203;POINT(1 2)"}`) |
//! | `()` | node |
//! | `->` / `<-` | relationship |
//! | `..` | path |
//!
//! A sigil may carry a version suffix (`"()v1"`) to force the graph shapes
//! of a particular PackStream version. `"*"` under a sigil is a typed
//! wildcard, e.g. `{"Z": "*"}` matches any integer.

mod decode;
mod dumps;
mod render;
mod temporal;

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::bolt::packstream::{marker, Structure, Value};

pub use decode::decode;
pub use dumps::dumps;
pub use render::{dumps_simple, render_simple};

/// Jolt decoding errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JoltError {
    /// The value after a sigil has the wrong JSON type or shape
    #[error("{0}")]
    Value(String),

    /// A textual temporal, spatial or numeric value could not be parsed
    #[error("Couldn't parse {value} as {kind}")]
    Parse { value: String, kind: &'static str },

    /// Versioned sigil naming an unknown PackStream version
    #[error("Unknown JOLT version {0}")]
    UnknownVersion(String),

    /// Wildcards can only stand for whole fields, not for parts of a
    /// graph structure
    #[error("JOLT wildcard not allowed inside {0}")]
    WildcardInStructure(&'static str),
}

impl JoltError {
    pub(crate) fn value(msg: impl Into<String>) -> Self {
        JoltError::Value(msg.into())
    }
}

/// Type matched by a Jolt wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wildcard {
    /// `{"?": "*"}`
    Boolean,
    /// `{"Z": "*"}`
    Integer,
    /// `{"R": "*"}`
    Float,
    /// `{"U": "*"}`
    String,
    /// `{"#": "*"}`
    Bytes,
    /// `{"{}": "*"}`
    Map,
    /// `{"[]": "*"}`
    List,
    /// `{"T": "*"}`
    Temporal,
    /// `{"@": "*"}`
    Point,
    /// `{"()": "*"}`
    Node,
    /// `{"->": "*"}` or `{"<-": "*"}`
    Relationship,
    /// `{"..": "*"}`
    Path,
}

impl Wildcard {
    fn from_sigil(sigil: &str) -> Option<Self> {
        let wildcard = match sigil {
            "?" => Wildcard::Boolean,
            "Z" => Wildcard::Integer,
            "R" => Wildcard::Float,
            "U" => Wildcard::String,
            "#" => Wildcard::Bytes,
            "{}" => Wildcard::Map,
            "[]" => Wildcard::List,
            "T" => Wildcard::Temporal,
            "@" => Wildcard::Point,
            "()" => Wildcard::Node,
            "->" | "<-" => Wildcard::Relationship,
            ".." => Wildcard::Path,
            _ => return None,
        };
        Some(wildcard)
    }

    /// Sigil the wildcard was written with.
    pub fn sigil(self) -> &'static str {
        match self {
            Wildcard::Boolean => "?",
            Wildcard::Integer => "Z",
            Wildcard::Float => "R",
            Wildcard::String => "U",
            Wildcard::Bytes => "#",
            Wildcard::Map => "{}",
            Wildcard::List => "[]",
            Wildcard::Temporal => "T",
            Wildcard::Point => "@",
            Wildcard::Node => "()",
            Wildcard::Relationship => "->",
            Wildcard::Path => "..",
        }
    }

    /// Check whether a received value has the wildcard's type.
    pub fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (Wildcard::Boolean, Value::Boolean(_))
            | (Wildcard::Integer, Value::Integer(_))
            | (Wildcard::Float, Value::Float(_))
            | (Wildcard::String, Value::String(_))
            | (Wildcard::Bytes, Value::Bytes(_))
            | (Wildcard::Map, Value::Map(_))
            | (Wildcard::List, Value::List(_)) => true,
            (wildcard, Value::Structure(s)) => wildcard.matches_tag(s.tag),
            _ => false,
        }
    }

    fn matches_tag(self, tag: u8) -> bool {
        match self {
            Wildcard::Temporal => matches!(
                tag,
                marker::DATE
                    | marker::TIME
                    | marker::LOCAL_TIME
                    | marker::DATE_TIME
                    | marker::DATE_TIME_UTC
                    | marker::LOCAL_DATE_TIME
                    | marker::DURATION
            ),
            Wildcard::Point => matches!(tag, marker::POINT_2D | marker::POINT_3D),
            Wildcard::Node => tag == marker::NODE,
            Wildcard::Relationship => tag == marker::RELATIONSHIP,
            Wildcard::Path => tag == marker::PATH,
            _ => false,
        }
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{\"{}\": \"*\"}}", self.sigil())
    }
}

/// A decoded script field: a PackStream value that may contain wildcards.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer
    Integer(i64),
    /// Float
    Float(f64),
    /// String, `"*"` included
    String(String),
    /// Bytes
    Bytes(Vec<u8>),
    /// List
    List(Vec<Field>),
    /// Map, keys as written (optional and unordered markers included)
    Map(IndexMap<String, Field>),
    /// Graph, temporal or spatial structure
    Structure(Structure),
    /// Typed wildcard
    Wildcard(Wildcard),
}

impl Field {
    /// Whether a wildcard occurs anywhere in this field.
    pub fn has_wildcard(&self) -> bool {
        match self {
            Field::Wildcard(_) => true,
            Field::List(items) => items.iter().any(Field::has_wildcard),
            Field::Map(map) => map.values().any(Field::has_wildcard),
            _ => false,
        }
    }

    /// Convert into a PackStream value. Returns `None` if the field
    /// contains a wildcard.
    pub fn to_value(&self) -> Option<Value> {
        let value = match self {
            Field::Null => Value::Null,
            Field::Boolean(b) => Value::Boolean(*b),
            Field::Integer(i) => Value::Integer(*i),
            Field::Float(f) => Value::Float(*f),
            Field::String(s) => Value::String(s.clone()),
            Field::Bytes(b) => Value::Bytes(b.clone()),
            Field::List(items) => {
                Value::List(items.iter().map(Field::to_value).collect::<Option<_>>()?)
            }
            Field::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| Some((k.clone(), v.to_value()?)))
                    .collect::<Option<_>>()?,
            ),
            Field::Structure(s) => Value::Structure(s.clone()),
            Field::Wildcard(_) => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matches() {
        assert!(Wildcard::Integer.matches(&Value::Integer(1)));
        assert!(!Wildcard::Integer.matches(&Value::Float(1.0)));
        assert!(!Wildcard::Integer.matches(&Value::Boolean(true)));
        assert!(Wildcard::Temporal.matches(&Value::Structure(Structure::new(
            marker::DATE,
            vec![Value::Integer(0)]
        ))));
        assert!(!Wildcard::Node.matches(&Value::Structure(Structure::new(
            marker::DATE,
            vec![Value::Integer(0)]
        ))));
        assert!(!Wildcard::Map.matches(&Value::Null));
    }

    #[test]
    fn test_wildcard_display() {
        assert_eq!(Wildcard::Integer.to_string(), r#"{"Z": "*"}"#);
        assert_eq!(Wildcard::from_sigil("<-"), Some(Wildcard::Relationship));
        assert_eq!(Wildcard::from_sigil("X"), None);
    }

    #[test]
    fn test_field_to_value() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Field::List(vec![Field::Integer(1), Field::Null]));
        let field = Field::Map(map);
        assert!(!field.has_wildcard());
        let value = field.to_value().unwrap();
        assert_eq!(
            value.as_map().unwrap()["a"],
            Value::List(vec![Value::Integer(1), Value::Null])
        );

        let wild = Field::List(vec![Field::Wildcard(Wildcard::String)]);
        assert!(wild.has_wildcard());
        assert!(wild.to_value().is_none());
    }
}

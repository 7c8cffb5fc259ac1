//! Validation of well-known structures.
//!
//! Structures nested inside a message (graph elements, temporal and spatial
//! values) must have a field layout matching their tag. The layout of the
//! graph structures depends on the PackStream version in use.

use super::marker::*;
use super::types::{PackStreamVersion, Structure, Value};
use super::PackStreamError;

/// Field kind accepted at a position of a well-known structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    NullableInt,
    Float,
    Str,
    StrList,
    StrKeyedMap,
}

impl Kind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Kind::Int => matches!(value, Value::Integer(_)),
            Kind::NullableInt => matches!(value, Value::Integer(_) | Value::Null),
            Kind::Float => matches!(value, Value::Float(_)),
            Kind::Str => matches!(value, Value::String(_)),
            Kind::StrList => match value {
                Value::List(items) => items.iter().all(|i| matches!(i, Value::String(_))),
                _ => false,
            },
            // Keys are strings by construction of `Value::Map`.
            Kind::StrKeyedMap => matches!(value, Value::Map(_)),
        }
    }
}

use Kind::*;

/// Name and field layout of a tag, `None` for tags without validation.
fn layout(tag: u8, version: PackStreamVersion) -> Option<(&'static str, &'static [Kind])> {
    let v1 = version == PackStreamVersion::V1;
    let entry: (&'static str, &'static [Kind]) = match tag {
        NODE if v1 => ("Node", &[Int, StrList, StrKeyedMap]),
        NODE => ("Node", &[NullableInt, StrList, StrKeyedMap, Str]),
        UNBOUND_RELATIONSHIP if v1 => ("UnboundRelationship", &[Int, Str, StrKeyedMap]),
        UNBOUND_RELATIONSHIP => ("UnboundRelationship", &[NullableInt, Str, StrKeyedMap, Str]),
        RELATIONSHIP if v1 => ("Relationship", &[Int, Int, Int, Str, StrKeyedMap]),
        RELATIONSHIP => (
            "Relationship",
            &[NullableInt, NullableInt, NullableInt, Str, StrKeyedMap, Str, Str, Str],
        ),
        DATE => ("Date", &[Int]),
        TIME => ("Time", &[Int, Int]),
        LOCAL_TIME => ("LocalTime", &[Int]),
        DATE_TIME | DATE_TIME_UTC => ("DateTime", &[Int, Int, Int]),
        DATE_TIME_ZONE_ID | DATE_TIME_ZONE_ID_UTC => ("DateTimeZoneId", &[Int, Int, Str]),
        LOCAL_DATE_TIME => ("LocalDateTime", &[Int, Int]),
        DURATION => ("Duration", &[Int, Int, Int, Int]),
        POINT_2D => ("Point2D", &[Int, Float, Float]),
        POINT_3D => ("Point3D", &[Int, Float, Float, Float]),
        _ => return None,
    };
    Some(entry)
}

impl Structure {
    /// Verify the field layout of a well-known structure.
    ///
    /// Structures with an unknown tag are accepted as they are.
    pub fn verify(&self, version: PackStreamVersion) -> Result<(), PackStreamError> {
        if self.tag == PATH {
            return self.verify_path();
        }
        let Some((name, kinds)) = layout(self.tag, version) else {
            return Ok(());
        };
        let valid = self.fields.len() == kinds.len()
            && self.fields.iter().zip(kinds).all(|(f, k)| k.accepts(f));
        if valid {
            Ok(())
        } else {
            Err(self.invalid(name.to_string()))
        }
    }

    fn verify_path(&self) -> Result<(), PackStreamError> {
        let invalid = || self.invalid("Path".to_string());
        let [Value::List(nodes), Value::List(rels), Value::List(ids)] = self.fields.as_slice()
        else {
            return Err(invalid());
        };
        let first_field = |v: &Value, tag: u8| -> Option<Value> {
            match v {
                Value::Structure(s) if s.tag == tag => s.fields.first().cloned(),
                _ => None,
            }
        };
        let mut element_ids = Vec::with_capacity(nodes.len() + rels.len());
        for (items, tag) in [(nodes, NODE), (rels, UNBOUND_RELATIONSHIP)] {
            for item in items {
                match first_field(item, tag) {
                    Some(id) if ids.contains(&id) => element_ids.push(id),
                    _ => return Err(invalid()),
                }
            }
        }
        let ids_known = ids
            .iter()
            .all(|id| matches!(id, Value::Integer(_)) && element_ids.contains(id));
        if ids_known {
            Ok(())
        } else {
            Err(invalid())
        }
    }

    fn invalid(&self, name: String) -> PackStreamError {
        PackStreamError::InvalidStructure(format!("Invalid {} struct received {}", name, self))
    }
}

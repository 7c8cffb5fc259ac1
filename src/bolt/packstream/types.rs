//! PackStream value types.

use std::fmt;

use indexmap::IndexMap;

use super::marker;

/// PackStream format revision.
///
/// Version 2 (Bolt 5.0+) changes the graph structures to carry element ids
/// and date-times to be expressed in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackStreamVersion {
    /// Bolt 1.0 - 4.4
    V1,
    /// Bolt 5.0+
    V2,
}

impl PackStreamVersion {
    /// Numeric form, as used in diagnostics.
    pub fn number(self) -> u8 {
        match self {
            PackStreamVersion::V1 => 1,
            PackStreamVersion::V2 => 2,
        }
    }
}

/// A PackStream value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// UTF-8 string
    String(String),
    /// Heterogeneous list
    List(Vec<Value>),
    /// String-keyed map, insertion ordered
    Map(IndexMap<String, Value>),
    /// Tagged structure
    Structure(Structure),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as integer if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as float if this is a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string slice if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as list if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get as map if this is a map.
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get as structure if this is a structure.
    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            Value::Structure(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the value's type, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Structure(_) => "Structure",
        }
    }

    /// Debug rendering in the notation used by script diagnostics.
    ///
    /// Strings are single quoted, maps use `{'k': v}` and structures render
    /// as `Structure[0xTT](fields)`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    pub(crate) fn write_repr(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("None"),
            Value::Boolean(true) => out.push_str("True"),
            Value::Boolean(false) => out.push_str("False"),
            Value::Integer(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Bytes(b) => {
                out.push_str("b'");
                for byte in b {
                    match byte {
                        b'\\' => out.push_str("\\\\"),
                        b'\'' => out.push_str("\\'"),
                        0x20..=0x7E => out.push(*byte as char),
                        _ => out.push_str(&format!("\\x{:02x}", byte)),
                    }
                }
                out.push('\'');
            }
            Value::String(s) => write_quoted(s, out),
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out);
                }
                out.push(']');
            }
            Value::Map(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_quoted(k, out);
                    out.push_str(": ");
                    v.write_repr(out);
                }
                out.push('}');
            }
            Value::Structure(s) => out.push_str(&s.to_string()),
        }
    }
}

fn write_quoted(s: &str, out: &mut String) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
}

/// Format a float the way the script notation prints it: shortest round-trip
/// digits, fixed notation for exponents in `-4..16`, scientific otherwise
/// (`1e+20`, `1e-05`), and `inf`, `-inf` or `nan` for non-finite values.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let sci = format!("{:e}", f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exp) {
        if exp < 0 {
            out.push_str("0.");
            for _ in 0..(-exp - 1) {
                out.push('0');
            }
            out.push_str(&digits);
        } else {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                out.push_str(&digits);
                for _ in digits.len()..int_len {
                    out.push('0');
                }
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&format!("{:02}", exp.abs()));
    }
    out
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Structure(a), Value::Structure(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<Structure> for Value {
    fn from(s: Structure) -> Self {
        Value::Structure(s)
    }
}

/// A tagged PackStream structure.
#[derive(Debug, Clone)]
pub struct Structure {
    /// Tag byte
    pub tag: u8,
    /// Field values
    pub fields: Vec<Value>,
}

impl Structure {
    /// Create a new structure.
    pub fn new(tag: u8, fields: Vec<Value>) -> Self {
        Self { tag, fields }
    }
}

impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        if self.tag != other.tag {
            return false;
        }
        if self.tag == marker::PATH {
            // Nodes and relationships of a path are not ordered, only the
            // id sequence is.
            return other.fields.len() == 3
                && self.fields.len() == 3
                && same_multiset(&self.fields[0], &other.fields[0])
                && same_multiset(&self.fields[1], &other.fields[1])
                && self.fields[2] == other.fields[2];
        }
        self.fields == other.fields
    }
}

fn same_multiset(a: &Value, b: &Value) -> bool {
    let (Value::List(a), Value::List(b)) = (a, b) else {
        return a == b;
    };
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|item| {
        let hit = b
            .iter()
            .enumerate()
            .find(|(i, candidate)| !used[*i] && *candidate == item)
            .map(|(i, _)| i);
        match hit {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Structure[0x{:02X}](", self.tag)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&field.repr())?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64) -> Value {
        Value::Structure(Structure::new(
            marker::NODE,
            vec![Value::Integer(id), Value::List(vec![]), Value::Map(IndexMap::new())],
        ))
    }

    fn rel(id: i64) -> Value {
        Value::Structure(Structure::new(
            marker::UNBOUND_RELATIONSHIP,
            vec![Value::Integer(id), "KNOWS".into(), Value::Map(IndexMap::new())],
        ))
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Integer(3).as_int(), Some(3));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Float(1.5).as_float(), Some(1.5));
        assert_eq!(Value::Boolean(true).as_int(), None);
        assert_eq!(Value::Map(IndexMap::new()).type_name(), "dict");
    }

    #[test]
    fn test_int_and_float_differ() {
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_ne!(Value::Boolean(true), Value::Integer(1));
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let mut a = IndexMap::new();
        a.insert("x".to_string(), Value::Integer(1));
        a.insert("y".to_string(), Value::Integer(2));
        let mut b = IndexMap::new();
        b.insert("y".to_string(), Value::Integer(2));
        b.insert("x".to_string(), Value::Integer(1));
        assert_eq!(Value::Map(a), Value::Map(b));
    }

    #[test]
    fn test_path_equality_is_order_insensitive() {
        let ids = Value::List(vec![1.into(), 10.into(), 2.into()]);
        let a = Structure::new(
            marker::PATH,
            vec![Value::List(vec![node(1), node(2)]), Value::List(vec![rel(10)]), ids.clone()],
        );
        let b = Structure::new(
            marker::PATH,
            vec![Value::List(vec![node(2), node(1)]), Value::List(vec![rel(10)]), ids],
        );
        assert_eq!(a, b);

        let reversed_ids = Value::List(vec![2.into(), 10.into(), 1.into()]);
        let c = Structure::new(
            marker::PATH,
            vec![Value::List(vec![node(1), node(2)]), Value::List(vec![rel(10)]), reversed_ids],
        );
        assert_ne!(a, c);
    }

    #[test]
    fn test_path_multiset_counts_duplicates() {
        let ids = Value::List(vec![1.into()]);
        let a = Structure::new(
            marker::PATH,
            vec![Value::List(vec![node(1), node(1)]), Value::List(vec![]), ids.clone()],
        );
        let b = Structure::new(
            marker::PATH,
            vec![Value::List(vec![node(1), node(2)]), Value::List(vec![]), ids],
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(123456.0), "123456.0");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn test_repr() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::List(vec![Value::Null, Value::Boolean(true)]));
        let s = Structure::new(0x10, vec!["RETURN 1".into(), Value::Map(map)]);
        assert_eq!(
            Value::Structure(s).repr(),
            "Structure[0x10]('RETURN 1', {'a': [None, True]})"
        );
        assert_eq!(Value::Bytes(vec![0x41, 0x00]).repr(), "b'A\\x00'");
    }
}

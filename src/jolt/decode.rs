//! Jolt JSON to [`Field`] decoding.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Number, Value as Json};

use super::temporal::{parse_point, parse_temporal};
use super::{Field, JoltError, Wildcard};
use crate::bolt::packstream::{marker, PackStreamVersion, Structure, Value};

const SIGILS: &[&str] = &[
    "?", "Z", "R", "U", "#", "{}", "[]", "T", "@", "()", "->", "<-", "..",
];

static VERSIONED_SIGIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)v(\d+)$").expect("valid versioned sigil regex"));

static INT_FRACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\d*$").expect("valid int fraction regex"));

static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-fA-F0-9]{2}\s*)*$").expect("valid hex regex"));

/// Decode a Jolt JSON value.
///
/// Graph structures are built with the shapes of `version` unless the sigil
/// carries an explicit version suffix (`"()v2"`).
pub fn decode(value: &Json, version: PackStreamVersion) -> Result<Field, JoltError> {
    match value {
        Json::Null => Ok(Field::Null),
        Json::Bool(b) => Ok(Field::Boolean(*b)),
        Json::Number(n) => Ok(decode_number(n)),
        Json::String(s) => Ok(Field::String(s.clone())),
        Json::Array(items) => decode_list(items, version),
        Json::Object(map) => {
            if let (1, Some((key, inner))) = (map.len(), map.iter().next()) {
                if let Some((sigil, version)) = split_sigil(key, version)? {
                    return decode_sigil(sigil, inner, version);
                }
            }
            decode_map(map, version)
        }
    }
}

/// Plain JSON numbers: 32-bit integers stay integers, anything else is a
/// float. Larger integers must be written as `{"Z": "..."}`.
fn decode_number(n: &Number) -> Field {
    match n.as_i64() {
        Some(i) if i32::try_from(i).is_ok() => Field::Integer(i),
        _ => Field::Float(n.as_f64().unwrap_or(f64::NAN)),
    }
}

fn decode_list(items: &[Json], version: PackStreamVersion) -> Result<Field, JoltError> {
    items
        .iter()
        .map(|v| decode(v, version))
        .collect::<Result<_, _>>()
        .map(Field::List)
}

fn decode_map(map: &Map<String, Json>, version: PackStreamVersion) -> Result<Field, JoltError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), decode(v, version)?)))
        .collect::<Result<IndexMap<_, _>, _>>()
        .map(Field::Map)
}

fn split_sigil(
    key: &str,
    version: PackStreamVersion,
) -> Result<Option<(&str, PackStreamVersion)>, JoltError> {
    if SIGILS.contains(&key) {
        return Ok(Some((key, version)));
    }
    let Some(caps) = VERSIONED_SIGIL_RE.captures(key) else {
        return Ok(None);
    };
    let (Some(sigil), Some(number)) = (caps.get(1), caps.get(2)) else {
        return Ok(None);
    };
    if !SIGILS.contains(&sigil.as_str()) {
        return Ok(None);
    }
    let version = match number.as_str() {
        "1" => PackStreamVersion::V1,
        "2" => PackStreamVersion::V2,
        _ => return Err(JoltError::UnknownVersion(key.to_string())),
    };
    Ok(Some((sigil.as_str(), version)))
}

fn decode_sigil(sigil: &str, value: &Json, version: PackStreamVersion) -> Result<Field, JoltError> {
    if value.as_str() == Some("*") {
        if let Some(wildcard) = Wildcard::from_sigil(sigil) {
            return Ok(Field::Wildcard(wildcard));
        }
    }
    match sigil {
        "?" => value
            .as_bool()
            .map(Field::Boolean)
            .ok_or_else(|| JoltError::value(r#"Expected bool type after sigil "?""#)),
        "Z" => {
            let s = value
                .as_str()
                .ok_or_else(|| JoltError::value(r#"Expected str type after sigil "Z""#))?;
            INT_FRACTION_RE
                .replace(s, "")
                .trim()
                .parse()
                .map(Field::Integer)
                .map_err(|_| JoltError::value("Invalid int representation"))
        }
        "R" => {
            let s = value
                .as_str()
                .ok_or_else(|| JoltError::value(r#"Expected str type after sigil "R""#))?;
            s.trim()
                .parse()
                .map(Field::Float)
                .map_err(|_| JoltError::value("Invalid float representation"))
        }
        "U" => value
            .as_str()
            .map(|s| Field::String(s.to_string()))
            .ok_or_else(|| JoltError::value(r#"Expected str after sigil "U""#)),
        "#" => decode_bytes(value).map(Field::Bytes),
        "{}" => match value {
            Json::Object(map) => decode_map(map, version),
            _ => Err(JoltError::value(r#"Expecting dict after sigil "{}""#)),
        },
        "[]" => match value {
            Json::Array(items) => decode_list(items, version),
            _ => Err(JoltError::value(r#"Expecting list after sigil "[]""#)),
        },
        "T" => {
            let s = value
                .as_str()
                .ok_or_else(|| JoltError::value(r#"Expecting str after sigil "T""#))?;
            parse_temporal(s, version).map(Field::Structure)
        }
        "@" => {
            let s = value
                .as_str()
                .ok_or_else(|| JoltError::value(r#"Expecting str sigil "@""#))?;
            parse_point(s).map(Field::Structure)
        }
        "()" => decode_node(value, version).map(Field::Structure),
        "->" => decode_relationship(value, version, false).map(Field::Structure),
        "<-" => decode_relationship(value, version, true).map(Field::Structure),
        ".." => decode_path(value, version).map(Field::Structure),
        _ => Err(JoltError::value(format!("Unknown sigil {:?}", sigil))),
    }
}

fn decode_bytes(value: &Json) -> Result<Vec<u8>, JoltError> {
    let invalid = || JoltError::value(r##"Expected str or list of integers (0-255) after sigil "#""##);
    match value {
        Json::String(s) => {
            if !HEX_RE.is_match(s) {
                return Err(JoltError::value(format!(
                    "Invalid hex encoded string for bytes {}",
                    s
                )));
            }
            let hex: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            data_encoding::HEXUPPER_PERMISSIVE
                .decode(hex.as_bytes())
                .map_err(|_| JoltError::value(format!("Invalid hex encoded string for bytes {}", s)))
        }
        Json::Array(items) => items
            .iter()
            .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

/// Id field of a graph element: an integer, or null in PackStream v2.
fn decode_id(value: &Json, version: PackStreamVersion, what: &str) -> Result<Value, JoltError> {
    if let Some(id) = value.as_i64() {
        return Ok(Value::Integer(id));
    }
    match (value, version) {
        (Json::Null, PackStreamVersion::V2) => Ok(Value::Null),
        (_, PackStreamVersion::V1) => Err(JoltError::value(format!("{} must be int", what))),
        (_, PackStreamVersion::V2) => {
            Err(JoltError::value(format!("{} must be int or none", what)))
        }
    }
}

fn decode_str(value: &Json, what: &str) -> Result<Value, JoltError> {
    value
        .as_str()
        .map(Value::from)
        .ok_or_else(|| JoltError::value(format!("{} must be a str", what)))
}

/// Property map of a graph element. Wildcards are not allowed in there.
fn decode_properties(
    value: &Json,
    version: PackStreamVersion,
    owner: &'static str,
    err: &str,
) -> Result<Value, JoltError> {
    let Json::Object(map) = value else {
        return Err(JoltError::value(err));
    };
    decode_map(map, version)?
        .to_value()
        .ok_or(JoltError::WildcardInStructure(owner))
}

fn graph_list<'a>(value: &'a Json, len: usize, sigil: &str) -> Result<&'a [Json], JoltError> {
    match value {
        Json::Array(items) if items.len() == len => Ok(items),
        _ => Err(JoltError::value(format!(
            "Expecting list of length {} after sigil \"{}\"",
            len, sigil
        ))),
    }
}

fn decode_node(value: &Json, version: PackStreamVersion) -> Result<Structure, JoltError> {
    let len = match version {
        PackStreamVersion::V1 => 3,
        PackStreamVersion::V2 => 4,
    };
    let items = graph_list(value, len, "()")?;
    let id = decode_id(&items[0], version, "Node id")?;
    let labels = match &items[1] {
        Json::Array(labels) => labels
            .iter()
            .map(|l| l.as_str().map(Value::from))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| JoltError::value("Node labels must be list of str"))?,
        _ => return Err(JoltError::value("Node labels must be list")),
    };
    let props = decode_properties(&items[2], version, "Node", "Node properties must be dict")?;
    let mut fields = vec![id, Value::List(labels), props];
    if version == PackStreamVersion::V2 {
        fields.push(decode_str(&items[3], "Node element_id")?);
    }
    Ok(Structure::new(marker::NODE, fields))
}

/// Relationships are written `[id, start, type, end, props]` (v2 appends
/// `element_id, start_element_id, end_element_id`). The `<-` sigil swaps
/// start and end.
fn decode_relationship(
    value: &Json,
    version: PackStreamVersion,
    reversed: bool,
) -> Result<Structure, JoltError> {
    let sigil = if reversed { "<-" } else { "->" };
    let (len, order): (usize, &[usize]) = match (version, reversed) {
        (PackStreamVersion::V1, false) => (5, &[0, 1, 2, 3, 4]),
        (PackStreamVersion::V1, true) => (5, &[0, 3, 2, 1, 4]),
        (PackStreamVersion::V2, false) => (8, &[0, 1, 2, 3, 4, 5, 6, 7]),
        (PackStreamVersion::V2, true) => (8, &[0, 3, 2, 1, 4, 5, 7, 6]),
    };
    let raw = graph_list(value, len, sigil)?;
    let items: Vec<&Json> = order.iter().map(|&i| &raw[i]).collect();

    let id = decode_id(items[0], version, "Relationship id")?;
    let start = decode_id(items[1], version, "Relationship's start id")?;
    let rel_type = items[2]
        .as_str()
        .map(Value::from)
        .ok_or_else(|| JoltError::value("Relationship's type id must be str"))?;
    let end = decode_id(items[3], version, "Relationship's end id")?;
    let props = decode_properties(
        items[4],
        version,
        "Relationship",
        "Relationship's properties  must be dict",
    )?;
    let mut fields = vec![id, start, end, rel_type, props];
    if version == PackStreamVersion::V2 {
        fields.push(decode_str(items[5], "Relationship element_id")?);
        fields.push(decode_str(items[6], "Relationship's start element_id")?);
        fields.push(decode_str(items[7], "Relationship's end element_id")?);
    }
    Ok(Structure::new(marker::RELATIONSHIP, fields))
}

/// Alternating nodes and relationships, each relationship connecting its
/// neighbours. Encoded as a Path structure of the distinct nodes, the
/// distinct unbound relationships and the id of every element in order.
fn decode_path(value: &Json, version: PackStreamVersion) -> Result<Structure, JoltError> {
    let Json::Array(items) = value else {
        return Err(JoltError::value(r#"Expecting list after sigil "..""#));
    };
    let elements = items
        .iter()
        .map(|item| match decode(item, version)? {
            Field::Structure(s) => Ok(Some(s)),
            Field::Wildcard(_) => Err(JoltError::WildcardInStructure("Path")),
            _ => Ok(None),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if !elements.is_empty() && elements.len() % 2 != 1 {
        return Err(JoltError::value("Path doesn't have odd number of elements"));
    }

    // Field positions identifying nodes and relationship ends.
    let (node_key, start_key, end_key) = match version {
        PackStreamVersion::V1 => (0, 1, 2),
        PackStreamVersion::V2 => (3, 6, 7),
    };
    let expect = |i: usize, tag: u8, name: &str| -> Result<&Structure, JoltError> {
        match &elements[i] {
            Some(s) if s.tag == tag => Ok(s),
            _ => Err(JoltError::value(format!(
                "Element {} in path was expected to be a {}",
                i, name
            ))),
        }
    };

    let mut nodes: Vec<Value> = Vec::new();
    let mut rels: Vec<Value> = Vec::new();
    let mut ids = Vec::with_capacity(elements.len());
    for i in (0..elements.len()).step_by(2) {
        let node = expect(i, marker::NODE, "Node")?;
        let key = node.fields.get(node_key);
        if i != 0 {
            let prev = expect(i - 1, marker::RELATIONSHIP, "Relationship")?;
            if prev.fields.get(end_key) != key {
                return Err(JoltError::value(format!(
                    "Relationship {} did not point to the following Node in the path",
                    i - 1
                )));
            }
        }
        if i + 1 < elements.len() {
            let next = expect(i + 1, marker::RELATIONSHIP, "Relationship")?;
            if next.fields.get(start_key) != key {
                return Err(JoltError::value(format!(
                    "Relationship {} did not point to the previous Node in the path",
                    i + 1
                )));
            }
        }
    }
    for (i, element) in elements.iter().flatten().enumerate() {
        let id = element.fields.first().cloned().unwrap_or(Value::Null);
        if i % 2 == 0 {
            let node = Value::Structure(element.clone());
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        } else {
            let mut fields = vec![id.clone()];
            // type and properties
            fields.extend(element.fields[3..5].iter().cloned());
            if version == PackStreamVersion::V2 {
                fields.extend(element.fields.get(5).cloned());
            }
            let rel = Value::Structure(Structure::new(marker::UNBOUND_RELATIONSHIP, fields));
            if !rels.contains(&rel) {
                rels.push(rel);
            }
        }
        ids.push(id);
    }
    Ok(Structure::new(
        marker::PATH,
        vec![Value::List(nodes), Value::List(rels), Value::List(ids)],
    ))
}

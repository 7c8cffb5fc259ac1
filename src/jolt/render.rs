//! Rendering of received values as simple Jolt, used when logging messages
//! and in mismatch reports.

use serde_json::{Map, Value as Json};

use super::dumps::dumps;
use super::temporal::{render_point, render_temporal};
use crate::bolt::packstream::{format_float, marker, PackStreamVersion, Structure, Value};

fn sigil(key: &str, value: Json) -> Json {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Json::Object(map)
}

/// Render a value as simple Jolt: plain JSON wherever that is unambiguous,
/// a sigil map otherwise.
pub fn render_simple(value: &Value, version: PackStreamVersion) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) if i32::try_from(*i).is_ok() => Json::from(*i),
        Value::Integer(i) => sigil("Z", Json::String(i.to_string())),
        Value::Float(f) => sigil("R", Json::String(float_text(*f))),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => sigil("#", Json::String(data_encoding::HEXUPPER.encode(b))),
        Value::List(items) => Json::Array(items.iter().map(|v| render_simple(v, version)).collect()),
        Value::Map(map) => sigil("{}", Json::Object(render_map(map, version))),
        Value::Structure(s) => render_structure(s, version),
    }
}

/// Render a value as simple Jolt text.
pub fn dumps_simple(value: &Value, version: PackStreamVersion) -> String {
    dumps(&render_simple(value, version))
}

fn float_text(f: f64) -> String {
    match format_float(f).as_str() {
        "inf" => "+Infinity".to_string(),
        "-inf" => "-Infinity".to_string(),
        "nan" => "NaN".to_string(),
        text => text.to_string(),
    }
}

fn render_map(
    map: &indexmap::IndexMap<String, Value>,
    version: PackStreamVersion,
) -> Map<String, Json> {
    map.iter()
        .map(|(k, v)| (k.clone(), render_simple(v, version)))
        .collect()
}

/// Ids, labels and types of graph elements are printed as they are.
fn raw(value: &Value, version: PackStreamVersion) -> Json {
    match value {
        Value::Integer(i) => Json::from(*i),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(|v| raw(v, version)).collect()),
        Value::Map(map) => Json::Object(render_map(map, version)),
        other => render_simple(other, version),
    }
}

fn render_structure(s: &Structure, version: PackStreamVersion) -> Json {
    let rendered = match s.tag {
        marker::NODE => render_node(s, version),
        marker::RELATIONSHIP => render_relationship(s, version),
        marker::PATH => render_path(s, version),
        marker::POINT_2D | marker::POINT_3D => render_point(s).map(|p| sigil("@", Json::String(p))),
        _ => render_temporal(s).map(|t| sigil("T", Json::String(t))),
    };
    rendered.unwrap_or_else(|| Json::String(s.to_string()))
}

fn render_node(s: &Structure, version: PackStreamVersion) -> Option<Json> {
    let fields = s.fields.iter().map(|f| raw(f, version)).collect();
    Some(sigil("()", Json::Array(fields)))
}

fn render_relationship(s: &Structure, version: PackStreamVersion) -> Option<Json> {
    // [id, start, end, type, props, ...] is written [id, start, type, end, props, ...]
    let order: &[usize] = match version {
        PackStreamVersion::V1 => &[0, 1, 3, 2, 4],
        PackStreamVersion::V2 => &[0, 1, 3, 2, 4, 5, 6, 7],
    };
    let fields = order
        .iter()
        .map(|&i| s.fields.get(i).map(|f| raw(f, version)))
        .collect::<Option<Vec<_>>>()?;
    Some(sigil("->", Json::Array(fields)))
}

fn render_path(s: &Structure, version: PackStreamVersion) -> Option<Json> {
    let [Value::List(nodes), Value::List(rels), Value::List(ids)] = s.fields.as_slice() else {
        return None;
    };
    let find = |items: &[Value], id: &Value| {
        items.iter().find_map(|item| match item {
            Value::Structure(e) if e.fields.first() == Some(id) => Some(e.clone()),
            _ => None,
        })
    };
    let node_at = |i: usize| ids.get(i).and_then(|id| find(nodes, id));

    let mut elements = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        if i % 2 == 0 {
            elements.push(render_node(&node_at(i)?, version)?);
            continue;
        }
        let rel = find(rels, id)?;
        let start = node_at(i - 1)?;
        let end = node_at(i + 1)?;
        let mut fields = vec![
            raw(id, version),
            raw(start.fields.first()?, version),
            raw(rel.fields.get(1)?, version),
            raw(end.fields.first()?, version),
            raw(rel.fields.get(2)?, version),
        ];
        if version == PackStreamVersion::V2 {
            fields.push(raw(rel.fields.get(3)?, version));
            fields.push(raw(start.fields.get(3)?, version));
            fields.push(raw(end.fields.get(3)?, version));
        }
        elements.push(sigil("->", Json::Array(fields)));
    }
    Some(sigil("..", Json::Array(elements)))
}

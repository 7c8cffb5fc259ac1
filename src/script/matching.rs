//! Matching of received message fields against client line fields.
//!
//! - `"*"` matches anything, `"\*"` is a literal asterisk
//! - typed wildcards (`{"Z": "*"}`) match any value of their type
//! - map keys written `"[key]"` are optional
//! - map keys written `"key{}"` compare their lists ignoring order
//! - `\[`, `\]`, `\{`, `\}` and `\\` in keys escape the markers

use std::collections::HashSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::bolt::Value;
use crate::jolt::Field;

static STRING_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\([\\*])").expect("valid string escape regex"));
static KEY_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\([\[\]\\\{\}])").expect("valid key escape regex"));
static OPTIONAL_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[.*\]$").expect("valid optional key regex"));
static UNORDERED_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\[.*\{\}\]|.*\{\})$").expect("valid unordered key regex"));

/// Match a message's fields against a line's fields.
pub fn fields_match(should: &[Field], is: &[Value]) -> bool {
    should.len() == is.len() && should.iter().zip(is).all(|(s, i)| field_match(s, i))
}

/// Match one received value against one expected field.
pub fn field_match(should: &Field, is: &Value) -> bool {
    match (should, is) {
        (Field::String(s), _) if s == "*" => true,
        (Field::Wildcard(wildcard), _) => wildcard.matches(is),
        (Field::Structure(s), Value::Structure(i)) => s == i,
        (_, Value::Structure(_)) => false,
        (Field::Null, Value::Null) => true,
        (Field::Boolean(s), Value::Boolean(i)) => s == i,
        (Field::Integer(s), Value::Integer(i)) => s == i,
        (Field::Float(s), Value::Float(i)) => s == i || (s.is_nan() && i.is_nan()),
        (Field::String(s), Value::String(i)) => STRING_ESCAPE.replace_all(s, "$1") == i.as_str(),
        (Field::Bytes(s), Value::Bytes(i)) => s == i,
        (Field::List(s), Value::List(i)) => fields_match(s, i),
        (Field::Map(s), Value::Map(i)) => map_match(s, i),
        _ => false,
    }
}

/// Drop `front` leading and `back` trailing characters.
fn strip_chars(s: &str, front: usize, back: usize) -> String {
    let count = s.chars().count();
    s.chars()
        .skip(front)
        .take(count.saturating_sub(front + back))
        .collect()
}

fn map_match(should: &IndexMap<String, Field>, is: &IndexMap<String, Value>) -> bool {
    let mut accepted = HashSet::new();
    for (raw_key, should_value) in should {
        let mut key = KEY_ESCAPE.replace_all(raw_key, "$1").into_owned();
        let optional = OPTIONAL_KEY.is_match(raw_key);
        if optional {
            key = strip_chars(&key, 1, 1);
        }
        let unordered = UNORDERED_KEY.is_match(raw_key);
        if unordered {
            key = strip_chars(&key, 0, 2);
        }
        match is.get(&key) {
            Some(is_value) => {
                let matched = match (unordered, should_value, is_value) {
                    (true, Field::List(s), Value::List(i)) => unordered_match(s, i),
                    _ => field_match(should_value, is_value),
                };
                if !matched {
                    return false;
                }
            }
            None if !optional => return false,
            None => {}
        }
        accepted.insert(key);
    }
    is.keys().all(|k| accepted.contains(k))
}

/// Match two lists as multisets.
fn unordered_match(should: &[Field], is: &[Value]) -> bool {
    if should.len() != is.len() {
        return false;
    }
    let mut used = vec![false; is.len()];
    should.iter().all(|s| {
        let found = is
            .iter()
            .enumerate()
            .find(|(i, value)| !used[*i] && field_match(s, value))
            .map(|(i, _)| i);
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

//! PackStream serialization format.
//!
//! PackStream is the binary serialization format used by the Bolt protocol
//! to encode values for transmission between client and server.
//!
//! # Supported Types
//!
//! - **Null**: Single byte marker
//! - **Boolean**: True/False markers
//! - **Integer**: Smallest of tiny, 8, 16, 32 and 64 bit encodings
//! - **Float**: 64-bit IEEE 754
//! - **String**: UTF-8 encoded, variable length prefix
//! - **Bytes**: Raw bytes, variable length prefix
//! - **List**: Sized or streamed (terminated by `0xDF`)
//! - **Map**: String keys to arbitrary values, sized or streamed
//! - **Structure**: Tagged structures with up to 15 fields
//!
//! Structures received inside a message are checked against the layout of
//! the well-known graph, temporal and spatial types, see [`Structure::verify`].

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod structures;
pub mod types;

pub use decoder::{decode, PackStreamDecoder};
pub use encoder::{encode, PackStreamEncoder};
pub use types::{format_float, PackStreamVersion, Structure, Value};

use std::fmt;

/// PackStream errors.
#[derive(Debug, Clone)]
pub enum PackStreamError {
    /// Unexpected end of input
    UnexpectedEof,
    /// Unknown marker byte
    UnknownMarker(u8),
    /// A structure marker was required
    ExpectedStructure(u8),
    /// Invalid UTF-8 in string
    InvalidUtf8(String),
    /// Invalid map key (must be string)
    InvalidMapKey,
    /// Value too large to encode
    ValueTooLarge(&'static str, usize),
    /// Structure fields do not match the layout of its tag
    InvalidStructure(String),
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => write!(f, "Unknown PackStream marker {:02X}", m),
            PackStreamError::ExpectedStructure(m) => {
                write!(f, "Expected structure, found marker {:02X}", m)
            }
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey => write!(f, "Map keys must be strings"),
            PackStreamError::ValueTooLarge(t, s) => write!(f, "{} too large: {}", t, s),
            PackStreamError::InvalidStructure(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for PackStreamError {}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn roundtrip(value: Value) {
        let bytes = encode(&value).unwrap();
        let decoded = decode(&bytes, PackStreamVersion::V2).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_roundtrip_mixed_list() {
        roundtrip(Value::List(vec![
            Value::Integer(1),
            Value::String("two".into()),
            Value::Boolean(true),
            Value::Null,
            Value::Float(-0.5),
            Value::Bytes(vec![0xFF]),
        ]));
    }

    #[test]
    fn test_roundtrip_v2_node() {
        let mut props = IndexMap::new();
        props.insert("name".to_string(), Value::from("Alice"));
        roundtrip(Value::Structure(Structure::new(
            marker::NODE,
            vec![
                1.into(),
                Value::List(vec!["Person".into()]),
                Value::Map(props),
                "4:abc:1".into(),
            ],
        )));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            PackStreamError::UnknownMarker(0xE0).to_string(),
            "Unknown PackStream marker E0"
        );
        assert_eq!(
            PackStreamError::InvalidStructure("Invalid Date struct received x".into()).to_string(),
            "Invalid Date struct received x"
        );
    }
}

//! PackStream decoder.

use bytes::Buf;
use indexmap::IndexMap;

use super::marker::*;
use super::types::{PackStreamVersion, Structure, Value};
use super::PackStreamError;

/// A decoded item: either a value or the end marker of a stream container.
enum Item {
    Value(Value),
    EndOfStream,
}

/// PackStream decoder that reads values from a byte buffer.
///
/// Every structure nested inside a decoded value is verified against the
/// layout rules of the decoder's PackStream version.
pub struct PackStreamDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    version: PackStreamVersion,
}

impl<'a> PackStreamDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8], version: PackStreamVersion) -> Self {
        Self {
            data,
            pos: 0,
            version,
        }
    }

    /// Get the current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get remaining bytes count.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Decode a message: a structure whose own tag is not validated, while
    /// its fields are.
    pub fn decode_message(&mut self) -> Result<Structure, PackStreamError> {
        let marker = self.read_u8()?;
        if high_nibble(marker) != TINY_STRUCT {
            return Err(PackStreamError::ExpectedStructure(marker));
        }
        self.read_struct(tiny_size(marker))
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> Result<Value, PackStreamError> {
        match self.decode_item()? {
            Item::Value(value) => Ok(value),
            Item::EndOfStream => Err(PackStreamError::UnknownMarker(END_OF_STREAM)),
        }
    }

    fn decode_item(&mut self) -> Result<Item, PackStreamError> {
        let marker = self.read_u8()?;

        if is_tiny_int(marker) {
            return Ok(Item::Value(Value::Integer(marker as i8 as i64)));
        }

        let value = match high_nibble(marker) {
            TINY_STRING => self.read_string(tiny_size(marker))?,
            TINY_LIST => self.read_list(tiny_size(marker))?,
            TINY_MAP => self.read_map(tiny_size(marker))?,
            TINY_STRUCT => {
                let s = self.read_struct(tiny_size(marker))?;
                s.verify(self.version)?;
                Value::Structure(s)
            }
            _ => match marker {
                NULL => Value::Null,
                TRUE => Value::Boolean(true),
                FALSE => Value::Boolean(false),
                FLOAT_64 => Value::Float(self.take(8)?.get_f64()),

                INT_8 => Value::Integer(self.read_u8()? as i8 as i64),
                INT_16 => Value::Integer(self.take(2)?.get_i16() as i64),
                INT_32 => Value::Integer(self.take(4)?.get_i32() as i64),
                INT_64 => Value::Integer(self.take(8)?.get_i64()),

                BYTES_8 | BYTES_16 | BYTES_32 => {
                    let len = self.read_len(marker - BYTES_8)?;
                    Value::Bytes(self.take(len)?.to_vec())
                }
                STRING_8 | STRING_16 | STRING_32 => {
                    let len = self.read_len(marker - STRING_8)?;
                    self.read_string(len)?
                }
                LIST_8 | LIST_16 | LIST_32 => {
                    let len = self.read_len(marker - LIST_8)?;
                    self.read_list(len)?
                }
                MAP_8 | MAP_16 | MAP_32 => {
                    let len = self.read_len(marker - MAP_8)?;
                    self.read_map(len)?
                }
                LIST_STREAM => {
                    let mut items = Vec::new();
                    while let Item::Value(item) = self.decode_item()? {
                        items.push(item);
                    }
                    Value::List(items)
                }
                MAP_STREAM => {
                    let mut map = IndexMap::new();
                    while let Item::Value(key) = self.decode_item()? {
                        let key = into_key(key)?;
                        map.insert(key, self.decode()?);
                    }
                    Value::Map(map)
                }
                END_OF_STREAM => return Ok(Item::EndOfStream),
                _ => return Err(PackStreamError::UnknownMarker(marker)),
            },
        };
        Ok(Item::Value(value))
    }

    /// Read an 8, 16 or 32 bit length, selected by 0, 1 or 2.
    fn read_len(&mut self, width: u8) -> Result<usize, PackStreamError> {
        Ok(match width {
            0 => self.read_u8()? as usize,
            1 => self.take(2)?.get_u16() as usize,
            _ => self.take(4)?.get_u32() as usize,
        })
    }

    fn read_string(&mut self, len: usize) -> Result<Value, PackStreamError> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))?;
        Ok(Value::String(s.to_string()))
    }

    fn read_list(&mut self, len: usize) -> Result<Value, PackStreamError> {
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::List(items))
    }

    fn read_map(&mut self, len: usize) -> Result<Value, PackStreamError> {
        let mut map = IndexMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = into_key(self.decode()?)?;
            let value = self.decode()?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    fn read_struct(&mut self, field_count: usize) -> Result<Structure, PackStreamError> {
        let tag = self.read_u8()?;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(self.decode()?);
        }
        Ok(Structure::new(tag, fields))
    }

    fn read_u8(&mut self) -> Result<u8, PackStreamError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PackStreamError> {
        if self.remaining() < len {
            return Err(PackStreamError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

fn into_key(key: Value) -> Result<String, PackStreamError> {
    match key {
        Value::String(s) => Ok(s),
        _ => Err(PackStreamError::InvalidMapKey),
    }
}

/// Convenience function to decode a single value from bytes.
pub fn decode(data: &[u8], version: PackStreamVersion) -> Result<Value, PackStreamError> {
    PackStreamDecoder::new(data, version).decode()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1(data: &[u8]) -> Result<Value, PackStreamError> {
        decode(data, PackStreamVersion::V1)
    }

    #[test]
    fn test_decode_tiny_int() {
        assert_eq!(v1(&[0x00]).unwrap(), Value::Integer(0));
        assert_eq!(v1(&[0x7F]).unwrap(), Value::Integer(127));
        assert_eq!(v1(&[0xF0]).unwrap(), Value::Integer(-16));
        assert_eq!(v1(&[0xFF]).unwrap(), Value::Integer(-1));
    }

    #[test]
    fn test_decode_sized_ints() {
        assert_eq!(v1(&[0xC8, 0xEF]).unwrap(), Value::Integer(-17));
        assert_eq!(v1(&[0xC9, 0x03, 0xE8]).unwrap(), Value::Integer(1000));
        assert_eq!(
            v1(&[0xCA, 0x00, 0x01, 0x86, 0xA0]).unwrap(),
            Value::Integer(100000)
        );
        let data = [0xCB, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(v1(&data).unwrap(), Value::Integer(i64::MAX));
    }

    #[test]
    fn test_decode_float_and_scalars() {
        let data = [0xC1, 0x3F, 0xF0, 0, 0, 0, 0, 0, 0];
        assert_eq!(v1(&data).unwrap(), Value::Float(1.0));
        assert!(v1(&[0xC0]).unwrap().is_null());
        assert_eq!(v1(&[0xC3]).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_decode_strings_and_bytes() {
        assert_eq!(v1(b"\x85hello").unwrap(), Value::from("hello"));
        let mut data = vec![0xD0, 20];
        data.extend_from_slice(&[b'a'; 20]);
        assert_eq!(v1(&data).unwrap(), Value::String("a".repeat(20)));
        assert_eq!(v1(&[0xCC, 0x02, 1, 2]).unwrap(), Value::Bytes(vec![1, 2]));
    }

    #[test]
    fn test_decode_streams() {
        let list = [0xD7, 0x01, 0x02, 0xDF];
        assert_eq!(v1(&list).unwrap(), Value::List(vec![1.into(), 2.into()]));

        let map = [0xDB, 0x81, b'a', 0x01, 0xDF];
        let Value::Map(m) = v1(&map).unwrap() else {
            panic!("Expected map");
        };
        assert_eq!(m.get("a"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_decode_map_preserves_order() {
        let data = [0xA2, 0x81, b'b', 0x01, 0x81, b'a', 0x02];
        let Value::Map(m) = v1(&data).unwrap() else {
            panic!("Expected map");
        };
        let keys: Vec<_> = m.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(v1(&[0xC9]), Err(PackStreamError::UnexpectedEof)));
        assert!(matches!(
            v1(&[0x82, 0xFF, 0xFE]),
            Err(PackStreamError::InvalidUtf8(_))
        ));
        assert!(matches!(
            v1(&[0xA1, 0x01, 0x01]),
            Err(PackStreamError::InvalidMapKey)
        ));
        // Large structure markers are not supported.
        assert!(matches!(
            v1(&[0xDC, 0x01, 0x01]),
            Err(PackStreamError::UnknownMarker(0xDC))
        ));
        assert!(matches!(
            v1(&[0xDF]),
            Err(PackStreamError::UnknownMarker(0xDF))
        ));
    }

    #[test]
    fn test_decode_message_verifies_nested_structures_only() {
        // Top level RECORD(0x71) with a single field holding an invalid Date.
        let data = [0xB1, 0x71, 0x91, 0xB1, 0x44, 0x81, b'x'];
        let err = PackStreamDecoder::new(&data, PackStreamVersion::V1)
            .decode_message()
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid Date struct received"));

        // The message structure itself may carry anything.
        let data = [0xB1, 0x44, 0x81, b'x'];
        let msg = PackStreamDecoder::new(&data, PackStreamVersion::V1)
            .decode_message()
            .unwrap();
        assert_eq!(msg.tag, 0x44);
    }

    #[test]
    fn test_decode_message_requires_structure() {
        let err = PackStreamDecoder::new(&[0x01], PackStreamVersion::V1)
            .decode_message()
            .unwrap_err();
        assert!(matches!(err, PackStreamError::ExpectedStructure(0x01)));
    }

    #[test]
    fn test_decoder_position() {
        let data = [0x01, 0x02, 0x03];
        let mut decoder = PackStreamDecoder::new(&data, PackStreamVersion::V2);
        decoder.decode().unwrap();
        assert_eq!(decoder.position(), 1);
        assert_eq!(decoder.remaining(), 2);
    }
}

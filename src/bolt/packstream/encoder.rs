//! PackStream encoder.

use bytes::{BufMut, BytesMut};
use indexmap::IndexMap;

use super::marker::*;
use super::types::{Structure, Value};
use super::PackStreamError;

/// PackStream encoder that writes values to a byte buffer.
pub struct PackStreamEncoder {
    buffer: BytesMut,
}

impl PackStreamEncoder {
    /// Create a new encoder with default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new encoder with specified buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the encoder and return the bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buffer
    }

    /// Get the bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> Result<(), PackStreamError> {
        match value {
            Value::Null => {
                self.buffer.put_u8(NULL);
                Ok(())
            }
            Value::Boolean(b) => {
                self.buffer.put_u8(if *b { TRUE } else { FALSE });
                Ok(())
            }
            Value::Integer(i) => {
                self.encode_int(*i);
                Ok(())
            }
            Value::Float(f) => {
                self.buffer.put_u8(FLOAT_64);
                self.buffer.put_f64(*f);
                Ok(())
            }
            Value::Bytes(b) => self.encode_bytes(b),
            Value::String(s) => self.encode_string(s),
            Value::List(l) => self.encode_list(l),
            Value::Map(m) => self.encode_map(m),
            Value::Structure(s) => self.encode_structure(s),
        }
    }

    /// Encode an integer using the smallest representation.
    pub fn encode_int(&mut self, value: i64) {
        if fits_tiny_int(value) {
            self.buffer.put_u8(value as u8);
        } else if i8::try_from(value).is_ok() {
            self.buffer.put_u8(INT_8);
            self.buffer.put_i8(value as i8);
        } else if i16::try_from(value).is_ok() {
            self.buffer.put_u8(INT_16);
            self.buffer.put_i16(value as i16);
        } else if i32::try_from(value).is_ok() {
            self.buffer.put_u8(INT_32);
            self.buffer.put_i32(value as i32);
        } else {
            self.buffer.put_u8(INT_64);
            self.buffer.put_i64(value);
        }
    }

    /// Encode a byte array. There is no tiny form for bytes.
    pub fn encode_bytes(&mut self, value: &[u8]) -> Result<(), PackStreamError> {
        let len = value.len();
        if len <= u8::MAX as usize {
            self.buffer.put_u8(BYTES_8);
            self.buffer.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buffer.put_u8(BYTES_16);
            self.buffer.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buffer.put_u8(BYTES_32);
            self.buffer.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge("bytes", len));
        }
        self.buffer.put_slice(value);
        Ok(())
    }

    /// Encode a string.
    pub fn encode_string(&mut self, value: &str) -> Result<(), PackStreamError> {
        let bytes = value.as_bytes();
        self.encode_header(
            bytes.len(),
            "string",
            [TINY_STRING, STRING_8, STRING_16, STRING_32],
        )?;
        self.buffer.put_slice(bytes);
        Ok(())
    }

    /// Encode a list.
    pub fn encode_list(&mut self, values: &[Value]) -> Result<(), PackStreamError> {
        self.encode_header(values.len(), "list", [TINY_LIST, LIST_8, LIST_16, LIST_32])?;
        for value in values {
            self.encode(value)?;
        }
        Ok(())
    }

    /// Encode a map, preserving entry order.
    pub fn encode_map(&mut self, map: &IndexMap<String, Value>) -> Result<(), PackStreamError> {
        self.encode_header(map.len(), "map", [TINY_MAP, MAP_8, MAP_16, MAP_32])?;
        for (key, value) in map {
            self.encode_string(key)?;
            self.encode(value)?;
        }
        Ok(())
    }

    /// Encode a structure. Only the tiny form (up to 15 fields) exists.
    pub fn encode_structure(&mut self, s: &Structure) -> Result<(), PackStreamError> {
        let len = s.fields.len();
        if len > TINY_MAX_LEN {
            return Err(PackStreamError::ValueTooLarge("structure fields", len));
        }
        self.buffer.put_u8(TINY_STRUCT + len as u8);
        self.buffer.put_u8(s.tag);
        for field in &s.fields {
            self.encode(field)?;
        }
        Ok(())
    }

    fn encode_header(
        &mut self,
        len: usize,
        what: &'static str,
        [tiny, m8, m16, m32]: [u8; 4],
    ) -> Result<(), PackStreamError> {
        if len <= TINY_MAX_LEN {
            self.buffer.put_u8(tiny + len as u8);
        } else if len <= u8::MAX as usize {
            self.buffer.put_u8(m8);
            self.buffer.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buffer.put_u8(m16);
            self.buffer.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buffer.put_u8(m32);
            self.buffer.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge(what, len));
        }
        Ok(())
    }
}

impl Default for PackStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single value.
pub fn encode(value: &Value) -> Result<BytesMut, PackStreamError> {
    let mut encoder = PackStreamEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

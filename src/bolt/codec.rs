//! Bolt chunked message framing for tokio_util.
//!
//! A message is packed and split into chunks with a 2-byte big-endian length
//! prefix, terminated by an empty chunk (`00 00`). Empty messages between
//! messages are NOOP keep-alives and are skipped.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::packstream::{PackStreamDecoder, PackStreamEncoder, PackStreamVersion, Structure};
use super::BoltError;

/// Maximum chunk size
pub const MAX_CHUNK_SIZE: usize = 0xFFFF;

/// End of message marker (0x00 0x00), also sent alone as a NOOP
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

/// Bolt message codec for framing.
#[derive(Debug)]
pub struct BoltCodec {
    /// PackStream version used to validate nested structures
    version: PackStreamVersion,
    /// Maximum message size
    max_message_size: usize,
    /// Buffer for accumulating chunks
    message_buffer: BytesMut,
}

impl BoltCodec {
    /// Create a new codec for the given PackStream version.
    pub fn new(version: PackStreamVersion) -> Self {
        Self::with_max_size(version, 64 * 1024 * 1024)
    }

    /// Create a codec with custom max message size.
    pub fn with_max_size(version: PackStreamVersion, max_message_size: usize) -> Self {
        Self {
            version,
            max_message_size,
            message_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Number of bytes `src` must hold before the next chunk header or
    /// chunk body can be consumed.
    ///
    /// Used to report how far a read got when the peer hangs up mid-message.
    pub fn wanted(&self, src: &[u8]) -> usize {
        if src.len() < 2 {
            2
        } else {
            2 + u16::from_be_bytes([src[0], src[1]]) as usize
        }
    }

    /// Whether part of a message has been received already.
    pub fn in_message(&self) -> bool {
        !self.message_buffer.is_empty()
    }
}

/// Split packed message data into chunks and append the end marker.
pub fn encode_chunked(data: &[u8], dst: &mut BytesMut) {
    dst.reserve(data.len() + 2 * (data.len() / MAX_CHUNK_SIZE + 2));
    let mut rest = data;
    while rest.len() > MAX_CHUNK_SIZE {
        let (chunk, tail) = rest.split_at(MAX_CHUNK_SIZE);
        dst.put_u16(MAX_CHUNK_SIZE as u16);
        dst.put_slice(chunk);
        rest = tail;
    }
    dst.put_u16(rest.len() as u16);
    dst.put_slice(rest);
    dst.put_slice(&END_MARKER);
}

impl Decoder for BoltCodec {
    type Item = Structure;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(2);

                if self.message_buffer.is_empty() {
                    // NOOP
                    continue;
                }

                let message_data = self.message_buffer.split();
                let message =
                    PackStreamDecoder::new(&message_data, self.version).decode_message()?;
                return Ok(Some(message));
            }

            if src.len() < 2 + chunk_size {
                return Ok(None);
            }

            if self.message_buffer.len() + chunk_size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: self.message_buffer.len() + chunk_size,
                    max: self.max_message_size,
                });
            }

            src.advance(2);
            self.message_buffer.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
        }
    }
}

impl Encoder<&Structure> for BoltCodec {
    type Error = BoltError;

    fn encode(&mut self, item: &Structure, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut packer = PackStreamEncoder::new();
        packer.encode_structure(item)?;
        encode_chunked(packer.as_bytes(), dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::packstream::Value;
    use indexmap::IndexMap;

    fn success() -> Structure {
        Structure::new(0x70, vec![Value::Map(IndexMap::new())])
    }

    fn codec() -> BoltCodec {
        BoltCodec::new(PackStreamVersion::V1)
    }

    #[test]
    fn test_encode_decode_structure() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        codec.encode(&success(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x00, 0x03, 0xB1, 0x70, 0xA0, 0x00, 0x00]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, success());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunked_large_message() {
        let mut codec = codec();
        let mut buf = BytesMut::new();

        let large = "x".repeat(MAX_CHUNK_SIZE * 2 + 100);
        let msg = Structure::new(0x10, vec![Value::String(large.clone())]);
        codec.encode(&msg, &mut buf).unwrap();

        // First two chunks are full.
        assert_eq!(&buf[..2], &[0xFF, 0xFF]);
        assert_eq!(&buf[2 + MAX_CHUNK_SIZE..4 + MAX_CHUNK_SIZE], &[0xFF, 0xFF]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.fields[0].as_str(), Some(large.as_str()));
    }

    #[test]
    fn test_exact_chunk_size_has_no_extra_chunk() {
        let mut buf = BytesMut::new();
        encode_chunked(&vec![0u8; MAX_CHUNK_SIZE], &mut buf);
        assert_eq!(buf.len(), 2 + MAX_CHUNK_SIZE + 2);
        assert_eq!(&buf[buf.len() - 2..], &END_MARKER);
    }

    #[test]
    fn test_partial_chunk() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        codec.encode(&success(), &mut buf).unwrap();
        let full = buf.clone();

        let mut partial = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(codec.wanted(&partial), 5);

        let mut complete = full;
        assert!(codec.decode(&mut complete).unwrap().is_some());
    }

    #[test]
    fn test_split_chunks_reassemble() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        // SUCCESS {} split over two chunks.
        buf.put_slice(&[0x00, 0x01, 0xB1, 0x00, 0x02, 0x70, 0xA0, 0x00, 0x00]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), success());
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = BoltCodec::with_max_size(PackStreamVersion::V1, 100);
        let mut buf = BytesMut::new();
        buf.put_u16(200);
        buf.extend_from_slice(&[0u8; 200]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(BoltError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_noop_skipped() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        buf.put_slice(&END_MARKER);
        buf.put_slice(&END_MARKER);
        codec.encode(&success(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), success());
        assert!(!codec.in_message());
    }

    #[test]
    fn test_multiple_messages() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        for tag in [0x0F, 0x02, 0x3F] {
            codec.encode(&Structure::new(tag, vec![]), &mut buf).unwrap();
        }

        for tag in [0x0F, 0x02, 0x3F] {
            assert_eq!(codec.decode(&mut buf).unwrap().unwrap().tag, tag);
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}

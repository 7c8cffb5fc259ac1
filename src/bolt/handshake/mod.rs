//! Bolt protocol handshake implementation.
//!
//! The Bolt handshake consists of:
//! 1. Client sends 4-byte magic number (0x6060B017)
//! 2. Client sends 4 x 4-byte version slots `[reserved, range, minor, major]`
//! 3. Server responds with 4-byte agreed version `00 00 minor major`, or
//!    `00 00 00 00` if none
//!
//! Bolt 5.7 moves on to handshake version 2, where the server answers with a
//! list of offers and the client confirms its pick.

mod negotiation;
mod version;

pub use negotiation::{build_client_handshake, Handshake, SlotMask, V2_OFFER};
pub use version::{version_tuple, BoltVersion};

pub use super::error::HandshakeError;
use super::hex_repr;

/// Bolt protocol magic number: 0x6060B017
/// This identifies a Bolt connection.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the version slots following the magic
pub const SLOTS_SIZE: usize = 16;

/// Size of server response (negotiated version)
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

/// Response sent when no version could be agreed on
pub const NO_VERSION: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Check the 4 magic bytes a connection starts with.
pub fn check_magic(received: &[u8]) -> Result<(), HandshakeError> {
    if received == BOLT_MAGIC {
        Ok(())
    } else {
        Err(HandshakeError::InvalidMagic {
            received: hex_repr(received),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic() {
        assert!(check_magic(&[0x60, 0x60, 0xB0, 0x17]).is_ok());
        let err = check_magic(b"GET ").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected the magic header 6060B017, received 47 45 54 20"
        );
    }

    #[test]
    fn test_build_client_handshake() {
        let data = build_client_handshake(&[[0, 0, 4, 4], [0, 0, 3, 4]]);
        assert_eq!(&data[0..4], &BOLT_MAGIC);
        assert_eq!(&data[4..8], &[0, 0, 4, 4]);
        assert_eq!(&data[8..12], &[0, 0, 3, 4]);
        assert_eq!(&data[12..20], &[0; 8]);
    }
}

//! Bolt protocol error types.

use std::fmt;
use std::io;

use super::handshake::BoltVersion;
use super::packstream::PackStreamError;

/// Result type for Bolt operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Bolt protocol errors.
#[derive(Debug)]
pub enum BoltError {
    /// I/O error
    Io(io::Error),

    /// Handshake error
    Handshake(HandshakeError),

    /// PackStream serialization error
    PackStream(PackStreamError),

    /// Message too large
    MessageTooLarge { size: usize, max: usize },

    /// A received message tag is not part of the version's vocabulary
    UnknownMessage { tag: u8, version: BoltVersion },

    /// A script names a message the version does not know
    UnsupportedMessage {
        /// "client" or "server"
        side: &'static str,
        /// Message name as written
        name: String,
        /// Declared protocol version
        version: BoltVersion,
        /// Names the version knows for this side
        allowed: Vec<&'static str>,
    },
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::Handshake(e) => write!(f, "{}", e),
            BoltError::PackStream(e) => write!(f, "{}", e),
            BoltError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            BoltError::UnknownMessage { tag, version } => write!(
                f,
                "Unknown response message type {:02X} in Bolt version {}",
                tag, version
            ),
            BoltError::UnsupportedMessage {
                side,
                name,
                version,
                allowed,
            } => {
                let names: Vec<String> = allowed.iter().map(|n| format!("'{}'", n)).collect();
                write!(
                    f,
                    "Unsupported {} message {} for BOLT version {}. Must be one of [{}]",
                    side,
                    name,
                    version.tuple(),
                    names.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::Handshake(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        BoltError::Io(err)
    }
}

impl From<HandshakeError> for BoltError {
    fn from(err: HandshakeError) -> Self {
        BoltError::Handshake(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        BoltError::PackStream(err)
    }
}

/// Handshake-specific errors.
///
/// Byte sequences are kept in their space separated hex rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The connection did not start with the Bolt magic
    InvalidMagic { received: String },

    /// None of the requested versions is served
    NoCompatibleVersion { supported: BoltVersion, request: String },

    /// A handshake version 2 server was not offered handshake version 2
    MissingV2Offer { request: String },

    /// The client confirmed another version than the one offered
    VersionPickMismatch { picked: String, offered: String },

    /// The client confirmed other feature flags than the ones offered
    FeaturePickMismatch { picked: String, offered: String },
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidMagic { received } => {
                write!(f, "Expected the magic header 6060B017, received {}", received)
            }
            HandshakeError::NoCompatibleVersion { supported, request } => write!(
                f,
                "Failed handshake, stub server talks protocol {}. Driver sent handshake: {}",
                supported.tuple(),
                request
            ),
            HandshakeError::MissingV2Offer { request } => write!(
                f,
                "Failed handshake, expected handshake version 2 offer (00 00 01 FF) received {}",
                request
            ),
            HandshakeError::VersionPickMismatch { picked, offered } => write!(
                f,
                "Failed handshake, client picked different version {} than offered {}",
                picked, offered
            ),
            HandshakeError::FeaturePickMismatch { picked, offered } => write!(
                f,
                "Failed handshake, client picked different features ({}) than offered ({})",
                picked, offered
            ),
        }
    }
}

impl std::error::Error for HandshakeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_message_display() {
        let err = BoltError::UnknownMessage {
            tag: 0x7A,
            version: BoltVersion::new(4, 4),
        };
        assert_eq!(
            err.to_string(),
            "Unknown response message type 7A in Bolt version 4.4"
        );
    }

    #[test]
    fn test_unsupported_message_display() {
        let err = BoltError::UnsupportedMessage {
            side: "client",
            name: "FOO".into(),
            version: BoltVersion::new(4, 4),
            allowed: vec!["HELLO", "GOODBYE"],
        };
        assert_eq!(
            err.to_string(),
            "Unsupported client message FOO for BOLT version (4, 4). \
             Must be one of ['HELLO', 'GOODBYE']"
        );
    }

    #[test]
    fn test_bolt_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let bolt_err: BoltError = io_err.into();
        assert!(matches!(bolt_err, BoltError::Io(_)));
    }

    #[test]
    fn test_bolt_error_from_handshake() {
        let hs_err = HandshakeError::MissingV2Offer {
            request: "00".into(),
        };
        let bolt_err: BoltError = hs_err.into();
        assert!(matches!(bolt_err, BoltError::Handshake(_)));
    }
}

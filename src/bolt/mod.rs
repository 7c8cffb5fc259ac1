//! # Bolt Protocol Implementation
//!
//! Server side of the Bolt protocol as needed by the stub server.
//!
//! ## Overview
//!
//! The Bolt protocol is a binary protocol used for communication between
//! clients and graph database servers. This module provides:
//!
//! - **PackStream** - Binary serialization format for all data types
//! - **Handshake** - Protocol version negotiation
//! - **Codec** - Chunked message framing for Tokio
//! - **Protocol** - Per-version message vocabularies and auto responses
//!
//! ## Submodules
//!
//! - [`packstream`] - Binary serialization/deserialization
//! - [`handshake`] - Version negotiation
//! - [`codec`] - Tokio codec for async I/O
//! - [`protocol`] - Version table, message translation
//! - [`error`] - Protocol error types

pub mod codec;
pub mod error;
pub mod handshake;
pub mod packstream;
pub mod protocol;

pub use codec::BoltCodec;
pub use error::{BoltError, BoltResult, HandshakeError};
pub use handshake::{BoltVersion, Handshake, BOLT_MAGIC, HANDSHAKE_RESPONSE_SIZE};
pub use packstream::{PackStreamError, PackStreamVersion, Structure, Value};
pub use protocol::{BoltProtocol, TranslatedStructure};

/// Render bytes the way the stub logs them: upper case hex, space separated.
pub fn hex_repr(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

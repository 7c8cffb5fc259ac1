//! Per-version Bolt message vocabularies.
//!
//! Every supported protocol version knows which client and server messages
//! exist (tag to name), how to decode handshake version slots, which server
//! agent it impersonates and how to auto-respond to a client message.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::handshake::{BoltVersion, Handshake, SlotMask};
use super::packstream::{PackStreamVersion, Structure, Value};
use super::{hex_repr, BoltError, BoltResult};
use crate::jolt;

/// SUCCESS message tag
pub const SUCCESS: u8 = 0x70;
/// RECORD message tag
pub const RECORD: u8 = 0x71;
/// IGNORED message tag
pub const IGNORED: u8 = 0x7E;
/// FAILURE message tag
pub const FAILURE: u8 = 0x7F;

const HELLO_TAG: u8 = 0x01;

const SERVER_MESSAGES: &[(u8, &str)] = &[
    (SUCCESS, "SUCCESS"),
    (RECORD, "RECORD"),
    (IGNORED, "IGNORED"),
    (FAILURE, "FAILURE"),
];

const BOLT1_MESSAGES: &[(u8, &str)] = &[
    (0x01, "INIT"),
    (0x0E, "ACK_FAILURE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x2F, "DISCARD_ALL"),
    (0x3F, "PULL_ALL"),
];

const BOLT3_MESSAGES: &[(u8, &str)] = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD_ALL"),
    (0x3F, "PULL_ALL"),
];

const BOLT4_MESSAGES: &[(u8, &str)] = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD"),
    (0x3F, "PULL"),
];

const BOLT43_MESSAGES: &[(u8, &str)] = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD"),
    (0x3F, "PULL"),
    (0x66, "ROUTE"),
];

const BOLT51_MESSAGES: &[(u8, &str)] = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD"),
    (0x3F, "PULL"),
    (0x66, "ROUTE"),
    (0x6A, "LOGON"),
    (0x6B, "LOGOFF"),
];

const BOLT54_MESSAGES: &[(u8, &str)] = &[
    (0x01, "HELLO"),
    (0x02, "GOODBYE"),
    (0x0F, "RESET"),
    (0x10, "RUN"),
    (0x11, "BEGIN"),
    (0x12, "COMMIT"),
    (0x13, "ROLLBACK"),
    (0x2F, "DISCARD"),
    (0x3F, "PULL"),
    (0x54, "TELEMETRY"),
    (0x66, "ROUTE"),
    (0x6A, "LOGON"),
    (0x6B, "LOGOFF"),
];

/// Metadata of the SUCCESS sent in reply to HELLO/INIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HelloReply {
    /// `{server}`
    Agent,
    /// `{connection_id, server}`
    ConnectionId,
    /// `{connection_id, server, routing: null}`
    Routing,
    /// `{connection_id, server, routing: null, protocol_version}`
    ProtocolVersion,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

fn next_connection_id() -> String {
    format!("bolt-{}", NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// One supported Bolt protocol version.
#[derive(Debug)]
pub struct BoltProtocol {
    /// Declared version
    pub version: BoltVersion,
    aliases: &'static [&'static [u32]],
    equivalent_versions: &'static [BoltVersion],
    /// PackStream revision spoken by this version
    pub packstream_version: PackStreamVersion,
    /// Handshake generation (1, or 2 from Bolt 5.7)
    pub handshake_version: u8,
    mask: SlotMask,
    client_messages: &'static [(u8, &'static str)],
    /// Agent string reported in HELLO replies
    pub server_agent: &'static str,
    hello_reply: HelloReply,
    features: &'static [u8],
}

const fn protocol(
    major: u8,
    minor: u8,
    aliases: &'static [&'static [u32]],
    client_messages: &'static [(u8, &'static str)],
    server_agent: &'static str,
) -> BoltProtocol {
    let mask = if major < 4 {
        SlotMask::MajorOnly
    } else if major == 4 && minor < 2 {
        SlotMask::NoRange
    } else {
        SlotMask::Full
    };
    let hello_reply = if major < 3 {
        HelloReply::Agent
    } else if major == 3 || (major == 4 && minor == 0) {
        HelloReply::ConnectionId
    } else {
        HelloReply::Routing
    };
    BoltProtocol {
        version: BoltVersion::new(major, minor),
        aliases,
        equivalent_versions: &[],
        packstream_version: if major >= 5 {
            PackStreamVersion::V2
        } else {
            PackStreamVersion::V1
        },
        handshake_version: 1,
        mask,
        client_messages,
        server_agent,
        hello_reply,
        features: &[],
    }
}

static PROTOCOLS: [BoltProtocol; 16] = [
    protocol(1, 0, &[&[1], &[3, 0], &[3, 1], &[3, 2], &[3, 3]], BOLT1_MESSAGES, "Neo4j/3.3.0"),
    protocol(2, 0, &[&[2], &[3, 4]], BOLT1_MESSAGES, "Neo4j/3.4.0"),
    protocol(3, 0, &[&[3], &[3, 5], &[3, 6]], BOLT3_MESSAGES, "Neo4j/3.5.0"),
    protocol(4, 0, &[&[4]], BOLT4_MESSAGES, "Neo4j/4.0.0"),
    protocol(4, 1, &[], BOLT4_MESSAGES, "Neo4j/4.1.0"),
    BoltProtocol {
        equivalent_versions: &[BoltVersion::new(4, 1)],
        ..protocol(4, 2, &[], BOLT4_MESSAGES, "Neo4j/4.2.0")
    },
    protocol(4, 3, &[], BOLT43_MESSAGES, "Neo4j/4.3.0"),
    protocol(4, 4, &[], BOLT43_MESSAGES, "Neo4j/4.4.0"),
    protocol(5, 0, &[&[5]], BOLT43_MESSAGES, "Neo4j/5.0.0"),
    protocol(5, 1, &[], BOLT51_MESSAGES, "Neo4j/5.5.0"),
    protocol(5, 2, &[], BOLT51_MESSAGES, "Neo4j/5.7.0"),
    protocol(5, 3, &[], BOLT51_MESSAGES, "Neo4j/5.9.0"),
    protocol(5, 4, &[], BOLT54_MESSAGES, "Neo4j/5.13.0"),
    protocol(5, 5, &[], BOLT54_MESSAGES, "Neo4j/5.21.0"),
    protocol(5, 6, &[], BOLT54_MESSAGES, "Neo4j/5.23.0"),
    BoltProtocol {
        handshake_version: 2,
        hello_reply: HelloReply::ProtocolVersion,
        features: &[0x00],
        ..protocol(5, 7, &[], BOLT54_MESSAGES, "Neo4j/5.24.0")
    },
];

impl BoltProtocol {
    /// Find the protocol for a version as written in a script
    /// (`BOLT 4.4` gives `[4, 4]`, `BOLT 4` gives `[4]`).
    pub fn lookup(parts: &[u32]) -> Option<&'static BoltProtocol> {
        PROTOCOLS.iter().find(|p| {
            parts == [p.version.major as u32, p.version.minor as u32]
                || p.aliases.iter().any(|alias| *alias == parts)
        })
    }

    /// All supported protocols, oldest first.
    pub fn all() -> &'static [BoltProtocol] {
        &PROTOCOLS
    }

    /// Server side handshake parameters.
    pub fn handshake(&self) -> Handshake {
        Handshake {
            version: self.version,
            equivalent_versions: self.equivalent_versions.to_vec(),
            mask: self.mask,
            features: self.features.to_vec(),
        }
    }

    /// Client message names, in tag order.
    pub fn client_message_names(&self) -> Vec<&'static str> {
        self.client_messages.iter().map(|(_, name)| *name).collect()
    }

    /// Tag of a client message, by name.
    pub fn client_tag(&self, name: &str) -> BoltResult<u8> {
        lookup_tag(self.client_messages, name).ok_or_else(|| BoltError::UnsupportedMessage {
            side: "client",
            name: name.to_string(),
            version: self.version,
            allowed: self.client_message_names(),
        })
    }

    /// Tag of a server message, by name.
    pub fn server_tag(&self, name: &str) -> BoltResult<u8> {
        lookup_tag(SERVER_MESSAGES, name).ok_or_else(|| BoltError::UnsupportedMessage {
            side: "server",
            name: name.to_string(),
            version: self.version,
            allowed: SERVER_MESSAGES.iter().map(|(_, n)| *n).collect(),
        })
    }

    /// Build the structure for a server line.
    pub fn translate_server_line(
        &self,
        name: &str,
        fields: Vec<Value>,
    ) -> BoltResult<TranslatedStructure> {
        let tag = self.server_tag(name)?;
        Ok(TranslatedStructure::new(name, tag, fields, self.packstream_version))
    }

    /// Name a structure received from the client.
    ///
    /// Tags outside the client vocabulary are rejected; callers end the
    /// connection quietly on this error.
    pub fn translate_structure(&self, structure: Structure) -> BoltResult<TranslatedStructure> {
        match self.client_messages.iter().find(|(tag, _)| *tag == structure.tag) {
            Some((tag, name)) => Ok(TranslatedStructure::new(
                *name,
                *tag,
                structure.fields,
                self.packstream_version,
            )),
            None => Err(BoltError::UnknownMessage {
                tag: structure.tag,
                version: self.version,
            }),
        }
    }

    /// Canonical reply to a client message the script lets pass implicitly.
    ///
    /// HELLO/INIT gets a SUCCESS carrying the server agent (and, from Bolt
    /// 3.0, a fresh connection id); everything else an empty SUCCESS.
    pub fn auto_response(&self, request: &TranslatedStructure) -> TranslatedStructure {
        let mut metadata = IndexMap::new();
        if request.tag == HELLO_TAG {
            if self.hello_reply != HelloReply::Agent {
                metadata.insert("connection_id".to_string(), Value::String(next_connection_id()));
            }
            metadata.insert("server".to_string(), Value::from(self.server_agent));
            if matches!(
                self.hello_reply,
                HelloReply::Routing | HelloReply::ProtocolVersion
            ) {
                metadata.insert("routing".to_string(), Value::Null);
            }
            if self.hello_reply == HelloReply::ProtocolVersion {
                metadata.insert(
                    "protocol_version".to_string(),
                    Value::String(self.version.to_string()),
                );
            }
        }
        TranslatedStructure::new(
            "SUCCESS",
            SUCCESS,
            vec![Value::Map(metadata)],
            self.packstream_version,
        )
    }
}

fn lookup_tag(messages: &[(u8, &str)], name: &str) -> Option<u8> {
    messages.iter().find(|(_, n)| *n == name).map(|(tag, _)| *tag)
}

/// A message structure together with its name in the active protocol.
#[derive(Debug, Clone)]
pub struct TranslatedStructure {
    /// Message name, e.g. `RUN`
    pub name: String,
    /// Message tag
    pub tag: u8,
    /// Message fields
    pub fields: Vec<Value>,
    /// PackStream revision, used for rendering
    pub packstream_version: PackStreamVersion,
}

impl TranslatedStructure {
    /// Create a translated structure.
    pub fn new(
        name: impl Into<String>,
        tag: u8,
        fields: Vec<Value>,
        packstream_version: PackStreamVersion,
    ) -> Self {
        Self {
            name: name.into(),
            tag,
            fields,
            packstream_version,
        }
    }

    /// Plain structure for the wire.
    pub fn to_structure(&self) -> Structure {
        Structure::new(self.tag, self.fields.clone())
    }

    /// Debug rendering, e.g. `Structure[0x10|RUN]('RETURN 1', {}, {})`.
    pub fn repr(&self) -> String {
        let fields: Vec<String> = self.fields.iter().map(Value::repr).collect();
        format!(
            "Structure[0x{:02X}|{}]({})",
            self.tag,
            self.name,
            fields.join(", ")
        )
    }

    /// Tag rendered as in protocol diagnostics.
    pub fn tag_hex(&self) -> String {
        hex_repr(&[self.tag])
    }
}

/// Script notation of the message: name followed by the simple Jolt
/// rendering of each field.
impl fmt::Display for TranslatedStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|v| jolt::dumps_simple(v, self.packstream_version))
            .collect();
        write!(f, "{} {}", self.name, fields.join(" "))
    }
}

impl PartialEq for TranslatedStructure {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.fields == other.fields && self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hello(protocol: &BoltProtocol) -> TranslatedStructure {
        protocol
            .translate_structure(Structure::new(0x01, vec![Value::Map(IndexMap::new())]))
            .unwrap()
    }

    #[test]
    fn test_lookup_by_version_and_alias() {
        assert_eq!(BoltProtocol::lookup(&[4, 4]).unwrap().version, BoltVersion::new(4, 4));
        assert_eq!(BoltProtocol::lookup(&[4]).unwrap().version, BoltVersion::new(4, 0));
        assert_eq!(BoltProtocol::lookup(&[3, 2]).unwrap().version, BoltVersion::new(1, 0));
        assert_eq!(BoltProtocol::lookup(&[3, 6]).unwrap().version, BoltVersion::new(3, 0));
        assert_eq!(BoltProtocol::lookup(&[5]).unwrap().version, BoltVersion::new(5, 0));
        assert!(BoltProtocol::lookup(&[4, 9]).is_none());
        assert!(BoltProtocol::lookup(&[6, 0]).is_none());
    }

    #[test]
    fn test_table_properties() {
        let all = BoltProtocol::all();
        assert_eq!(all.len(), 16);
        for p in all {
            let v2 = p.version >= BoltVersion::new(5, 0);
            assert_eq!(p.packstream_version == PackStreamVersion::V2, v2);
        }
        let v57 = BoltProtocol::lookup(&[5, 7]).unwrap();
        assert_eq!(v57.handshake_version, 2);
        assert_eq!(v57.handshake().features, vec![0x00]);
        let v42 = BoltProtocol::lookup(&[4, 2]).unwrap();
        assert_eq!(v42.handshake().equivalent_versions, vec![BoltVersion::new(4, 1)]);
        assert_eq!(v42.handshake().mask, SlotMask::Full);
        assert_eq!(BoltProtocol::lookup(&[4, 1]).unwrap().handshake().mask, SlotMask::NoRange);
        assert_eq!(BoltProtocol::lookup(&[2, 0]).unwrap().handshake().mask, SlotMask::MajorOnly);
    }

    #[test]
    fn test_vocabularies() {
        let v44 = BoltProtocol::lookup(&[4, 4]).unwrap();
        assert_eq!(v44.client_tag("ROUTE").unwrap(), 0x66);
        assert_eq!(v44.client_tag("PULL").unwrap(), 0x3F);
        assert!(v44.client_tag("LOGON").is_err());
        assert!(v44.client_tag("PULL_ALL").is_err());

        let v3 = BoltProtocol::lookup(&[3, 0]).unwrap();
        assert_eq!(v3.client_tag("PULL_ALL").unwrap(), 0x3F);
        assert!(v3.client_tag("ROUTE").is_err());

        let v54 = BoltProtocol::lookup(&[5, 4]).unwrap();
        assert_eq!(v54.client_tag("TELEMETRY").unwrap(), 0x54);
        assert_eq!(v54.server_tag("FAILURE").unwrap(), 0x7F);
    }

    #[test]
    fn test_unsupported_message_error() {
        let v44 = BoltProtocol::lookup(&[4, 4]).unwrap();
        let err = v44.server_tag("HELLO").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported server message HELLO for BOLT version (4, 4). \
             Must be one of ['SUCCESS', 'RECORD', 'IGNORED', 'FAILURE']"
        );
    }

    #[test]
    fn test_translate_unknown_structure() {
        let v44 = BoltProtocol::lookup(&[4, 4]).unwrap();
        let err = v44.translate_structure(Structure::new(0x7A, vec![])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown response message type 7A in Bolt version 4.4"
        );
    }

    #[test]
    fn test_auto_response_hello() {
        let v1 = BoltProtocol::lookup(&[1, 0]).unwrap();
        let reply = v1.auto_response(&hello(v1));
        assert_eq!(reply.name, "SUCCESS");
        let meta = reply.fields[0].as_map().unwrap();
        assert_eq!(meta.keys().collect::<Vec<_>>(), vec!["server"]);
        assert_eq!(meta["server"], Value::from("Neo4j/3.3.0"));

        let v40 = BoltProtocol::lookup(&[4, 0]).unwrap();
        let reply = v40.auto_response(&hello(v40));
        let meta = reply.fields[0].as_map().unwrap();
        assert_eq!(meta.keys().collect::<Vec<_>>(), vec!["connection_id", "server"]);
        assert!(meta["connection_id"].as_str().unwrap().starts_with("bolt-"));

        let v44 = BoltProtocol::lookup(&[4, 4]).unwrap();
        let reply = v44.auto_response(&hello(v44));
        let meta = reply.fields[0].as_map().unwrap();
        assert_eq!(
            meta.keys().collect::<Vec<_>>(),
            vec!["connection_id", "server", "routing"]
        );
        assert_eq!(meta["server"], Value::from("Neo4j/4.4.0"));
        assert!(meta["routing"].is_null());

        let v57 = BoltProtocol::lookup(&[5, 7]).unwrap();
        let reply = v57.auto_response(&hello(v57));
        let meta = reply.fields[0].as_map().unwrap();
        assert_eq!(meta["protocol_version"], Value::from("5.7"));
    }

    #[test]
    fn test_connection_ids_increase() {
        let first = next_connection_id();
        let second = next_connection_id();
        let n = |s: &str| s.trim_start_matches("bolt-").parse::<u64>().unwrap();
        assert!(n(&second) > n(&first));
    }

    #[test]
    fn test_auto_response_other() {
        let v44 = BoltProtocol::lookup(&[4, 4]).unwrap();
        let reset = v44.translate_structure(Structure::new(0x0F, vec![])).unwrap();
        let reply = v44.auto_response(&reset);
        assert_eq!(reply.to_string(), "SUCCESS {\"{}\": {}}");
        assert_eq!(reply.to_structure(), Structure::new(0x70, vec![Value::Map(IndexMap::new())]));
    }

    #[test]
    fn test_display_and_repr() {
        let v44 = BoltProtocol::lookup(&[4, 4]).unwrap();
        let run = v44
            .translate_structure(Structure::new(
                0x10,
                vec![
                    Value::from("RETURN 1 AS n"),
                    Value::Map(IndexMap::new()),
                    Value::Integer(1 << 40),
                ],
            ))
            .unwrap();
        assert_eq!(
            run.to_string(),
            "RUN \"RETURN 1 AS n\" {\"{}\": {}} {\"Z\": \"1099511627776\"}"
        );
        assert_eq!(
            run.repr(),
            "Structure[0x10|RUN]('RETURN 1 AS n', {}, 1099511627776)"
        );

        let reset = v44.translate_structure(Structure::new(0x0F, vec![])).unwrap();
        assert_eq!(reset.to_string(), "RESET ");
        assert_eq!(reset.tag_hex(), "0F");
    }
}

//! # Bolt Stub Server
//!
//! A scriptable Bolt server for testing Neo4j drivers. The server listens
//! for a client, plays through a pre-written exchange with it and reports
//! every deviation from that exchange.
//!
//! ## Features
//!
//! - **Bolt 1.0 to 5.7** - Version negotiation including handshake v2
//! - **PackStream v1/v2** - Byte exact encoding of every value type
//! - **Script language** - Alternatives, parallel blocks, optional and repeated blocks
//! - **Jolt fields** - Typed values and wildcards in script lines
//! - **WebSocket** - Transparent upgrade on the same port
//!
//! ## Scripts
//!
//! ```text
//! !: BOLT 4.4
//! !: AUTO RESET
//!
//! C: HELLO {"user_agent": "*", "[routing]": "*"}
//! S: SUCCESS {"server": "Neo4j/4.4.0", "connection_id": "bolt-0"}
//! {?
//!     C: RUN "RETURN 1 AS n" {} {}
//!     S: SUCCESS {"fields": ["n"]}
//!     C: PULL {"n": {"Z": "*"}}
//!     S: RECORD [1]
//!        SUCCESS {"type": "r"}
//! ?}
//! C: GOODBYE
//! S: <EXIT>
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use boltstub::{Address, Script, Service, ServiceConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let script = Script::parse_file("hello.script")?;
//! let config = ServiceConfig::builder()
//!     .with_listen_addr(Address::parse(":9001")?)
//!     .build();
//! let service = Service::new(script, config);
//! service.start().await?;
//!
//! if !service.failures().is_empty() {
//!     eprintln!("the client didn't follow the script");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`bolt`] - PackStream, framing, handshake and the per-version protocol table
//! - [`jolt`] - JSON notation of message fields
//! - [`script`] - Script parsing and the block engine
//! - [`channel`] - Bolt conversation with one client
//! - [`server`] - Listener, connection policies and actors
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod channel;
pub mod config;
pub mod error;
pub mod jolt;
pub mod script;
pub mod server;
pub mod wire;

// Re-exports for convenience
pub use bolt::{BoltError, BoltProtocol, BoltVersion, PackStreamVersion, Structure, Value};
pub use config::{Address, ServiceConfig, ServiceConfigBuilder};
pub use error::{LineError, StubError, StubResult};
pub use script::Script;
pub use server::{Failure, Service, ServiceHandle};

//! Bolt messaging on top of a [`Wire`] for one connection.
//!
//! The channel runs the handshake, turns incoming chunks into named
//! messages, sends server lines and auto responses, and logs the traffic
//! with the connection's port prefix.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use indexmap::IndexSet;
use tokio_util::codec::Encoder;
use tracing::info;

use crate::bolt::handshake::{check_magic, Handshake, NO_VERSION, SLOTS_SIZE};
use crate::bolt::{hex_repr, BoltCodec, BoltError, BoltProtocol, TranslatedStructure};
use crate::error::{StubError, StubResult};
use crate::script::{Command, ScriptContext, ServerBody, ServerLine};
use crate::wire::Wire;

/// Log prefix of a connection: `[#CCCC>#SSSS]  ` with client and server
/// port in hex.
pub fn connection_prefix(peer: Option<SocketAddr>, local: Option<SocketAddr>) -> String {
    match (peer, local) {
        (Some(peer), Some(local)) => format!("[#{:04X}>#{:04X}]  ", peer.port(), local.port()),
        _ => String::new(),
    }
}

/// One client connection speaking the script's protocol.
pub struct Channel {
    wire: Wire,
    protocol: &'static BoltProtocol,
    codec: BoltCodec,
    /// Message peeked at but not consumed yet
    buffered: Option<TranslatedStructure>,
    handshake: Option<Vec<u8>>,
    handshake_delay: Option<f64>,
    prefix: String,
}

impl Channel {
    /// Create a channel for a script.
    pub fn new(wire: Wire, protocol: &'static BoltProtocol, context: &ScriptContext) -> Self {
        let prefix = connection_prefix(wire.peer_addr(), wire.local_addr());
        Self {
            wire,
            protocol,
            codec: BoltCodec::new(protocol.packstream_version),
            buffered: None,
            handshake: context.handshake.clone(),
            handshake_delay: context.handshake_delay,
            prefix,
        }
    }

    fn log(&self, msg: impl fmt::Display) {
        info!("{}{}", self.prefix, msg);
    }

    /// Sniff for a WebSocket upgrade. Must come before anything else.
    pub async fn negotiate_transport(&mut self) -> StubResult<()> {
        self.wire.negotiate().await
    }

    /// Read and check the Bolt magic.
    pub async fn preamble(&mut self) -> StubResult<()> {
        let request = self.wire.read(4).await?;
        self.log(format_args!("C: <MAGIC> {}", hex_repr(&request)));
        check_magic(&request).map_err(|e| StubError::server_exit(e.to_string()))
    }

    /// Agree on the protocol version.
    pub async fn version_handshake(&mut self) -> StubResult<()> {
        if let Some(response) = self.handshake.clone() {
            return self.fixed_handshake(&response).await;
        }
        match self.protocol.handshake_version {
            1 => self.handshake_v1().await,
            _ => self.handshake_v2().await,
        }
    }

    async fn read_slots(&mut self) -> StubResult<[u8; SLOTS_SIZE]> {
        let request = self.wire.read(SLOTS_SIZE).await?;
        self.log(format_args!("C: <HANDSHAKE> {}", hex_repr(&request)));
        let mut slots = [0u8; SLOTS_SIZE];
        slots.copy_from_slice(&request);
        Ok(slots)
    }

    async fn fixed_handshake(&mut self, response: &[u8]) -> StubResult<()> {
        self.read_slots().await?;
        self.delay_handshake().await;
        self.wire.write(response);
        self.wire.send().await?;
        self.log(format_args!("S: <HANDSHAKE> {}", hex_repr(response)));
        Ok(())
    }

    async fn handshake_v1(&mut self) -> StubResult<()> {
        let request = self.read_slots().await?;
        let version = match self.protocol.handshake().negotiate(&request) {
            Ok(version) => version,
            Err(err) => {
                self.abort_handshake().await;
                return Err(StubError::script_failure(err.to_string()));
            }
        };
        let response = version.to_bytes();
        self.delay_handshake().await;
        self.wire.write(&response);
        self.wire.send().await?;
        self.log(format_args!("S: <HANDSHAKE> {}", hex_repr(&response)));
        Ok(())
    }

    async fn handshake_v2(&mut self) -> StubResult<()> {
        let request = self.read_slots().await?;
        let handshake: Handshake = self.protocol.handshake();
        let offer = match handshake.v2_offer(&request) {
            Ok(offer) => offer,
            Err(err) => {
                self.abort_handshake().await;
                return Err(StubError::script_failure(err.to_string()));
            }
        };
        self.delay_handshake().await;
        self.wire.write(&offer);
        self.log(format_args!(
            "S: <HANDSHAKE> 00 00 01 FF [1] {} {}",
            hex_repr(&handshake.version.to_bytes()),
            hex_repr(&handshake.features)
        ));
        self.wire.send().await?;

        let pick = self.wire.read(4).await?;
        let mut features = self.wire.read(1).await?.to_vec();
        while features.last().is_some_and(|b| b & 0x80 != 0) {
            features.extend_from_slice(&self.wire.read(1).await?);
        }
        self.log(format_args!(
            "C: <HANDSHAKE> {} {}",
            hex_repr(&pick),
            hex_repr(&features)
        ));
        handshake
            .check_v2_pick(&pick, &features)
            .map_err(|e| StubError::script_failure(e.to_string()))
    }

    /// Tell the client no version matched. Send errors are ignored.
    async fn abort_handshake(&mut self) {
        self.log(format_args!("S: <HANDSHAKE> {}", hex_repr(&NO_VERSION)));
        self.wire.write(&NO_VERSION);
        let _ = self.wire.send().await;
    }

    async fn delay_handshake(&self) {
        if let Some(delay) = self.handshake_delay.filter(|d| *d > 0.0) {
            self.log(format_args!("S: <HANDSHAKE DELAY> {}", delay));
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    /// Take the buffered message, reading one if there is none.
    pub async fn consume(&mut self, line_number: usize) -> StubResult<TranslatedStructure> {
        self.peek().await?;
        let msg = self
            .buffered
            .take()
            .ok_or_else(|| StubError::broken_wire("No message to consume"))?;
        self.log(format_args!("({:3}) C: {}", line_number, msg));
        Ok(msg)
    }

    /// The next message, read and buffered if needed.
    ///
    /// Cancel safe. Unknown message tags end the connection quietly.
    pub async fn peek(&mut self) -> StubResult<&TranslatedStructure> {
        if self.buffered.is_none() {
            let structure = self.wire.read_message(&mut self.codec).await?;
            let msg = self
                .protocol
                .translate_structure(structure)
                .map_err(|e| {
                    if matches!(e, BoltError::UnknownMessage { .. }) {
                        StubError::server_exit(e.to_string())
                    } else {
                        e.into()
                    }
                })?;
            self.buffered = Some(msg);
        }
        self.buffered
            .as_ref()
            .ok_or_else(|| StubError::broken_wire("No message buffered"))
    }

    /// Send bytes as they are.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> StubResult<()> {
        self.log(hex_repr(bytes));
        self.wire.write(bytes);
        self.wire.send().await
    }

    /// Send a message.
    pub async fn send_struct(&mut self, msg: &TranslatedStructure) -> StubResult<()> {
        self.log(format_args!("S: {}", msg));
        self.write_struct(msg).await
    }

    async fn write_struct(&mut self, msg: &TranslatedStructure) -> StubResult<()> {
        let mut buf = BytesMut::new();
        self.codec.encode(&msg.to_structure(), &mut buf)?;
        self.wire.write(&buf);
        self.wire.send().await
    }

    /// Send a server line's message or run its command.
    pub async fn send_server_line(&mut self, line: &ServerLine) -> StubResult<()> {
        match &line.body {
            ServerBody::Command(command) => self.run_command(line, command).await,
            ServerBody::Message { name, fields, .. } => {
                self.log(line);
                let msg = self.protocol.translate_server_line(name, fields.clone())?;
                self.write_struct(&msg).await
            }
        }
    }

    async fn run_command(&mut self, line: &ServerLine, command: &Command) -> StubResult<()> {
        match command {
            Command::Exit => Err(StubError::server_exit(format!(
                "server exit as part of the script: {}",
                line
            ))),
            Command::Noop => self.send_raw(&[0x00, 0x00]).await,
            Command::Raw(bytes) => self.send_raw(bytes).await,
            Command::Sleep(secs) => {
                tokio::time::sleep(Duration::from_secs_f64(*secs)).await;
                Ok(())
            }
            Command::AssertOrder(secs) => {
                tokio::time::sleep(Duration::from_secs_f64(*secs)).await;
                self.assert_no_input().await
            }
        }
    }

    /// Send the canonical reply to a message.
    pub async fn auto_respond(&mut self, msg: &TranslatedStructure) -> StubResult<()> {
        self.log("AUTO response:");
        let response = self.protocol.auto_response(msg);
        self.send_struct(&response).await
    }

    /// Consume and auto answer the next message if its name is whitelisted.
    pub async fn try_auto_consume(&mut self, whitelist: &IndexSet<String>) -> StubResult<bool> {
        if !whitelist.contains(&self.peek().await?.name) {
            return Ok(false);
        }
        let Some(msg) = self.buffered.take() else {
            return Ok(false);
        };
        self.log(format_args!("C: {}", msg));
        self.auto_respond(&msg).await?;
        Ok(true)
    }

    /// Fail if the client has sent anything that wasn't consumed.
    pub async fn assert_no_input(&mut self) -> StubResult<()> {
        if self.buffered.is_none() && self.wire.check_no_input() {
            return Ok(());
        }
        let received = match self.peek().await {
            Ok(msg) => msg.to_string(),
            Err(err) => format!(
                "some data (encountered error while trying to peek):\n{}",
                err
            ),
        };
        self.wire.close().await;
        Err(StubError::script_failure(format!(
            "Expected the driver to not send anything, but received: {}",
            received
        )))
    }

    /// Close the connection.
    pub async fn close(&mut self) {
        self.wire.close().await;
    }

    /// Log prefix of the connection.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("wire", &self.wire)
            .field("version", &self.protocol.version)
            .field("buffered", &self.buffered)
            .finish()
    }
}

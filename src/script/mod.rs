//! # Scripts
//!
//! A script describes the dialogue a client is expected to have with the
//! stub server:
//!
//! ```text
//! !: BOLT 4.4
//! !: AUTO RESET
//!
//! C: HELLO {"user_agent": "*", "[routing]": null}
//! S: SUCCESS {"server": "Neo4j/4.4.0", "connection_id": "bolt-0"}
//! {*
//!     C: RUN "RETURN 1 AS n" {} {}
//!        PULL {"n": -1}
//!     S: SUCCESS {"fields": ["n"]}
//!        RECORD [1]
//!        SUCCESS {}
//! *}
//! ?: GOODBYE
//! ```
//!
//! ## Submodules
//!
//! - [`lines`] - Bang, client, auto and server lines
//! - [`matching`] - Field matching with wildcards
//! - [`blocks`] - The block tree and its per-connection state
//! - `parser` - Script text to block tree

pub mod blocks;
pub mod lines;
pub mod matching;
mod parser;

use std::fs;
use std::path::Path;

use tracing::debug;

pub use blocks::{Action, Block, BlockKind, BlockState, BlockStates};
pub use lines::{Bang, BangLine, ClientLine, Command, Line, ScriptContext, ServerBody, ServerLine};

use crate::bolt::handshake::version_tuple;
use crate::bolt::BoltProtocol;
use crate::channel::Channel;
use crate::error::{LineError, StubError, StubResult};
use parser::BlockParser;

/// A parsed and verified script.
///
/// Scripts are immutable; everything a connection changes while playing
/// one lives in its [`ScriptState`].
#[derive(Debug)]
pub struct Script {
    /// Settings from the bang lines
    pub context: ScriptContext,
    bang_lines: Vec<BangLine>,
    root: Block,
    protocol: &'static BoltProtocol,
    /// File the script was loaded from, empty for scripts parsed from text
    pub filename: String,
}

/// Progress of one connection through a script.
#[derive(Debug, Clone, Default)]
pub struct ScriptState {
    blocks: BlockStates,
    skipped: bool,
}

impl Script {
    /// Parse and verify script text.
    pub fn parse(text: &str) -> StubResult<Self> {
        let tokens = parser::tokenize(text)?;
        let (bang_lines, body) = parser::bang_lines(&tokens)?;
        if body.is_empty() {
            return Err(StubError::Grammar("script contains no blocks".to_string()));
        }
        let mut context = ScriptContext::default();
        for bang in &bang_lines {
            bang.update_context(&mut context)?;
        }
        let protocol = resolve_protocol(&context)?;
        let root = BlockParser::new(body, protocol.packstream_version).parse()?;
        let script = Self {
            context,
            bang_lines,
            root,
            protocol,
            filename: String::new(),
        };
        script.verify_messages()?;
        Ok(script)
    }

    /// Load a script file.
    pub fn parse_file(path: impl AsRef<Path>) -> StubResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut script = Self::parse(&text)?;
        script.filename = path.display().to_string();
        debug!("Loaded script {}", script.filename);
        Ok(script)
    }

    /// Protocol declared by the script.
    pub fn protocol(&self) -> &'static BoltProtocol {
        self.protocol
    }

    /// Root block list.
    pub fn root(&self) -> &Block {
        &self.root
    }

    /// Every client and auto line, in script order.
    pub fn client_lines(&self) -> Vec<&ClientLine> {
        let mut lines = Vec::new();
        self.root.client_lines(&mut lines);
        lines
    }

    /// Every server line, in script order.
    pub fn server_lines(&self) -> Vec<&ServerLine> {
        let mut lines = Vec::new();
        self.root.server_lines(&mut lines);
        lines
    }

    /// Fresh state for a new connection.
    pub fn new_state(&self) -> ScriptState {
        ScriptState::default()
    }

    /// Send what the script starts with.
    pub async fn init(&self, state: &mut ScriptState, channel: &mut Channel) -> StubResult<()> {
        let mut actions = Vec::new();
        self.root.init(&mut state.blocks, &mut actions);
        apply(actions, channel).await
    }

    /// Consume the next client message, replying as the script says.
    ///
    /// Messages the script doesn't expect are still accepted when they're
    /// declared `!: AUTO`; anything else is a deviation.
    pub async fn consume(&self, state: &mut ScriptState, channel: &mut Channel) -> StubResult<()> {
        let msg = channel.peek().await?.clone();
        let mut actions = Vec::new();
        if self.root.try_consume(&mut state.blocks, &msg, &mut actions) {
            return apply(actions, channel).await;
        }
        if channel.try_auto_consume(&self.context.auto).await? {
            return Ok(());
        }
        Err(StubError::ScriptDeviation {
            expected: self
                .root
                .accepted_messages(&state.blocks)
                .iter()
                .map(|line| line.to_string())
                .collect(),
            received: msg.to_string(),
            received_repr: msg.repr(),
        })
    }

    /// Whether the connection has played the script to its end.
    pub fn done(&self, state: &ScriptState) -> bool {
        state.skipped
            || (self.root.has_deterministic_end(&state.blocks) && self.root.done(&state.blocks))
    }

    /// Mark the script finished if the rest of it may be left out.
    pub fn try_skip_to_end(&self, state: &mut ScriptState) {
        if self.root.can_be_skipped(&state.blocks) {
            state.skipped = true;
        }
    }

    /// The script in canonical notation.
    pub fn canonical(&self) -> String {
        let mut out: Vec<String> = self.bang_lines.iter().map(BangLine::canonical).collect();
        self.root.canonical(0, &mut out);
        out.join("\n")
    }

    fn verify_messages(&self) -> StubResult<()> {
        for line in self.client_lines() {
            self.protocol
                .client_tag(&line.name)
                .map_err(|e| LineError::new(&line.line, e.to_string()))?;
        }
        for line in self.server_lines() {
            if let ServerBody::Message { name, .. } = &line.body {
                self.protocol
                    .server_tag(name)
                    .map_err(|e| LineError::new(&line.line, e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn resolve_protocol(context: &ScriptContext) -> StubResult<&'static BoltProtocol> {
    let (Some(version), Some(line)) = (&context.bolt_version, &context.bolt_line) else {
        return Err(StubError::Grammar(
            "Missing bolt version bang line (e.g. \"!: BOLT 4.3\")".to_string(),
        ));
    };
    BoltProtocol::lookup(version).ok_or_else(|| {
        LineError::new(
            line,
            format!("unsupported bolt version {}", version_tuple(version)),
        )
        .into()
    })
}

/// Carry out the actions of a consume or init step, in order.
async fn apply(actions: Vec<Action<'_>>, channel: &mut Channel) -> StubResult<()> {
    for action in actions {
        match action {
            Action::Consume(line) => {
                channel.consume(line.number()).await?;
            }
            Action::ConsumeAuto(line) => {
                let msg = channel.consume(line.number()).await?;
                channel.auto_respond(&msg).await?;
            }
            Action::Respond(line) => channel.send_server_line(line).await?,
        }
    }
    Ok(())
}

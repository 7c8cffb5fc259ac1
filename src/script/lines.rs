//! Script lines: bang lines, client lines, auto lines and server lines.

use std::fmt;
use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::Regex;
use serde_json::Value as Json;
use tracing::warn;

use super::matching::fields_match;
use crate::bolt::{PackStreamVersion, TranslatedStructure, Value};
use crate::error::LineError;
use crate::jolt::{self, Field};

static AUTO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^AUTO\s(.*)$").expect("valid AUTO regex"));
static BOLT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^BOLT\s(.*)$").expect("valid BOLT regex"));
static RESTART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ALLOW\s+RESTART$").expect("valid RESTART regex"));
static CONCURRENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ALLOW\s+CONCURRENT").expect("valid CONCURRENT regex"));
static HANDSHAKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HANDSHAKE\s(.*)$").expect("valid HANDSHAKE regex"));
static HANDSHAKE_DELAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^HANDSHAKE_DELAY\s(.*)$").expect("valid HANDSHAKE_DELAY regex")
});
static HEX_BYTES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-fA-F]{2})+$").expect("valid hex regex"));
static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(.+?)>(.*)$").expect("valid command regex"));

/// A line of a script file.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// 1-based line number
    pub number: usize,
    /// Line as written, prefix included
    pub raw: String,
    /// Line without its prefix
    pub content: String,
}

impl Line {
    /// Create a line.
    pub fn new(number: usize, raw: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            number,
            raw: raw.into(),
            content: content.into(),
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:3}) {}", self.number, self.raw)
    }
}

/// What a bang line sets.
#[derive(Debug, Clone, PartialEq)]
pub enum Bang {
    /// `!: AUTO <message>`
    Auto(String),
    /// `!: BOLT <major>[.<minor>]`
    Bolt(Vec<u32>),
    /// `!: ALLOW RESTART`
    AllowRestart,
    /// `!: ALLOW CONCURRENT`
    AllowConcurrent,
    /// `!: HANDSHAKE <hex bytes>`
    Handshake(Vec<u8>),
    /// `!: HANDSHAKE_DELAY <seconds>`
    HandshakeDelay(f64),
}

/// Settings collected from a script's bang lines.
#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    /// Declared Bolt version, as written
    pub bolt_version: Option<Vec<u32>>,
    /// Line declaring the Bolt version
    pub bolt_line: Option<Line>,
    /// Messages answered automatically when the script doesn't expect them
    pub auto: IndexSet<String>,
    /// Accept new connections after one finished
    pub restarting: bool,
    /// Accept connections while others are still running
    pub concurrent: bool,
    /// Literal handshake response
    pub handshake: Option<Vec<u8>>,
    /// Seconds to wait before answering the handshake
    pub handshake_delay: Option<f64>,
}

/// A `!:` line.
#[derive(Debug, Clone, PartialEq)]
pub struct BangLine {
    pub line: Line,
    pub bang: Bang,
}

impl BangLine {
    pub fn parse(line: Line) -> Result<Self, LineError> {
        let content = line.content.as_str();
        let bang = if let Some(caps) = AUTO_RE.captures(content) {
            Bang::Auto(caps[1].trim().to_string())
        } else if let Some(caps) = BOLT_RE.captures(content) {
            let parts = caps[1]
                .trim()
                .split('.')
                .map(|p| p.parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| {
                    LineError::new(
                        &line,
                        "invalid argument for bolt version, must be semantic version \
                         (e.g. 'BOLT 4.2')",
                    )
                })?;
            Bang::Bolt(parts)
        } else if RESTART_RE.is_match(content) {
            Bang::AllowRestart
        } else if CONCURRENT_RE.is_match(content) {
            Bang::AllowConcurrent
        } else if let Some(caps) = HANDSHAKE_RE.captures(content) {
            let hex: String = caps[1].chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = HEX_BYTES_RE
                .is_match(&hex)
                .then(|| data_encoding::HEXLOWER_PERMISSIVE.decode(hex.as_bytes()).ok())
                .flatten()
                .ok_or_else(|| {
                    LineError::new(
                        &line,
                        "invalid argument for handshake, must be list of 2-digit hex \
                         encoded bytes, whitespace is ignored (e.g. 'HANDSHAKE 00 FF 02 04 F0'",
                    )
                })?;
            Bang::Handshake(bytes)
        } else if let Some(caps) = HANDSHAKE_DELAY_RE.captures(content) {
            let delay: f64 = caps[1].trim().parse().map_err(|_| {
                LineError::new(
                    &line,
                    "invalid argument for handshake delay, must be a number number \
                     (e.g. 'HANDSHAKE_DELAY 0.5')",
                )
            })?;
            if delay < 0.0 {
                return Err(LineError::new(
                    &line,
                    "invalid argument for handshake delay, must be a positive number \
                     (e.g. 'HANDSHAKE_DELAY 0.5')",
                ));
            }
            Bang::HandshakeDelay(delay)
        } else {
            return Err(LineError::new(
                &line,
                format!("unsupported Bang line: \"{}\"", line),
            ));
        };
        Ok(Self { line, bang })
    }

    /// Apply the line to the script context.
    pub fn update_context(&self, ctx: &mut ScriptContext) -> Result<(), LineError> {
        match &self.bang {
            Bang::Auto(name) => {
                if !ctx.auto.insert(name.clone()) {
                    warn!("Specified AUTO for \"{}\" multiple times", name);
                }
            }
            Bang::Bolt(version) => {
                if ctx.bolt_version.is_some() {
                    return Err(LineError::new(&self.line, "repeated definition of bolt version"));
                }
                ctx.bolt_version = Some(version.clone());
                ctx.bolt_line = Some(self.line.clone());
            }
            Bang::AllowRestart => {
                if ctx.restarting {
                    warn!("Specified \"!: ALLOW RESTART\" multiple times");
                }
                ctx.restarting = true;
            }
            Bang::AllowConcurrent => {
                if ctx.concurrent {
                    warn!("Specified \"!: ALLOW CONCURRENT\" multiple times");
                }
                ctx.concurrent = true;
            }
            Bang::Handshake(bytes) => {
                if ctx.handshake.is_some() {
                    warn!("Specified \"!: HANDSHAKE\" multiple times");
                }
                ctx.handshake = Some(bytes.clone());
            }
            Bang::HandshakeDelay(delay) => {
                if ctx.handshake_delay.is_some() {
                    warn!("Specified \"!: HANDSHAKE_DELAY\" multiple times");
                }
                ctx.handshake_delay = Some(*delay);
            }
        }
        if ctx.restarting && ctx.concurrent {
            warn!(
                "Specified \"!: ALLOW RESTART\" and \"!: ALLOW CONCURRENT\" \
                 (concurrent scripts are implicitly restarting)"
            );
        }
        Ok(())
    }

    pub fn canonical(&self) -> String {
        format!("!: {}", self.line.content)
    }
}

impl fmt::Display for BangLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

/// Split a message line into its name and the text of its fields.
fn split_message(content: &str) -> (&str, &str) {
    let content = content.trim();
    content
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim_start()))
        .unwrap_or((content, ""))
}

/// Parse whitespace separated JSON values.
fn parse_json_fields(line: &Line, text: &str) -> Result<Vec<Json>, LineError> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Json>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LineError::new(line, "message fields must be white space separated json"))
}

fn decode_fields(
    line: &Line,
    json: &[Json],
    version: PackStreamVersion,
) -> Result<Vec<Field>, LineError> {
    json.iter()
        .map(|field| {
            jolt::decode(field, version)
                .map_err(|_| LineError::new(line, "message fields failed JOLT parser"))
        })
        .collect()
}

fn canonical_message(prefix: &str, name: &str, json: &[Json]) -> String {
    let mut parts = vec![prefix.to_string(), name.to_string()];
    parts.extend(json.iter().map(jolt::dumps));
    parts.join(" ")
}

/// A `C:` line, or an `A:` line when `auto` is set.
#[derive(Debug, Clone)]
pub struct ClientLine {
    pub line: Line,
    /// Answered with the auto response once consumed
    pub auto: bool,
    /// Message name
    pub name: String,
    json: Vec<Json>,
    /// Expected fields, wildcards allowed
    pub fields: Vec<Field>,
}

impl ClientLine {
    pub fn parse(line: Line, auto: bool, version: PackStreamVersion) -> Result<Self, LineError> {
        let (name, rest) = split_message(&line.content);
        let name = name.to_string();
        let json = parse_json_fields(&line, rest)?;
        let fields = decode_fields(&line, &json, version)?;
        Ok(Self {
            line,
            auto,
            name,
            json,
            fields,
        })
    }

    pub fn number(&self) -> usize {
        self.line.number
    }

    /// Check whether a received message is the one this line describes.
    pub fn matches(&self, message: &TranslatedStructure) -> bool {
        self.name == message.name && fields_match(&self.fields, &message.fields)
    }

    pub fn canonical(&self) -> String {
        let prefix = if self.auto { "A:" } else { "C:" };
        canonical_message(prefix, &self.name, &self.json)
    }
}

impl fmt::Display for ClientLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

/// Server commands, written `S: <COMMAND> args`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Close the connection
    Exit,
    /// Send an empty chunk
    Noop,
    /// Send bytes as they are
    Raw(Vec<u8>),
    /// Pause for some seconds
    Sleep(f64),
    /// Pause, then fail if the client sent anything meanwhile
    AssertOrder(f64),
}

impl Command {
    fn parse(line: &Line, tag: &str, args: &str) -> Result<Self, LineError> {
        let args = args.trim();
        let duration = |args: &str| -> Result<f64, LineError> {
            let secs: f64 = args
                .parse()
                .map_err(|_| LineError::new(line, "Invalid duration"))?;
            if secs < 0.0 {
                return Err(LineError::new(line, "Duration must be non-negative"));
            }
            Ok(secs)
        };
        match tag {
            "EXIT" if args.is_empty() => Ok(Command::Exit),
            "EXIT" => Err(LineError::new(line, "EXIT takes no arguments")),
            "NOOP" if args.is_empty() => Ok(Command::Noop),
            "NOOP" => Err(LineError::new(line, "NOOP takes no arguments")),
            "RAW" => parse_raw(args)
                .map(Command::Raw)
                .ok_or_else(|| LineError::new(line, "Invalid raw data")),
            "SLEEP" => duration(args).map(Command::Sleep),
            "ASSERT ORDER" if args.is_empty() => Ok(Command::AssertOrder(1.0)),
            "ASSERT ORDER" => duration(args).map(Command::AssertOrder),
            _ => Err(LineError::new(line, format!("Unknown command '{}'", tag))),
        }
    }
}

/// Hex bytes, whitespace separated or not (`00 0A`, `000A`).
fn parse_raw(args: &str) -> Option<Vec<u8>> {
    let mut bytes = Vec::new();
    for word in args.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for pair in chars.chunks(2) {
            let pair: String = pair.iter().collect();
            bytes.push(u8::from_str_radix(&pair, 16).ok()?);
        }
    }
    Some(bytes)
}

/// Body of an `S:` line.
#[derive(Debug, Clone)]
pub enum ServerBody {
    /// A message to send
    Message {
        name: String,
        json: Vec<Json>,
        fields: Vec<Value>,
    },
    /// A command to run
    Command(Command),
}

/// An `S:` line.
#[derive(Debug, Clone)]
pub struct ServerLine {
    pub line: Line,
    pub body: ServerBody,
}

impl ServerLine {
    pub fn parse(line: Line, version: PackStreamVersion) -> Result<Self, LineError> {
        if let Some(caps) = COMMAND_RE.captures(&line.content) {
            let command = Command::parse(&line, &caps[1], &caps[2])?;
            return Ok(Self {
                line,
                body: ServerBody::Command(command),
            });
        }
        let (name, rest) = split_message(&line.content);
        let name = name.to_string();
        let json = parse_json_fields(&line, rest)?;
        let fields = decode_fields(&line, &json, version)?
            .iter()
            .map(Field::to_value)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                LineError::new(&line, "ServerLine does not allow for JOLT wildcard values")
            })?;
        Ok(Self {
            line,
            body: ServerBody::Message { name, json, fields },
        })
    }

    pub fn canonical(&self) -> String {
        match &self.body {
            ServerBody::Message { name, json, .. } => canonical_message("S:", name, json),
            ServerBody::Command(_) => format!("S: {}", self.line.content),
        }
    }
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

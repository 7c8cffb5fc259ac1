//! Stub server error types.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::bolt::BoltError;
use crate::jolt::JoltError;
use crate::script::Line;

/// Result type for stub server operations.
pub type StubResult<T> = Result<T, StubError>;

/// Stub server errors.
#[derive(Error, Debug)]
pub enum StubError {
    /// A script line is malformed or names something the protocol lacks
    #[error(transparent)]
    Line(#[from] LineError),

    /// The script as a whole doesn't follow the script grammar
    #[error("{0}")]
    Grammar(String),

    /// Invalid server configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The client diverged from what the script allows
    #[error("{0}")]
    ScriptFailure(String),

    /// The client sent a message no current script position accepts
    #[error("{}", deviation_text(.expected, .received, .received_repr))]
    ScriptDeviation {
        /// Lines that would have been accepted
        expected: Vec<String>,
        /// Received message in script notation
        received: String,
        /// Received message in structure notation
        received_repr: String,
    },

    /// Orderly end of a connection, not a failure
    #[error("{0}")]
    ServerExit(String),

    /// The peer hung up or the connection broke
    #[error("{0}")]
    BrokenWire(String),

    /// Bolt protocol error
    #[error(transparent)]
    Bolt(#[from] BoltError),

    /// Jolt decoding error
    #[error(transparent)]
    Jolt(#[from] JoltError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StubError {
    /// Create a script failure.
    pub fn script_failure(msg: impl Into<String>) -> Self {
        Self::ScriptFailure(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a server exit.
    pub fn server_exit(msg: impl Into<String>) -> Self {
        Self::ServerExit(msg.into())
    }

    /// Create a broken wire error.
    pub fn broken_wire(msg: impl Into<String>) -> Self {
        Self::BrokenWire(msg.into())
    }

    /// Whether the client diverged from the script (deviations included).
    pub fn is_script_failure(&self) -> bool {
        matches!(self, Self::ScriptFailure(_) | Self::ScriptDeviation { .. })
    }

    /// Whether the connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::BrokenWire(_) | Self::Io(_))
            || matches!(self, Self::Bolt(BoltError::Io(_)))
    }
}

fn deviation_text(expected: &[String], received: &str, received_repr: &str) -> String {
    let mut text = String::from("Expected");
    if expected.len() > 1 {
        text.push_str(" one of");
    }
    text.push_str(":\n");
    text.push_str(&expected.join("\n"));
    text.push_str("\n\nReceived:\n");
    text.push_str(received);
    text.push_str("\n => ");
    text.push_str(received_repr);
    text
}

/// An error pinned to a script line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    /// Offending line, rendered with its number
    pub line: String,
    /// Line number
    pub line_number: usize,
    /// What is wrong
    pub message: String,
}

impl LineError {
    /// Create an error for a line.
    pub fn new(line: &Line, message: impl Into<String>) -> Self {
        Self {
            line: line.to_string(),
            line_number: line.number,
            message: message.into(),
        }
    }
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.line)
    }
}

impl std::error::Error for LineError {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deviation_single() {
        let err = StubError::ScriptDeviation {
            expected: vec![r#"(  4) C: RUN "x""#.to_string()],
            received: "BEGIN {}".to_string(),
            received_repr: "Structure[0x11|BEGIN]({})".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Expected:\n(  4) C: RUN \"x\"\n\nReceived:\nBEGIN {}\n => Structure[0x11|BEGIN]({})"
        );
        assert!(err.is_script_failure());
    }

    #[test]
    fn test_deviation_many() {
        let err = StubError::ScriptDeviation {
            expected: vec!["(  4) C: RESET".to_string(), "(  6) C: GOODBYE".to_string()],
            received: "RUN \"x\" {} {}".to_string(),
            received_repr: "Structure[0x10|RUN]('x', {}, {})".to_string(),
        };
        assert!(err.to_string().starts_with("Expected one of:\n(  4) C: RESET\n(  6) C: GOODBYE\n"));
    }

    #[test]
    fn test_line_error_display() {
        let line = Line::new(12, "!: FOO", "FOO");
        let err = LineError::new(&line, "unsupported Bang line: \"FOO\"");
        assert_eq!(err.to_string(), "unsupported Bang line: \"FOO\": ( 12) !: FOO");
        assert_eq!(err.line_number, 12);
    }

    #[test]
    fn test_classification() {
        assert!(StubError::broken_wire("Broken").is_connection_lost());
        assert!(!StubError::server_exit("bye").is_script_failure());
        assert!(StubError::script_failure("nope").is_script_failure());
    }
}

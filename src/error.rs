//! Error types for fincache.
//!
//! Components return typed errors; the command dispatcher is the only place
//! that renders them into wire-level error replies. Background tasks log and
//! count their failures instead of surfacing them to active requests.

use thiserror::Error;

/// A specialized `Result` type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed wire framing or an otherwise unparseable request.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command name not present in the registry.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Command invoked with the wrong number of arguments.
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// An argument failed integer parsing.
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// An argument failed float parsing.
    #[error("value is not a valid float")]
    NotAFloat,

    /// Key or member does not exist. Handlers translate this to a null
    /// bulk or a sentinel integer depending on the command.
    #[error("no such key")]
    NotFound,

    /// Command issued against a key holding an incompatible value type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// A domain constraint was violated (coordinate bounds, precision
    /// range, mismatched register precisions, ...). No state change.
    #[error("{0}")]
    Constraint(String),

    /// The key's slot is owned by another node.
    #[error("MOVED {slot} {addr}")]
    Moved {
        /// Slot the key hashes to.
        slot: u16,
        /// Address of the owning node.
        addr: String,
    },

    /// The key's slot has no connected owner.
    #[error("CLUSTERDOWN slot {0} has no reachable owner")]
    RoutingUnavailable(u16),

    /// Script compilation or execution failure.
    #[error("script error: {0}")]
    Script(String),

    /// Script exceeded its instruction or wall-clock budget.
    #[error("script exceeded {0} budget")]
    ScriptBudget(&'static str),

    /// No script loaded under the requested digest.
    #[error("NOSCRIPT No matching script")]
    NoScript,

    /// Snapshot encode/decode failure.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Configuration loading failure.
    #[error("config error: {0}")]
    Config(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render this error as the wire error line body (without the leading
    /// `-` or trailing CRLF). Only the dispatcher should call this.
    pub fn wire_message(&self) -> String {
        match self {
            // These carry their own Redis-style prefix.
            Error::WrongType | Error::Moved { .. } | Error::RoutingUnavailable(_) | Error::NoScript => {
                self.to_string()
            },
            Error::Protocol(msg) => format!("ERR Protocol error: {msg}"),
            other => format!("ERR {other}"),
        }
    }

    /// Whether this error leaves the connection usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Snapshot(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_use_canonical_prefixes() {
        assert_eq!(
            Error::UnknownCommand("frobnicate".into()).wire_message(),
            "ERR unknown command 'frobnicate'"
        );
        assert_eq!(
            Error::WrongArity("get".into()).wire_message(),
            "ERR wrong number of arguments for 'get' command"
        );
        assert_eq!(
            Error::NotAnInteger.wire_message(),
            "ERR value is not an integer or out of range"
        );
        assert!(Error::WrongType.wire_message().starts_with("WRONGTYPE"));
    }

    #[test]
    fn moved_error_names_slot_and_node() {
        let err = Error::Moved {
            slot: 5461,
            addr: "10.0.0.7:6379".into(),
        };
        assert_eq!(err.wire_message(), "MOVED 5461 10.0.0.7:6379");
    }

    #[test]
    fn io_errors_are_not_recoverable() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(!err.is_recoverable());
        assert!(Error::NotFound.is_recoverable());
    }
}

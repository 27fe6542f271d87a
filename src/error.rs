// ABOUTME: Error taxonomy shared by the codec, transport, RPC client, manager and streamer
// ABOUTME: Structured error reporting with automatic conversion from I/O and codec failures

use std::io;
use thiserror::Error;

use crate::htsmsg::CodecError;

/// Errors produced anywhere in the HTSP client core.
///
/// The taxonomy mirrors the kinds a Tvheadend integration actually needs
/// to distinguish: transport failures are retryable by reconnecting,
/// protocol failures are not, and `NotFound` is handled locally by the
/// manager as "create new" rather than surfaced to a caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed listener address or unparseable configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connect/read/write/close failure, or the peer reset the connection.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Length mismatch, truncated field, illegal name length, unknown type.
    #[error("framing error: {0}")]
    Framing(String),

    /// Version too old, `noaccess` on authenticate, or an `error` field in
    /// a response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A call's waiter was not fulfilled within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// A caller-supplied channel id, event id, or URL did not match
    /// anything the server or the local cache knows about.
    #[error("value error: {0}")]
    Value(String),

    /// Catalogue lookup miss; the manager treats this as "create new".
    #[error("not found")]
    NotFound,
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::Framing(err.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

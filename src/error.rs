use std::sync::Arc;

use thiserror::Error as ThisError;

use crate::adapter::AdapterError;
use crate::parser::ProtocolError;

/// Errors surfaced to callers.
///
/// Anything that can desynchronize the multiplexer (malformed bytes, a stall,
/// a lost stream) closes the connection; anything that can be isolated to one
/// request (a type mismatch, a server error reply) fails only that request
/// and the connection continues.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// The request could not be (re)sent on a live connection.
    #[error("not connected")]
    NotConnected,

    /// The connection was closed by the caller.
    #[error("operation canceled")]
    OperationCanceled,

    /// No data arrived within twice the health check interval.
    #[error("idle timeout")]
    IdleTimeout,

    /// The connection was lost while this request's reply was being read.
    #[error("read interrupted")]
    ReadInterrupted,

    /// Name resolution did not finish within `resolve_timeout`.
    #[error("resolve timeout")]
    ResolveTimeout,

    /// No endpoint accepted the connection within `connect_timeout`.
    #[error("connect timeout")]
    ConnectTimeout,

    /// The server rejected the HELLO handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed bytes on the wire. Fatal for the connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The reply did not fit the requested destination shape.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// A well-formed error reply from the server.
    #[error("server error: {0}")]
    Server(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(Arc::new(err))
    }
}

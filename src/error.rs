//! Error taxonomy for the RPC core.
//!
//! Handler and transform failures never escape the socket boundary: they
//! are caught at the dispatch site and reported as `{ok:false, error}` wire
//! payloads. [`RpcError`] exists for the paths that *do* need to propagate
//! to a caller — registration time, transport setup, and reaper bookkeeping.

use thiserror::Error;

/// Errors raised by the RPC core.
#[derive(Debug, Error)]
pub enum RpcError {
    /// A malformed frame, chunking header, or call/result payload was
    /// received. The offending transport session is force-closed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The WebSocket handshake did not carry a `clientId` query parameter.
    #[error("connection refused: {0}")]
    ConnectionRefused(&'static str),

    /// `invokeRpc`/`invokeStream` was asked for a name no router has.
    #[error("{0} is not a registered RPC")]
    EndpointNotFound(String),

    /// A handler raised an exception while processing a call.
    #[error("{0}")]
    HandlerException(String),

    /// A serializer/deserializer step in the transform pipeline failed.
    #[error("transform failed: {0}")]
    TransformError(String),

    /// A server-to-client call was reaped by the timeout sweep before the
    /// client replied.
    #[error("future timed out")]
    FutureTimeout,

    /// `Router::add` was called with a name already registered on that
    /// router.
    #[error("{0} is already registered")]
    DuplicateEndpoint(String),

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket transport itself faulted (protocol violation at the
    /// HTTP/WebSocket layer, below where this crate's own framing applies).
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),
}

impl RpcError {
    /// Render this error the way it appears in an `{ok:false, error}` wire
    /// payload. Handler and transform errors are reported as their bare
    /// message, matching `str(exception)` in the reference implementation.
    #[must_use]
    pub fn wire_message(&self) -> String {
        match self {
            Self::HandlerException(msg) | Self::TransformError(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

use std::time::Duration;

/// The peer broke the message protocol. Fails the affected request, not the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unknown method {0:?}")]
    UnknownMethod(String),
    #[error("request id {0} is already in flight")]
    RequestIdCollision(u64),
    #[error("protocol violation: {0}")]
    Violation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("handshake did not finish within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The node answered with an error response.
    #[error("node error: {0}")]
    Node(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// The caller gave up waiting. The request may still be processed by the
    /// node.
    #[error("request cancelled")]
    Cancelled,
}

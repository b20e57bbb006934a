/// Failures of the channel between one client and the server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not be bound or stopped accepting.
    #[error("listener failed: {0}")]
    Listen(#[source] std::io::Error),

    /// A TCP stream arrived but never became a WebSocket.
    #[error("upgrade rejected: {0}")]
    Upgrade(String),

    /// The peer went away; the message says how.
    #[error("channel closed: {0}")]
    Closed(String),

    /// Writing a frame failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Reading a frame failed.
    #[error("read failed: {0}")]
    Read(String),
}

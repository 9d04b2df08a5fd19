/// Errors that can occur in connection, server and client operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pipelink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] pipelink_frame::FrameError),

    /// Payload could not be encoded or decoded.
    #[error("message error: {0}")]
    Message(#[from] pipelink_message::MessageError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A blocking step did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No connection is established, or it has already closed.
    #[error("not connected")]
    NotConnected,

    /// No registered connection has this identity.
    #[error("unknown connection {0:?}")]
    UnknownConnection(String),

    /// The client gave up connecting.
    #[error("gave up connecting after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// `start` was called twice.
    #[error("already started")]
    AlreadyStarted,

    /// The server or client was stopped and cannot be started again.
    #[error("stopped")]
    Stopped,

    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PeerError>;

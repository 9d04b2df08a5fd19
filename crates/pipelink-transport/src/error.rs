use std::path::PathBuf;

/// Errors that can occur in IPC transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified endpoint.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The endpoint name cannot be mapped to a socket path.
    #[error("invalid endpoint name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

impl TransportError {
    /// True when the endpoint simply is not there yet (no listener bound).
    ///
    /// Clients treat this as a retry condition rather than a failure.
    pub fn is_endpoint_missing(&self) -> bool {
        match self {
            TransportError::Connect { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

use std::fmt;
use std::io;

use pipelink_frame::FrameError;
use pipelink_peer::PeerError;
use pipelink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => {
            TRANSPORT_ERROR
        }
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidName { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::Truncated { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Message(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PeerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::HandshakeFailed(_) | PeerError::RetriesExhausted { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        PeerError::NotConnected => CliError::new(FAILURE, format!("{context}: {err}")),
        PeerError::UnknownConnection(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn missing_endpoint_maps_to_transport_error() {
        let err = PeerError::Transport(TransportError::Connect {
            path: PathBuf::from("/tmp/none.sock"),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        assert_eq!(peer_error("connect failed", err).code, TRANSPORT_ERROR);
    }

    #[test]
    fn exhausted_retries_keep_context() {
        let err = peer_error(
            "client stopped",
            PeerError::RetriesExhausted {
                attempts: 3,
                last_error: "refused".to_string(),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("client stopped: gave up connecting after 3 attempts"));
    }

    #[test]
    fn handshake_timeout_maps_to_timeout() {
        let err = peer_error("handshake", PeerError::Timeout(std::time::Duration::from_secs(5)));
        assert_eq!(err.code, TIMEOUT);
    }
}

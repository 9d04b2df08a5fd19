use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use pipelink_frame::{FrameError, FrameReader, FrameWriter, ReadOutcome};
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_CONNECTION_ID_LEN: usize = 128;

/// Frame written by the server right after accepting a client.
///
/// It names the protocol and tells the client which identity the server
/// registered it under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeOffer {
    pub protocol: String,
    pub version: String,
    pub connection: String,
}

/// Configuration for the greeting exchanged on a fresh stream.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Bound on writing (server) or reading (client) the offer.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version, `<major>.<minor>`.
    pub protocol_version: String,
    /// Largest offer frame accepted, in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "pipelink".to_string(),
            protocol_version: "1.0".to_string(),
            max_handshake_payload: 16 * 1024,
        }
    }
}

impl HandshakeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Write the offer for `connection` as a single frame.
pub fn send_offer<W: Write>(
    writer: &mut FrameWriter<W>,
    connection: &str,
    config: &HandshakeConfig,
) -> Result<()> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_connection_id(connection)?;

    let offer = HandshakeOffer {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        connection: connection.to_string(),
    };
    let payload = serde_json::to_vec(&offer).map_err(pipelink_message::MessageError::from)?;
    writer.send(&payload).map_err(|err| timeout_or(err, config.timeout))
}

/// Read and validate the server's offer.
///
/// The caller is responsible for putting a read timeout on the stream;
/// a timed out read is reported as [`PeerError::Timeout`].
pub fn receive_offer<R: Read>(
    reader: &mut FrameReader<R>,
    config: &HandshakeConfig,
) -> Result<HandshakeOffer> {
    let payload = match reader.read_frame() {
        Ok(ReadOutcome::Payload(payload)) => payload,
        Ok(ReadOutcome::EndOfStream) => {
            return Err(PeerError::HandshakeFailed(
                "connection closed during handshake".to_string(),
            ))
        }
        Err(FrameError::PayloadTooLarge { size, max }) => {
            return Err(PeerError::HandshakeFailed(format!(
                "handshake payload too large: {size} (max {max})"
            )))
        }
        Err(err) => return Err(timeout_or(err, config.timeout)),
    };
    if payload.len() > config.max_handshake_payload {
        return Err(PeerError::HandshakeFailed(format!(
            "handshake payload too large: {} (max {})",
            payload.len(),
            config.max_handshake_payload
        )));
    }

    let offer: HandshakeOffer =
        serde_json::from_slice(&payload).map_err(pipelink_message::MessageError::from)?;

    validate_protocol_name(&offer.protocol)?;
    validate_version(&offer.version)?;
    validate_connection_id(&offer.connection)?;

    if offer.protocol != config.protocol_name {
        return Err(PeerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            offer.protocol, config.protocol_name
        )));
    }
    if !is_version_compatible(&config.protocol_version, &offer.version)? {
        return Err(PeerError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            offer.version, config.protocol_version
        )));
    }

    Ok(offer)
}

fn timeout_or(err: FrameError, timeout: Duration) -> PeerError {
    match err {
        FrameError::Io(io)
            if io.kind() == ErrorKind::WouldBlock || io.kind() == ErrorKind::TimedOut =>
        {
            PeerError::Timeout(timeout)
        }
        other => PeerError::Frame(other),
    }
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    parse_version(version).map(|_| ())
}

fn validate_connection_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_CONNECTION_ID_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid connection id length: {}",
            id.len()
        )));
    }
    Ok(())
}

fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;

    Ok(client_major == server_major && client_minor >= server_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |what: &str| PeerError::HandshakeFailed(format!("invalid version '{version}': {what}"));

    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| invalid("expected '<major>.<minor>'"))?;
    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;

    Ok((major, minor))
}

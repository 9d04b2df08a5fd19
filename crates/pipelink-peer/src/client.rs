use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pipelink_frame::{FrameConfig, FrameReader};
use pipelink_message::PipeMessage;
use pipelink_transport::{Endpoint, IpcStream, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{PeerError, Result};
use crate::event::{ClientEvent, ConnectionEvent};
use crate::handshake::{receive_offer, HandshakeConfig};
use crate::sync::{lock, Signal};

/// Backoff between connect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Give up after this many failed attempts; `None` retries until stopped.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): doubles from
    /// `initial_delay`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub frame: FrameConfig,
    pub handshake: HandshakeConfig,
    pub retry: RetryPolicy,
    /// Connect again after the server disconnects or the connection fails.
    pub auto_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            handshake: HandshakeConfig::default(),
            retry: RetryPolicy::default(),
            auto_reconnect: true,
        }
    }
}

impl ClientConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake.timeout = timeout;
        self
    }
}

/// Connects to a named endpoint, retrying until the server shows up.
///
/// A supervisor thread owns the connect loop. A missing endpoint is only a
/// reason to wait and retry; the client reports an error when retries are
/// exhausted or an established connection fails.
pub struct PipeClient<T: PipeMessage> {
    endpoint: Endpoint,
    config: ClientConfig,
    shared: Arc<ClientShared<T>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

struct ClientShared<T> {
    events: Sender<ClientEvent<T>>,
    stop: Signal,
    current: Mutex<Option<Connection<T>>>,
    /// Stream still in handshake, kept so `stop` can shut it down.
    pending: Mutex<Option<IpcStream>>,
}

impl<T: PipeMessage> PipeClient<T> {
    /// Create a client for the pipe `name` with default configuration.
    pub fn new(name: &str) -> Result<(Self, Receiver<ClientEvent<T>>)> {
        Ok(Self::with_config(Endpoint::from_name(name)?, ClientConfig::default()))
    }

    pub fn with_config(endpoint: Endpoint, config: ClientConfig) -> (Self, Receiver<ClientEvent<T>>) {
        let (events, rx) = mpsc::channel();
        let client = Self {
            endpoint,
            config,
            shared: Arc::new(ClientShared {
                events,
                stop: Signal::new(),
                current: Mutex::new(None),
                pending: Mutex::new(None),
            }),
            supervisor: Mutex::new(None),
        };
        (client, rx)
    }

    /// Start connecting in the background. Returns immediately.
    pub fn start(&self) -> Result<()> {
        if self.shared.stop.is_fired() {
            return Err(PeerError::Stopped);
        }
        let mut supervisor = lock(&self.supervisor);
        if supervisor.is_some() {
            return Err(PeerError::AlreadyStarted);
        }

        let name = format!("pipelink-client-{}", self.endpoint.name());
        let shared = Arc::clone(&self.shared);
        let endpoint = self.endpoint.clone();
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || shared.supervise(&endpoint, &config))
            .map_err(|source| PeerError::Spawn { name, source })?;
        *supervisor = Some(handle);
        Ok(())
    }

    /// Send `value` over the current connection.
    pub fn send(&self, value: &T) -> Result<()> {
        let conn = lock(&self.shared.current).clone();
        match conn {
            Some(conn) => conn.send(value),
            None => Err(PeerError::NotConnected),
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.current)
            .as_ref()
            .is_some_and(Connection::is_connected)
    }

    /// Identity the server assigned to the current connection.
    pub fn connection_name(&self) -> Option<String> {
        lock(&self.shared.current)
            .as_ref()
            .map(|conn| conn.name().to_string())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Cancel connecting, close the connection and join the supervisor.
    ///
    /// Idempotent. No event is delivered once this returns.
    pub fn stop(&self) {
        self.shared.stop.fire();

        if let Some(stream) = lock(&self.shared.pending).take() {
            let _ = stream.shutdown();
        }
        if let Some(conn) = lock(&self.shared.current).take() {
            conn.stop();
        }
        if let Some(handle) = lock(&self.supervisor).take() {
            if handle.join().is_err() {
                warn!(pipe = self.endpoint.name(), "client supervisor panicked");
            }
        }
    }
}

impl<T: PipeMessage> Drop for PipeClient<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: PipeMessage> ClientShared<T> {
    fn supervise(&self, endpoint: &Endpoint, config: &ClientConfig) {
        loop {
            let conn = match self.connect_with_retry(endpoint, config) {
                Ok(Some(conn)) => conn,
                Ok(None) => return,
                Err(err) => {
                    warn!(pipe = endpoint.name(), error = %err, "giving up connecting");
                    self.emit(ClientEvent::Error(err));
                    return;
                }
            };

            let started = {
                let mut current = lock(&self.current);
                if self.stop.is_fired() {
                    conn.stop();
                    return;
                }
                *current = Some(conn.clone());
                let name = conn.name().to_string();
                let started = conn.start_with(|| self.emit(ClientEvent::Connected(name)));
                if started.is_err() {
                    current.take();
                }
                started
            };

            match started {
                Ok(()) => {
                    info!(pipe = endpoint.name(), connection = conn.name(), "connected");
                    conn.wait_closed();
                }
                Err(err) if !self.stop.is_fired() => self.emit(ClientEvent::Error(err)),
                Err(_) => {}
            }
            lock(&self.current).take();

            if !config.auto_reconnect || self.stop.is_fired() {
                return;
            }
            debug!(pipe = endpoint.name(), "reconnecting");
        }
    }

    /// `Ok(None)` means the loop was stopped.
    fn connect_with_retry(&self, endpoint: &Endpoint, config: &ClientConfig) -> Result<Option<Connection<T>>> {
        let mut attempt = 0u32;
        loop {
            if self.stop.is_fired() {
                return Ok(None);
            }
            attempt += 1;

            let err = match self.try_connect(endpoint, config) {
                Ok(conn) => return Ok(Some(conn)),
                Err(err) => err,
            };
            if self.stop.is_fired() {
                return Ok(None);
            }
            if config.retry.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(PeerError::RetriesExhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = config.retry.delay_for(attempt);
            match &err {
                PeerError::Transport(transport) if transport.is_endpoint_missing() => {
                    debug!(pipe = endpoint.name(), attempt, ?delay, "endpoint not available yet");
                }
                _ => warn!(pipe = endpoint.name(), attempt, ?delay, error = %err, "connect attempt failed"),
            }
            if self.stop.wait_timeout(delay) {
                return Ok(None);
            }
        }
    }

    fn try_connect(&self, endpoint: &Endpoint, config: &ClientConfig) -> Result<Connection<T>> {
        let stream = UnixDomainSocket::connect(endpoint)?;
        *lock(&self.pending) = Some(stream.try_clone()?);
        if self.stop.is_fired() {
            lock(&self.pending).take();
            return Err(PeerError::Stopped);
        }

        let offered = handshake(&stream, config);
        lock(&self.pending).take();
        let offer = offered?;

        let events = self.events.clone();
        Connection::new(offer.connection, stream, config.frame.clone(), move |event| {
            let _ = events.send(match event {
                ConnectionEvent::Message(value) => ClientEvent::ServerMessage(value),
                ConnectionEvent::Disconnected => ClientEvent::Disconnected,
                ConnectionEvent::Error(err) => ClientEvent::Error(err),
            });
        })
    }

    fn emit(&self, event: ClientEvent<T>) {
        let _ = self.events.send(event);
    }
}

fn handshake(stream: &IpcStream, config: &ClientConfig) -> Result<crate::handshake::HandshakeOffer> {
    stream.set_read_timeout(Some(config.handshake.timeout))?;
    let frame = FrameConfig {
        max_payload_size: config.handshake.max_handshake_payload,
        ..config.frame.clone()
    };
    let mut reader = FrameReader::with_config(stream.try_clone()?, frame);
    receive_offer(&mut reader, &config.handshake)
}

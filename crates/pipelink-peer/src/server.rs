use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pipelink_frame::{FrameConfig, FrameWriter};
use pipelink_message::PipeMessage;
use pipelink_transport::{Endpoint, IpcStream, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{PeerError, Result};
use crate::event::{ConnectionEvent, ServerEvent};
use crate::handshake::{send_offer, HandshakeConfig};
use crate::sync::{lock, Signal};

/// Server tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Frame limits and timeouts applied to every accepted connection.
    pub frame: FrameConfig,
    pub handshake: HandshakeConfig,
    /// Pause after a failed accept before trying again.
    pub accept_retry_delay: Duration,
    /// Longest wait for a client before the accept loop checks for `stop`.
    pub accept_poll_interval: Duration,
    /// How long `stop` waits for each connection's reader to exit.
    pub stop_timeout: Duration,
    /// Permission bits of the socket file.
    pub socket_mode: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            handshake: HandshakeConfig::default(),
            accept_retry_delay: Duration::from_millis(100),
            accept_poll_interval: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(2),
            socket_mode: 0o600,
        }
    }
}

impl ServerConfig {
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_handshake_config(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }
}

/// Accepts any number of clients on one named endpoint.
///
/// Each accepted client gets the identity `client-<n>`, is told that identity
/// in a handshake frame, and is registered until it disconnects. Events from
/// every client arrive on the receiver returned by [`PipeServer::new`].
pub struct PipeServer<T: PipeMessage> {
    endpoint: Endpoint,
    config: ServerConfig,
    shared: Arc<ServerShared<T>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

struct ServerShared<T> {
    registry: Mutex<Registry<T>>,
    events: Sender<ServerEvent<T>>,
    stop: Signal,
    accept_done: Signal,
    next_id: AtomicU64,
}

struct Registry<T> {
    open: bool,
    started: bool,
    connections: HashMap<String, Connection<T>>,
}

impl<T: PipeMessage> PipeServer<T> {
    /// Create a server for the pipe `name` with default configuration.
    pub fn new(name: &str) -> Result<(Self, Receiver<ServerEvent<T>>)> {
        Ok(Self::with_config(Endpoint::from_name(name)?, ServerConfig::default()))
    }

    pub fn with_config(endpoint: Endpoint, config: ServerConfig) -> (Self, Receiver<ServerEvent<T>>) {
        let (events, rx) = mpsc::channel();
        let server = Self {
            endpoint,
            config,
            shared: Arc::new(ServerShared {
                registry: Mutex::new(Registry {
                    open: true,
                    started: false,
                    connections: HashMap::new(),
                }),
                events,
                stop: Signal::new(),
                accept_done: Signal::new(),
                next_id: AtomicU64::new(1),
            }),
            accept_thread: Mutex::new(None),
        };
        (server, rx)
    }

    /// Bind the endpoint and start accepting clients in the background.
    ///
    /// Binding happens before this returns, so a client started afterwards
    /// finds the endpoint.
    pub fn start(&self) -> Result<()> {
        {
            let mut registry = lock(&self.shared.registry);
            if !registry.open {
                return Err(PeerError::Stopped);
            }
            if registry.started {
                return Err(PeerError::AlreadyStarted);
            }
            registry.started = true;
        }

        let listener = match UnixDomainSocket::bind_with_mode(&self.endpoint, self.config.socket_mode) {
            Ok(listener) => listener,
            Err(err) => {
                lock(&self.shared.registry).started = false;
                return Err(err.into());
            }
        };

        let name = format!("pipelink-accept-{}", self.endpoint.name());
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || shared.accept_loop(listener, config))
            .map_err(|source| PeerError::Spawn { name, source })?;
        *lock(&self.accept_thread) = Some(handle);

        info!(pipe = self.endpoint.name(), "server started");
        Ok(())
    }

    /// Send `value` to every registered client.
    ///
    /// The value is encoded once. Returns how many clients it was queued for;
    /// a client that cannot take it is skipped.
    pub fn broadcast(&self, value: &T) -> Result<usize> {
        let payload = value.encode()?;
        let targets: Vec<Connection<T>> = lock(&self.shared.registry)
            .connections
            .values()
            .cloned()
            .collect();

        let mut queued = 0;
        for conn in targets {
            match conn.send_bytes(payload.clone()) {
                Ok(()) => queued += 1,
                Err(err) => debug!(connection = conn.name(), error = %err, "broadcast skipped"),
            }
        }
        Ok(queued)
    }

    /// Send `value` to the client registered as `id`.
    pub fn send(&self, id: &str, value: &T) -> Result<()> {
        let conn = lock(&self.shared.registry)
            .connections
            .get(id)
            .cloned()
            .ok_or_else(|| PeerError::UnknownConnection(id.to_string()))?;
        conn.send(value)
    }

    /// Identities of registered clients, sorted.
    pub fn connections(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.shared.registry)
            .connections
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.shared.registry).connections.len()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_running(&self) -> bool {
        lock(&self.accept_thread).is_some() && !self.shared.stop.is_fired()
    }

    /// Stop accepting, stop every client, and clear the registry.
    ///
    /// Idempotent. No event is delivered once this returns.
    pub fn stop(&self) {
        self.shared.stop.fire();

        if let Some(handle) = lock(&self.accept_thread).take() {
            // The loop notices the signal within one poll interval, or once an
            // in-flight handshake write gives up.
            let bound = self.config.accept_poll_interval + self.config.handshake.timeout;
            if self.shared.accept_done.wait_timeout(bound) || handle.is_finished() {
                if handle.join().is_err() {
                    warn!(pipe = self.endpoint.name(), "accept thread panicked");
                }
            } else {
                warn!(pipe = self.endpoint.name(), "accept thread did not exit in time; detaching it");
            }
        }

        let drained: Vec<Connection<T>> = {
            let mut registry = lock(&self.shared.registry);
            registry.open = false;
            registry.connections.drain().map(|(_, conn)| conn).collect()
        };
        for conn in &drained {
            conn.stop();
        }
        for conn in &drained {
            if !conn.wait_closed_timeout(self.config.stop_timeout) {
                warn!(connection = conn.name(), "connection did not close in time");
            }
        }
        if !drained.is_empty() {
            info!(pipe = self.endpoint.name(), clients = drained.len(), "server stopped");
        }
    }
}

impl<T: PipeMessage> Drop for PipeServer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: PipeMessage> ServerShared<T> {
    fn accept_loop(self: Arc<Self>, listener: UnixDomainSocket, config: ServerConfig) {
        while !self.stop.is_fired() {
            match listener.accept_timeout(config.accept_poll_interval) {
                Ok(None) => {}
                Ok(Some(_)) if self.stop.is_fired() => break,
                Ok(Some(stream)) => self.admit(stream, &config),
                Err(err) => {
                    warn!(pipe = listener.endpoint().name(), error = %err, "accept failed");
                    self.emit(ServerEvent::Error {
                        connection: None,
                        error: err.into(),
                    });
                    if self.stop.wait_timeout(config.accept_retry_delay) {
                        break;
                    }
                }
            }
        }
        debug!(pipe = listener.endpoint().name(), "accept loop exited");
        drop(listener);
        self.accept_done.fire();
    }

    fn admit(self: &Arc<Self>, stream: IpcStream, config: &ServerConfig) {
        let id = format!("client-{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        if let Err(err) = offer(&stream, &id, &config.handshake) {
            warn!(connection = %id, error = %err, "handshake failed");
            self.emit(ServerEvent::Error {
                connection: None,
                error: err,
            });
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let sink_id = id.clone();
        let conn = match Connection::new(id.clone(), stream, config.frame.clone(), move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_connection_event(&sink_id, event);
            }
        }) {
            Ok(conn) => conn,
            Err(err) => {
                self.emit(ServerEvent::Error {
                    connection: Some(id),
                    error: err,
                });
                return;
            }
        };

        // Starting under the registry lock keeps the insert ahead of any
        // removal by the connection's own reader, and announcing from inside
        // `start_with` keeps `ClientConnected` ahead of its first message.
        let mut registry = lock(&self.registry);
        if !registry.open {
            return;
        }
        registry.connections.insert(id.clone(), conn.clone());
        let started = conn.start_with(|| self.emit(ServerEvent::ClientConnected(id.clone())));
        match started {
            Ok(()) => info!(connection = %id, "client connected"),
            Err(err) => {
                registry.connections.remove(&id);
                self.emit(ServerEvent::Error {
                    connection: Some(id),
                    error: err,
                });
            }
        }
    }

    /// Runs on a connection thread with that connection's state locked.
    fn on_connection_event(&self, id: &str, event: ConnectionEvent<T>) {
        match event {
            ConnectionEvent::Message(value) => {
                self.emit(ServerEvent::ClientMessage(id.to_string(), value));
            }
            ConnectionEvent::Disconnected => self.remove(id),
            ConnectionEvent::Error(error) => {
                self.emit(ServerEvent::Error {
                    connection: Some(id.to_string()),
                    error,
                });
                self.remove(id);
            }
        }
    }

    fn remove(&self, id: &str) {
        let mut registry = lock(&self.registry);
        if registry.connections.remove(id).is_some() {
            self.emit(ServerEvent::ClientDisconnected(id.to_string()));
            info!(connection = %id, "client disconnected");
        }
    }

    fn emit(&self, event: ServerEvent<T>) {
        let _ = self.events.send(event);
    }
}

fn offer(stream: &IpcStream, id: &str, config: &HandshakeConfig) -> Result<()> {
    stream.set_write_timeout(Some(config.timeout))?;
    let mut writer = FrameWriter::new(stream.try_clone()?);
    send_offer(&mut writer, id, config)
}

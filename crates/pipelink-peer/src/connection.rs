use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use pipelink_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, ReadOutcome};
use pipelink_message::PipeMessage;
use pipelink_transport::IpcStream;
use tracing::{debug, trace, warn};

use crate::error::{PeerError, Result};
use crate::event::ConnectionEvent;
use crate::sync::{lock, Signal};

/// Lifecycle of a [`Connection`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

type Sink<T> = Box<dyn FnMut(ConnectionEvent<T>) + Send>;

/// One open stream carrying typed messages in both directions.
///
/// A started connection runs a reader thread that decodes frames into `T`
/// and hands them to the event sink, and a writer thread that drains a FIFO
/// queue of encoded payloads, so frames from concurrent senders never
/// interleave. Cloning yields another handle to the same connection.
pub struct Connection<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    name: String,
    /// Handle used only to shut the stream down.
    stream: IpcStream,
    max_payload_size: usize,
    cell: Mutex<Cell<T>>,
    outbound: Mutex<Option<Sender<Bytes>>>,
    closed: Signal,
}

struct Cell<T> {
    state: ConnectionState,
    sink: Option<Sink<T>>,
    parts: Option<Parts>,
}

struct Parts {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    outbound_tx: Sender<Bytes>,
    outbound_rx: Receiver<Bytes>,
}

impl<T: PipeMessage> Connection<T> {
    /// Wrap an open stream. Nothing is read or written until [`start`](Self::start).
    ///
    /// `sink` is called from the reader thread (and, for write failures, the
    /// writer thread) while the connection is `Connected`. It must not call
    /// back into this connection.
    pub fn new<F>(name: impl Into<String>, stream: IpcStream, config: FrameConfig, sink: F) -> Result<Self>
    where
        F: FnMut(ConnectionEvent<T>) + Send + 'static,
    {
        let reader = FrameReader::with_config_ipc(stream.try_clone()?, config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream.try_clone()?, config.clone())?;
        let (outbound_tx, outbound_rx) = mpsc::channel();

        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                stream,
                max_payload_size: config.max_payload_size,
                cell: Mutex::new(Cell {
                    state: ConnectionState::Connecting,
                    sink: Some(Box::new(sink)),
                    parts: Some(Parts {
                        reader,
                        writer,
                        outbound_tx,
                        outbound_rx,
                    }),
                }),
                outbound: Mutex::new(None),
                closed: Signal::new(),
            }),
        })
    }

    /// Wrap an open stream and deliver its events over a channel.
    pub fn with_channel(
        name: impl Into<String>,
        stream: IpcStream,
        config: FrameConfig,
    ) -> Result<(Self, Receiver<ConnectionEvent<T>>)> {
        let (tx, rx) = mpsc::channel();
        let conn = Self::new(name, stream, config, move |event| {
            let _ = tx.send(event);
        })?;
        Ok((conn, rx))
    }

    /// Move to `Connected` and spawn the reader and writer threads.
    pub fn start(&self) -> Result<()> {
        self.start_with(|| {})
    }

    /// Like [`start`](Self::start), running `announce` once the connection
    /// accepts sends but before the reader can deliver any event.
    ///
    /// Publishing the connection from `announce` means whoever hears about it
    /// can send straight away, and its first message is never reported ahead
    /// of the announcement. `announce` runs only if starting succeeds, with
    /// this connection's state locked, so it must not call back into it.
    pub fn start_with<F: FnOnce()>(&self, announce: F) -> Result<()> {
        let mut cell = lock(&self.inner.cell);
        match cell.state {
            ConnectionState::Connecting => {}
            ConnectionState::Connected | ConnectionState::Closing => {
                return Err(PeerError::AlreadyStarted)
            }
            ConnectionState::Closed => return Err(PeerError::NotConnected),
        }
        let Some(parts) = cell.parts.take() else {
            return Err(PeerError::AlreadyStarted);
        };
        let Parts {
            reader,
            writer,
            outbound_tx,
            outbound_rx,
        } = parts;

        cell.state = ConnectionState::Connected;
        *lock(&self.inner.outbound) = Some(outbound_tx);

        let rx_name = format!("pipelink-rx-{}", self.inner.name);
        let inner = Arc::clone(&self.inner);
        if let Err(source) = thread::Builder::new()
            .name(rx_name.clone())
            .spawn(move || inner.read_loop(reader))
        {
            cell.state = ConnectionState::Closed;
            cell.sink = None;
            drop(cell);
            self.inner.release();
            self.inner.closed.fire();
            return Err(PeerError::Spawn {
                name: rx_name,
                source,
            });
        }

        let tx_name = format!("pipelink-tx-{}", self.inner.name);
        let inner = Arc::clone(&self.inner);
        if let Err(source) = thread::Builder::new()
            .name(tx_name.clone())
            .spawn(move || inner.write_loop(writer, outbound_rx))
        {
            // The reader thread observes the shutdown and finishes closing.
            cell.state = ConnectionState::Closing;
            drop(cell);
            self.inner.release();
            return Err(PeerError::Spawn {
                name: tx_name,
                source,
            });
        }

        announce();
        drop(cell);
        debug!(connection = %self.inner.name, "connection started");
        Ok(())
    }

    /// Encode `value` on the calling thread and queue it for writing.
    ///
    /// Encoding errors are returned here; write errors close the connection
    /// and surface as [`ConnectionEvent::Error`].
    pub fn send(&self, value: &T) -> Result<()> {
        let payload = value.encode()?;
        self.send_bytes(payload)
    }

    /// Queue an already encoded payload.
    pub fn send_bytes(&self, payload: Bytes) -> Result<()> {
        if payload.len() > self.inner.max_payload_size {
            return Err(PeerError::Frame(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.inner.max_payload_size,
            }));
        }
        let outbound = lock(&self.inner.outbound);
        let Some(tx) = outbound.as_ref() else {
            return Err(PeerError::NotConnected);
        };
        trace!(connection = %self.inner.name, size = payload.len(), "queued frame");
        tx.send(payload).map_err(|_| PeerError::NotConnected)
    }

    /// Stop the connection. No event is delivered once this returns.
    ///
    /// Idempotent. The reader thread exits shortly after; use
    /// [`wait_closed`](Self::wait_closed) to wait for it.
    pub fn stop(&self) {
        let mut cell = lock(&self.inner.cell);
        match cell.state {
            ConnectionState::Connecting => {
                cell.state = ConnectionState::Closed;
                cell.parts = None;
                cell.sink = None;
                drop(cell);
                self.inner.release();
                self.inner.closed.fire();
            }
            ConnectionState::Connected => {
                cell.state = ConnectionState::Closing;
                drop(cell);
                self.inner.release();
                debug!(connection = %self.inner.name, "connection stopped");
            }
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
    }

    /// Identity of this connection.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.cell).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Block until the connection reaches `Closed`.
    pub fn wait_closed(&self) {
        self.inner.closed.wait();
    }

    /// Like [`wait_closed`](Self::wait_closed) with a bound. Returns whether it closed.
    pub fn wait_closed_timeout(&self, timeout: Duration) -> bool {
        self.inner.closed.wait_timeout(timeout)
    }
}

impl<T: PipeMessage> Inner<T> {
    fn read_loop(&self, mut reader: FrameReader<IpcStream>) {
        let exit = loop {
            match reader.read_frame() {
                Ok(ReadOutcome::Payload(payload)) => {
                    let size = payload.len();
                    match T::decode(payload) {
                        Ok(value) => {
                            trace!(connection = %self.name, size, "received frame");
                            if !self.emit(ConnectionEvent::Message(value)) {
                                break None;
                            }
                        }
                        Err(err) => break Some(ConnectionEvent::Error(err.into())),
                    }
                }
                Ok(ReadOutcome::EndOfStream) => break Some(ConnectionEvent::Disconnected),
                Err(err) => break Some(ConnectionEvent::Error(err.into())),
            }
        };
        self.finish(exit);
    }

    fn write_loop(&self, mut writer: FrameWriter<IpcStream>, outbound: Receiver<Bytes>) {
        for payload in outbound {
            if let Err(err) = writer.send(&payload) {
                self.fail(err.into());
                return;
            }
        }
    }

    /// Deliver `event` if still connected. Returns false once the connection
    /// has left `Connected`.
    fn emit(&self, event: ConnectionEvent<T>) -> bool {
        let mut cell = lock(&self.cell);
        if cell.state != ConnectionState::Connected {
            return false;
        }
        if let Some(sink) = cell.sink.as_mut() {
            sink(event);
        }
        true
    }

    /// Write-side failure: report it once, then close.
    fn fail(&self, err: PeerError) {
        let mut cell = lock(&self.cell);
        if cell.state == ConnectionState::Connected {
            warn!(connection = %self.name, error = %err, "write failed");
            if let Some(sink) = cell.sink.as_mut() {
                sink(ConnectionEvent::Error(err));
            }
            cell.state = ConnectionState::Closing;
        }
        drop(cell);
        self.release();
    }

    /// Reader exit: report the terminal event if nobody else did, then close.
    fn finish(&self, exit: Option<ConnectionEvent<T>>) {
        let mut cell = lock(&self.cell);
        if cell.state == ConnectionState::Connected {
            if let Some(event) = exit {
                match &event {
                    ConnectionEvent::Error(err) => {
                        warn!(connection = %self.name, error = %err, "connection failed")
                    }
                    _ => debug!(connection = %self.name, "peer disconnected"),
                }
                if let Some(sink) = cell.sink.as_mut() {
                    sink(event);
                }
            }
            cell.state = ConnectionState::Closing;
        }
        self.release();
        cell.state = ConnectionState::Closed;
        cell.sink = None;
        drop(cell);
        self.closed.fire();
    }

    /// Close the outbound queue and shut the stream so both threads unblock.
    fn release(&self) {
        lock(&self.outbound).take();
        if let Err(err) = self.stream.shutdown() {
            trace!(connection = %self.name, error = %err, "shutdown failed");
        }
    }
}

impl<T> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("state", &lock(&self.inner.cell).state)
            .finish()
    }
}

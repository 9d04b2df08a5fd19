//! Events observed by connection, server and client owners.
//!
//! Transport threads only push events into channels; application code runs
//! wherever the receiving end is drained, so a slow handler never holds up a
//! read loop or the accept loop.

use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

use crate::error::{PeerError, Result};

/// Events raised by a single [`Connection`](crate::Connection).
///
/// At most one of `Disconnected` / `Error` is raised per connection, and
/// nothing follows it.
#[derive(Debug)]
pub enum ConnectionEvent<T> {
    /// A complete message arrived.
    Message(T),
    /// The peer closed the stream cleanly.
    Disconnected,
    /// The connection failed and has been closed.
    Error(PeerError),
}

/// Events raised by a [`PipeServer`](crate::PipeServer).
#[derive(Debug)]
pub enum ServerEvent<T> {
    /// A client finished the handshake and was registered.
    ClientConnected(String),
    /// A client left, cleanly or after an error; raised once per client.
    ClientDisconnected(String),
    /// A client sent a message.
    ClientMessage(String, T),
    /// Something failed. `connection` is set when one client was affected.
    Error {
        connection: Option<String>,
        error: PeerError,
    },
}

/// Events raised by a [`PipeClient`](crate::PipeClient).
#[derive(Debug)]
pub enum ClientEvent<T> {
    /// Connected; carries the identity the server assigned.
    Connected(String),
    /// The server sent a message.
    ServerMessage(T),
    /// The server closed the connection cleanly.
    Disconnected,
    /// The connection failed, or connecting was given up.
    Error(PeerError),
}

/// Run `handler` for every event on a dedicated dispatch thread.
///
/// The thread ends once every sender of `events` is gone, which happens when
/// the server or client that produced it is dropped.
pub fn spawn_handler<E, F>(name: &str, events: Receiver<E>, mut handler: F) -> Result<JoinHandle<()>>
where
    E: Send + 'static,
    F: FnMut(E) + Send + 'static,
{
    let thread_name = format!("pipelink-events-{name}");
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            for event in events {
                handler(event);
            }
        })
        .map_err(|source| PeerError::Spawn {
            name: thread_name,
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn handler_sees_events_in_order_and_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel::<ServerEvent<String>>();
        let (seen_tx, seen_rx) = mpsc::channel();

        let handle = spawn_handler("test", rx, move |event| {
            if let ServerEvent::ClientMessage(id, text) = event {
                seen_tx.send(format!("{id}:{text}")).unwrap();
            }
        })
        .unwrap();

        tx.send(ServerEvent::ClientConnected("client-1".into())).unwrap();
        tx.send(ServerEvent::ClientMessage("client-1".into(), "a".into()))
            .unwrap();
        tx.send(ServerEvent::ClientMessage("client-1".into(), "b".into()))
            .unwrap();
        drop(tx);

        handle.join().unwrap();
        let seen: Vec<String> = seen_rx.iter().collect();
        assert_eq!(seen, vec!["client-1:a", "client-1:b"]);
    }
}

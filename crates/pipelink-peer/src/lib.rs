//! Connections, servers and clients for typed pipe messaging.
//!
//! A [`PipeServer`] accepts any number of clients on one named endpoint and
//! can broadcast to them or address one by identity. A [`PipeClient`]
//! connects to that endpoint, waiting and retrying until the server is up.
//! Both sides carry values of one [`PipeMessage`](pipelink_message::PipeMessage)
//! type and report what happens through event channels.

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod handshake;
pub mod server;
mod sync;

pub use client::{ClientConfig, PipeClient, RetryPolicy};
pub use connection::{Connection, ConnectionState};
pub use error::{PeerError, Result};
pub use event::{spawn_handler, ClientEvent, ConnectionEvent, ServerEvent};
pub use handshake::{receive_offer, send_offer, HandshakeConfig, HandshakeOffer};
pub use server::{PipeServer, ServerConfig};

//! Typed messaging between processes over named local pipes.
//!
//! A server listens on a pipe name and any number of clients connect to it.
//! Each side sends and receives whole values of one message type, from raw
//! bytes and text up to object graphs with shared and cyclic references.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoint naming and the OS stream underneath
//! - [`frame`]: length-prefixed framing
//! - [`message`]: the [`PipeMessage`](message::PipeMessage) encodings
//! - [`peer`]: connections, server and client (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use pipelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pipelink_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use pipelink_message::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use pipelink_peer::*;
}

#[cfg(feature = "peer")]
pub use pipelink_peer::{
    ClientConfig, ClientEvent, PeerError, PipeClient, PipeServer, ServerConfig, ServerEvent,
};
pub use pipelink_message::{Graph, Json, PipeMessage};

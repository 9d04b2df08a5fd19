//! Named local IPC endpoints.
//!
//! This is the lowest layer of pipelink. A pipe is addressed by a plain name
//! shared out of band between server and client; [`Endpoint`] maps that name
//! onto a Unix domain socket path, [`UnixDomainSocket`] binds/accepts/connects,
//! and every accepted or opened connection is an exclusively owned
//! [`IpcStream`].

pub mod endpoint;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;

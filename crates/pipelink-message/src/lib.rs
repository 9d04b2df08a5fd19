//! Typed payloads for pipelink connections.
//!
//! A connection carries values of one type `T: PipeMessage`. Built-in
//! encodings:
//! - [`Bytes`](bytes::Bytes) and `Vec<u8>` pass through untouched
//! - `String` is UTF-8
//! - [`Json<T>`] wraps any serde value
//! - [`Graph<N>`] encodes object graphs with shared and cyclic references,
//!   restoring one instance per original instance on the other side

pub mod error;
pub mod graph;
pub mod json;
pub mod message;

pub use error::{GraphError, MessageError, Result};
pub use graph::{shared, Fields, Graph, GraphNode, GraphReader, GraphWriter, Shared, WeakShared};
pub use json::Json;
pub use message::PipeMessage;

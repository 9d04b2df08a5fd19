use std::fmt;

use clap::{Args, Subcommand};
use pipelink_message::Json;
use serde::{Deserialize, Serialize};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod client;
mod input;
pub mod server;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a pipe: greet clients, print their messages, broadcast stdin lines.
    Server(ServerArgs),
    /// Connect to a pipe: print server messages, send stdin lines.
    Client(ClientArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Server(args) => server::run(args, format),
        Command::Client(args) => client::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// The message type both CLI roles exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u32,
    pub text: String,
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" (message ID = {})", self.text, self.id)
    }
}

pub type ChatPayload = Json<ChatMessage>;

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Pipe name, or a socket path if it contains '/'.
    #[arg(env = "PIPELINK_PIPE")]
    pub name: String,
    /// Message sent to every client as it connects.
    #[arg(long, default_value = "Welcome!  You are now connected to the server.")]
    pub greeting: String,
    /// Exit after receiving N client messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Pipe name, or a socket path if it contains '/'.
    #[arg(env = "PIPELINK_PIPE")]
    pub name: String,
    /// Exit when the server goes away instead of reconnecting.
    #[arg(long)]
    pub no_reconnect: bool,
    /// Give up after N failed connect attempts. Default: keep trying.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,
    /// Exit after receiving N server messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show build and wire-format details.
    #[arg(long)]
    pub extended: bool,
}

use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pipelink_message::Json;
use pipelink_peer::{ClientEvent, ServerEvent};
use serde::Serialize;

use crate::cmd::ChatMessage;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One line of event output, independent of which side produced it.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> EventRecord<'a> {
    fn new(event: &'static str, connection: Option<&'a str>) -> Self {
        Self {
            event,
            connection,
            message: None,
            error: None,
        }
    }

    pub fn from_server(event: &'a ServerEvent<Json<ChatMessage>>) -> Self {
        match event {
            ServerEvent::ClientConnected(id) => Self::new("connected", Some(id)),
            ServerEvent::ClientDisconnected(id) => Self::new("disconnected", Some(id)),
            ServerEvent::ClientMessage(id, message) => Self {
                message: Some(&message.0),
                ..Self::new("message", Some(id))
            },
            ServerEvent::Error { connection, error } => Self {
                error: Some(error.to_string()),
                ..Self::new("error", connection.as_deref())
            },
        }
    }

    /// `connection` is the identity the server assigned this client, if known.
    pub fn from_client(event: &'a ClientEvent<Json<ChatMessage>>, connection: Option<&'a str>) -> Self {
        match event {
            ClientEvent::Connected(id) => Self::new("connected", Some(id)),
            ClientEvent::ServerMessage(message) => Self {
                message: Some(&message.0),
                ..Self::new("message", connection)
            },
            ClientEvent::Disconnected => Self::new("disconnected", connection),
            ClientEvent::Error(error) => Self {
                error: Some(error.to_string()),
                ..Self::new("error", connection)
            },
        }
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    #[serde(flatten)]
    record: &'a EventRecord<'a>,
    timestamp: String,
}

pub fn print_event(record: &EventRecord<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", render_json(record)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "CONNECTION", "ID", "TEXT"])
                .add_row(vec![
                    record.event.to_string(),
                    record.connection.unwrap_or("-").to_string(),
                    record
                        .message
                        .map(|m| m.id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    record
                        .message
                        .map(|m| m.text.clone())
                        .or_else(|| record.error.clone())
                        .unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", render_pretty(record)),
    }
}

pub fn render_json(record: &EventRecord<'_>) -> String {
    let line = JsonLine {
        record,
        timestamp: now_unix_seconds(),
    };
    serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string())
}

pub fn render_pretty(record: &EventRecord<'_>) -> String {
    let header = record.connection.unwrap_or("server");
    match (record.message, &record.error) {
        (Some(message), _) => format!("{header} : {message}"),
        (None, Some(error)) => format!("{header} : error: {error}"),
        (None, None) => format!("{header} : {}!", record.event),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

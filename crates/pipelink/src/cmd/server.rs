use pipelink_message::Json;
use pipelink_peer::{PipeServer, ServerConfig, ServerEvent};
use pipelink_transport::Endpoint;

use crate::cmd::input::{merge, Input};
use crate::cmd::{ChatMessage, ChatPayload, ServerArgs};
use crate::exit::{peer_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_event, EventRecord, OutputFormat};

pub fn run(args: ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint =
        Endpoint::from_name(args.name.as_str()).map_err(|err| transport_error("invalid pipe name", err))?;
    let (server, events) = PipeServer::<ChatPayload>::with_config(endpoint, ServerConfig::default());
    server
        .start()
        .map_err(|err| peer_error("server start failed", err))?;
    tracing::info!(pipe = server.endpoint().name(), path = ?server.endpoint().path(), "serving");

    let inputs = merge(events)?;
    let mut next_id = 1u32;
    let mut received = 0usize;

    while let Ok(input) = inputs.recv() {
        match input {
            Input::Event(event) => {
                print_event(&EventRecord::from_server(&event), format);
                match event {
                    ServerEvent::ClientConnected(id) => {
                        let greeting = Json(ChatMessage {
                            id: 0,
                            text: args.greeting.clone(),
                        });
                        if let Err(err) = server.send(&id, &greeting) {
                            tracing::warn!(connection = %id, error = %err, "greeting failed");
                        }
                    }
                    ServerEvent::ClientMessage(..) => {
                        received += 1;
                        if args.count.is_some_and(|count| received >= count) {
                            break;
                        }
                    }
                    ServerEvent::ClientDisconnected(_) | ServerEvent::Error { .. } => {}
                }
            }
            Input::Line(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                let message = Json(ChatMessage { id: next_id, text });
                next_id = next_id.wrapping_add(1);
                match server.broadcast(&message) {
                    Ok(clients) => tracing::debug!(clients, "broadcast queued"),
                    Err(err) => tracing::warn!(error = %err, "broadcast failed"),
                }
            }
            Input::Eof => tracing::debug!("stdin closed; still serving"),
            Input::Interrupt => break,
        }
    }

    server.stop();
    Ok(SUCCESS)
}

use pipelink_message::Json;
use pipelink_peer::{ClientConfig, ClientEvent, PeerError, PipeClient, RetryPolicy};
use pipelink_transport::Endpoint;

use crate::cmd::input::{merge, Input};
use crate::cmd::{ChatMessage, ChatPayload, ClientArgs};
use crate::exit::{peer_error, transport_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, EventRecord, OutputFormat};

pub fn run(args: ClientArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint =
        Endpoint::from_name(args.name.as_str()).map_err(|err| transport_error("invalid pipe name", err))?;
    let config = ClientConfig::default()
        .with_auto_reconnect(!args.no_reconnect)
        .with_retry(RetryPolicy {
            max_attempts: args.max_attempts,
            ..RetryPolicy::default()
        });
    let (client, events) = PipeClient::<ChatPayload>::with_config(endpoint, config);
    client
        .start()
        .map_err(|err| peer_error("client start failed", err))?;

    let inputs = merge(events)?;
    let mut connection: Option<String> = None;
    let mut next_id = 1u32;
    let mut received = 0usize;

    let outcome = loop {
        let Ok(input) = inputs.recv() else {
            break Ok(SUCCESS);
        };
        match input {
            Input::Event(event) => {
                print_event(&EventRecord::from_client(&event, connection.as_deref()), format);
                match event {
                    ClientEvent::Connected(id) => connection = Some(id),
                    ClientEvent::ServerMessage(_) => {
                        received += 1;
                        if args.count.is_some_and(|count| received >= count) {
                            break Ok(SUCCESS);
                        }
                    }
                    ClientEvent::Error(err @ PeerError::RetriesExhausted { .. }) => {
                        break Err(peer_error("connect failed", err));
                    }
                    ClientEvent::Disconnected if args.no_reconnect => break Ok(SUCCESS),
                    ClientEvent::Error(_) if args.no_reconnect => break Ok(FAILURE),
                    ClientEvent::Disconnected | ClientEvent::Error(_) => {}
                }
            }
            Input::Line(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                let message = Json(ChatMessage { id: next_id, text });
                match client.send(&message) {
                    Ok(()) => next_id = next_id.wrapping_add(1),
                    Err(err) => tracing::warn!(error = %err, "message not sent"),
                }
            }
            Input::Eof => tracing::debug!("stdin closed"),
            Input::Interrupt => break Ok(SUCCESS),
        }
    };

    client.stop();
    outcome
}

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use pipelink_message::PipeMessage;
use pipelink_peer::{ClientConfig, ClientEvent, PipeClient, PipeServer, ServerConfig, ServerEvent};
use pipelink_transport::Endpoint;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn temp_endpoint(tag: &str) -> Endpoint {
    let dir = PathBuf::from(format!(
        "/tmp/pipelink-{}-{}-{}",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    Endpoint::from_path(dir.join("pipe.sock"))
}

pub fn start_server<T: PipeMessage>(endpoint: &Endpoint) -> (PipeServer<T>, Receiver<ServerEvent<T>>) {
    let (server, events) = PipeServer::with_config(endpoint.clone(), ServerConfig::default());
    server.start().expect("server should start");
    (server, events)
}

/// Start a client and wait until it is connected. Returns its server-side identity.
pub fn connect_client<T: PipeMessage>(
    endpoint: &Endpoint,
    config: ClientConfig,
) -> (PipeClient<T>, Receiver<ClientEvent<T>>, String) {
    let (client, events) = PipeClient::with_config(endpoint.clone(), config);
    client.start().expect("client should start");
    let id = match events.recv_timeout(WAIT).expect("client should connect") {
        ClientEvent::Connected(id) => id,
        ClientEvent::Error(err) => panic!("client failed to connect: {err}"),
        _ => panic!("expected Connected first"),
    };
    (client, events, id)
}

pub fn expect_connected<T>(events: &Receiver<ServerEvent<T>>) -> String {
    match events.recv_timeout(WAIT).expect("server should see a client") {
        ServerEvent::ClientConnected(id) => id,
        ServerEvent::Error { error, .. } => panic!("server error: {error}"),
        _ => panic!("expected ClientConnected"),
    }
}

pub fn expect_client_message<T>(events: &Receiver<ServerEvent<T>>) -> (String, T) {
    match events.recv_timeout(WAIT).expect("server should receive a message") {
        ServerEvent::ClientMessage(id, value) => (id, value),
        ServerEvent::Error { error, .. } => panic!("server error: {error}"),
        ServerEvent::ClientConnected(id) => panic!("unexpected connect of {id}"),
        ServerEvent::ClientDisconnected(id) => panic!("unexpected disconnect of {id}"),
    }
}

pub fn expect_server_message<T>(events: &Receiver<ClientEvent<T>>) -> T {
    match events.recv_timeout(WAIT).expect("client should receive a message") {
        ClientEvent::ServerMessage(value) => value,
        ClientEvent::Error(err) => panic!("client error: {err}"),
        ClientEvent::Connected(id) => panic!("unexpected reconnect as {id}"),
        ClientEvent::Disconnected => panic!("unexpected disconnect"),
    }
}

/// Poll `check` until it holds or `WAIT` passes.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

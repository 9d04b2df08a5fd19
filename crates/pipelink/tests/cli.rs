#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn unique_socket(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/plcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir.join("chat.sock")
}

fn pipelink() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pipelink"));
    cmd.arg("--log-level").arg("error");
    cmd
}

/// Collect stdout lines of `child` on a background thread.
fn stdout_lines(child: &mut Child) -> mpsc::Receiver<String> {
    let stdout = child.stdout.take().expect("stdout should be piped");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[test]
fn version_prints_crate_version() {
    let output = pipelink().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("pipelink {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn extended_version_reports_wire_format() {
    let output = pipelink()
        .args(["version", "--extended"])
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("protocol: pipelink 1.0"));
    assert!(stdout.contains("frame_header: 4 bytes"));
}

#[test]
fn client_gives_up_with_transport_exit_code() {
    let socket = unique_socket("missing");
    let output = pipelink()
        .args(["client", "--max-attempts", "2"])
        .arg(&socket)
        .stdin(Stdio::null())
        .output()
        .expect("client should run");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn client_receives_greeting_and_server_sees_message() {
    let socket = unique_socket("chat");

    let mut server = pipelink()
        .args(["--format", "json", "server"])
        .arg(&socket)
        .args(["--count", "1"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("server should start");
    let server_lines = stdout_lines(&mut server);

    let mut client = pipelink()
        .args(["--format", "json", "client"])
        .arg(&socket)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("client should start");
    let client_lines = stdout_lines(&mut client);

    // The client retries until the server is listening, then gets greeted.
    let greeting = wait_for_line(&client_lines, "\"event\":\"message\"");

    let mut stdin = client.stdin.take().expect("stdin should be piped");
    writeln!(stdin, "hello from the client").expect("client stdin should accept a line");
    stdin.flush().expect("client stdin should flush");

    let received = wait_for_line(&server_lines, "\"event\":\"message\"");
    // The server exits on its own after --count messages.
    if received.is_none() {
        let _ = server.kill();
    }
    let server_status = server.wait().expect("server should exit");

    let _ = client.kill();
    let _ = client.wait();
    let _ = std::fs::remove_dir_all(socket.parent().expect("socket has a parent dir"));

    let greeting = greeting.expect("client should print the greeting");
    assert!(greeting.contains("Welcome!"));
    assert!(greeting.contains("\"connection\":\"client-1\""));

    let received = received.expect("server should print the client message");
    assert!(received.contains("hello from the client"));
    assert!(received.contains("\"connection\":\"client-1\""));
    assert!(server_status.success());
}

fn wait_for_line(lines: &mpsc::Receiver<String>, needle: &str) -> Option<String> {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
        match lines.recv_timeout(remaining) {
            Ok(line) if line.contains(needle) => return Some(line),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use pipelink_peer::spawn_handler;

use crate::exit::{peer_error, CliError, CliResult, INTERNAL};

/// Everything the command loop reacts to, merged onto one channel.
pub enum Input<E> {
    Event(E),
    Line(String),
    Eof,
    Interrupt,
}

/// Merge transport events, stdin lines and Ctrl-C into one receiver.
pub fn merge<E: Send + 'static>(events: Receiver<E>) -> CliResult<Receiver<Input<E>>> {
    let (tx, rx) = mpsc::channel();

    let forward = tx.clone();
    spawn_handler("cli", events, move |event| {
        let _ = forward.send(Input::Event(event));
    })
    .map_err(|err| peer_error("event dispatch failed", err))?;

    spawn_stdin(tx.clone())?;

    ctrlc::set_handler(move || {
        let _ = tx.send(Input::Interrupt);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    Ok(rx)
}

fn spawn_stdin<E: Send + 'static>(tx: Sender<Input<E>>) -> CliResult<()> {
    thread::Builder::new()
        .name("pipelink-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(Input::Line(line)).is_err() {
                    return;
                }
            }
            let _ = tx.send(Input::Eof);
        })
        .map(|_| ())
        .map_err(|err| CliError::new(INTERNAL, format!("stdin reader failed to start: {err}")))
}

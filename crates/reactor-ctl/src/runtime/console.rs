//! Operator console: JSON commands on stdin, JSON replies on stdout.

use crate::infra::audit::{AuditEventType, AuditLogger, CommandDetails};
use crossbeam_channel::{unbounded, Receiver};
use reactor_core::Engine;
use reactor_io::metrics::COMMANDS_REJECTED;
use reactor_io::protocol::{OperatorMessage, ReplyMsg, SnapshotMsg};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::thread;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Read stdin on a helper thread. The channel disconnects at end of input.
pub fn spawn_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read console input");
                    break;
                }
            }
        }
        debug!("Console input closed");
    });
    rx
}

/// Handle one console line against the engine, writing one reply line.
pub fn handle_line(
    engine: &Engine,
    line: &str,
    audit: Option<&AuditLogger>,
    out: &mut impl Write,
) -> Flow {
    let line = line.trim();
    match line {
        "" => return Flow::Continue,
        "quit" | "exit" => return Flow::Quit,
        "status" => {
            match engine.latest_snapshot() {
                Some(snapshot) => emit(out, &SnapshotMsg::from_snapshot(&snapshot)),
                None => emit(out, &ReplyMsg::accepted("status", engine.engine_state())),
            }
            return Flow::Continue;
        }
        _ => {}
    }

    let message = match OperatorMessage::parse(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unreadable operator command");
            emit(out, &ReplyMsg::rejected("parse", engine.engine_state(), e));
            return Flow::Continue;
        }
    };

    let command = message.name();
    let (reply, event, error) = match message.dispatch(engine) {
        Ok(()) => {
            debug!(command, "Operator command accepted");
            (
                ReplyMsg::accepted(command, engine.engine_state()),
                AuditEventType::CommandAccepted,
                None,
            )
        }
        Err(e) => {
            warn!(command, error = %e, "Operator command rejected");
            COMMANDS_REJECTED.with_label_values(&[command]).inc();
            (
                ReplyMsg::rejected(command, engine.engine_state(), &e),
                AuditEventType::CommandRejected,
                Some(e.to_string()),
            )
        }
    };
    if let Some(logger) = audit {
        let details = CommandDetails {
            command,
            line,
            error,
        };
        if let Err(e) = logger.record(event, details) {
            error!(error = %e, "Failed to write audit entry");
        }
    }
    emit(out, &reply);
    Flow::Continue
}

fn emit(out: &mut impl Write, message: &impl Serialize) {
    let written = serde_json::to_writer(&mut *out, message)
        .map_err(std::io::Error::from)
        .and_then(|()| out.write_all(b"\n"))
        .and_then(|()| out.flush());
    if let Err(e) = written {
        warn!(error = %e, "Failed to write console reply");
    }
}

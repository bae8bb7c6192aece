//! Turns prompt lines into backend commands and queues them for the worker.

use client_core::Snapshot;
use crossbeam_channel::{Sender, TrySendError};
use shared::domain::{CommandAction, GroupId, MasterId};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext};

pub const HELP: &str = "commands: refresh | login | pulse <master> [ms] | reset <master> | \
io|reset|off|hard <master> <mac> | group <group> <io|reset|off|hard> | pair | logout | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Backend(BackendCommand),
    Help,
    Quit,
    Empty,
}

fn input_error(message: impl Into<String>) -> UiError {
    UiError::from_message(UiErrorContext::Input, message)
}

/// Resolves a master by full id, unique id prefix, or case-insensitive name.
pub fn resolve_master(snapshot: &Snapshot, token: &str) -> Result<MasterId, UiError> {
    if let Ok(id) = token.parse::<MasterId>() {
        return Ok(id);
    }
    let needle = token.to_ascii_lowercase();
    let matches: Vec<MasterId> = snapshot
        .masters
        .iter()
        .filter(|master| {
            master.id.to_string().starts_with(&needle)
                || master
                    .name
                    .as_deref()
                    .is_some_and(|name| name.eq_ignore_ascii_case(token))
        })
        .map(|master| master.id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(input_error(format!("no master matches '{token}'"))),
        _ => Err(input_error(format!("'{token}' matches more than one master"))),
    }
}

pub fn resolve_group(snapshot: &Snapshot, token: &str) -> Result<GroupId, UiError> {
    if let Ok(id) = token.parse::<GroupId>() {
        return Ok(id);
    }
    let needle = token.to_ascii_lowercase();
    let matches: Vec<GroupId> = snapshot
        .groups
        .iter()
        .filter(|group| {
            group.id.to_string().starts_with(&needle) || group.name.eq_ignore_ascii_case(token)
        })
        .map(|group| group.id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(input_error(format!("no group matches '{token}'"))),
        _ => Err(input_error(format!("'{token}' matches more than one group"))),
    }
}

/// Slave verbs. `reset` with a MAC targets the slave; without one, the master.
fn slave_action(verb: &str) -> Option<CommandAction> {
    match verb {
        "reset" | "rst" => Some(CommandAction::SlaveReset),
        other => CommandAction::parse(other).filter(|action| action.targets_slave()),
    }
}

pub fn parse_line(
    snapshot: &Snapshot,
    line: &str,
    default_pulse_ms: u64,
) -> Result<ConsoleInput, UiError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, args)) = words.split_first() else {
        return Ok(ConsoleInput::Empty);
    };
    let verb = verb.to_ascii_lowercase();

    let command = match (verb.as_str(), args) {
        ("quit" | "exit" | "q", []) => return Ok(ConsoleInput::Quit),
        ("help" | "?", _) => return Ok(ConsoleInput::Help),
        // Refresh signs in again when there is no session.
        ("refresh" | "r" | "login", []) => BackendCommand::Refresh,
        ("pair", []) => BackendCommand::RequestPairingCode,
        ("logout", []) => BackendCommand::SignOut,
        ("pulse", [master]) => BackendCommand::Pulse {
            master_id: resolve_master(snapshot, master)?,
            ms: default_pulse_ms,
        },
        ("pulse", [master, ms]) => {
            let ms = ms
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| input_error(format!("invalid pulse length '{ms}'")))?;
            BackendCommand::Pulse {
                master_id: resolve_master(snapshot, master)?,
                ms,
            }
        }
        ("reset", [master]) => BackendCommand::ResetMaster {
            master_id: resolve_master(snapshot, master)?,
        },
        ("group", [group, verb]) => {
            let action = slave_action(&verb.to_ascii_lowercase())
                .ok_or_else(|| input_error(format!("unknown slave action '{verb}'")))?;
            BackendCommand::Group {
                group_id: resolve_group(snapshot, group)?,
                action,
            }
        }
        (verb, [master, mac]) if slave_action(verb).is_some() => {
            let master_id = resolve_master(snapshot, master)?;
            let action = slave_action(verb)
                .ok_or_else(|| input_error(format!("unknown slave action '{verb}'")))?;
            BackendCommand::Slave {
                master_id,
                mac: mac.to_ascii_uppercase(),
                action,
            }
        }
        _ => return Err(input_error(format!("unrecognized command '{}'", line.trim()))),
    };
    Ok(ConsoleInput::Backend(command))
}

pub fn dispatch_backend_command(
    cmd_tx: &Sender<BackendCommand>,
    cmd: BackendCommand,
    status: &mut String,
) {
    let cmd_name = cmd.name();
    match cmd_tx.try_send(cmd) {
        Ok(()) => tracing::debug!(command = cmd_name, "queued console->backend command"),
        Err(TrySendError::Full(_)) => {
            *status = "Command queue is full; please retry".to_string();
        }
        Err(TrySendError::Disconnected(_)) => {
            *status =
                "Backend worker disconnected (possible startup/runtime failure); restart the console"
                    .to_string();
        }
    }
}

#[cfg(test)]
#[path = "tests/orchestration_tests.rs"]
mod tests;

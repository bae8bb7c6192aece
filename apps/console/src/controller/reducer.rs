//! Folds `UiEvent`s into the dashboard state owned by the main loop.

use client_core::{reconcile, PhaseMap, Snapshot};
use shared::protocol::{PairingCodeResponse, Table};

use crate::controller::events::{classify_login_failure, UiError, UiErrorContext, UiEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInState {
    SignedOut,
    SigningIn,
    SignedIn { email: Option<String> },
}

#[derive(Debug, Clone)]
pub struct DashboardState {
    pub session: SignInState,
    pub snapshot: Snapshot,
    pub loaded: bool,
    pub load_error: Option<UiError>,
    pub phases: PhaseMap,
    pub realtime_tables: Vec<Table>,
    pub realtime_closed: Option<String>,
    pub pairing: Option<PairingCodeResponse>,
    pub status: String,
    pub last_error: Option<UiError>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            session: SignInState::SigningIn,
            snapshot: Snapshot::default(),
            loaded: false,
            load_error: None,
            phases: PhaseMap::new(),
            realtime_tables: Vec::new(),
            realtime_closed: None,
            pairing: None,
            status: "Starting...".to_string(),
            last_error: None,
        }
    }
}

impl DashboardState {
    pub fn realtime_live(&self) -> bool {
        self.realtime_closed.is_none() && !self.realtime_tables.is_empty()
    }
}

/// Applies one event. `Input` lines are handled by orchestration, not here.
pub fn apply(state: &mut DashboardState, event: UiEvent) {
    match event {
        UiEvent::Info(message) => state.status = message,
        UiEvent::Input(_) => {}
        UiEvent::SignedIn { email } => {
            state.status = match &email {
                Some(email) => format!("Signed in as {email}"),
                None => "Signed in".to_string(),
            };
            state.session = SignInState::SignedIn { email };
        }
        UiEvent::SignedOut => {
            *state = DashboardState {
                session: SignInState::SignedOut,
                status: "Signed out".to_string(),
                ..DashboardState::default()
            };
        }
        UiEvent::SnapshotLoaded(snapshot) => {
            state.status = format!(
                "Loaded {} masters, {} slaves, {} groups",
                snapshot.masters.len(),
                snapshot.nodes.len(),
                snapshot.groups.len()
            );
            state.snapshot = snapshot;
            state.loaded = true;
            state.load_error = None;
        }
        UiEvent::Row(change) => match reconcile(&state.snapshot, &change) {
            Ok(next) => state.snapshot = next,
            Err(err) => {
                tracing::warn!(table = change.table.as_str(), "dropping row change: {err}");
                state.status = format!("Ignored {} change: {err}", change.table.as_str());
            }
        },
        UiEvent::PhaseChanged { key, phase } => {
            state.phases.set(key, phase);
        }
        UiEvent::RealtimeSubscribed(table) => {
            if !state.realtime_tables.contains(&table) {
                state.realtime_tables.push(table);
            }
            state.realtime_closed = None;
        }
        UiEvent::RealtimeChannelClosed(table) => {
            state.realtime_tables.retain(|joined| *joined != table);
            let reason = format!("{} channel closed", table.as_str());
            state.status = format!("Live updates stopped ({reason}); type 'refresh' to reload");
            state.realtime_closed = Some(reason);
        }
        UiEvent::RealtimeClosed(reason) => {
            state.status = format!("Live updates stopped ({reason}); type 'refresh' to reload");
            state.realtime_closed = Some(reason);
            state.realtime_tables.clear();
        }
        UiEvent::CommandQueued {
            master_id,
            target_mac,
            action,
            command_id,
        } => {
            let master = state
                .snapshot
                .master(master_id)
                .map(|master| master.display_name().to_string())
                .unwrap_or_else(|| master_id.to_string());
            state.status = match target_mac {
                Some(mac) => format!("Queued {action} for {master} / {mac} (#{})", command_id.0),
                None => format!("Queued {action} for {master} (#{})", command_id.0),
            };
        }
        UiEvent::GroupDispatched {
            group_id,
            action,
            queued,
            failed,
        } => {
            let group = state
                .snapshot
                .group(group_id)
                .map(|group| group.name.clone())
                .unwrap_or_else(|| group_id.to_string());
            state.status = if failed == 0 {
                format!("Queued {action} for {queued} members of {group}")
            } else {
                format!("Queued {action} for {queued} members of {group}; {failed} failed")
            };
        }
        UiEvent::PairingCode(code) => {
            state.status = format!("Pairing code {}", code.code);
            state.pairing = Some(code);
        }
        UiEvent::Error(err) => {
            match err.context() {
                UiErrorContext::InitialLoad if !state.loaded => {
                    state.load_error = Some(err.clone());
                }
                UiErrorContext::Login => {
                    state.session = SignInState::SignedOut;
                }
                _ => {}
            }
            state.status = match err.context() {
                UiErrorContext::Login => classify_login_failure(err.message()),
                _ => err.to_string(),
            };
            if err.requires_reauth() {
                state.session = SignInState::SignedOut;
                state.status.push_str(" Type 'refresh' to sign in again.");
            }
            state.last_error = Some(err);
        }
    }
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;

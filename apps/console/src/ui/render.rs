//! Plain-text rendering of the dashboard.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use client_core::{Phase, PhaseKey, PhaseMap, Snapshot};
use shared::domain::{Command, Master};

use crate::controller::reducer::{DashboardState, SignInState};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

pub fn clear_screen() -> &'static str {
    CLEAR_SCREEN
}

fn short_id(id: impl ToString) -> String {
    id.to_string().chars().take(8).collect()
}

/// `"3s ago"`, `"4m ago"`, `"never"`.
pub fn format_age(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last_seen) = last_seen else {
        return "never".to_string();
    };
    let secs = now.signed_duration_since(last_seen).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn liveness_badge(master: &Master, now: DateTime<Utc>) -> &'static str {
    if master.is_live_at(now) {
        "LIVE"
    } else {
        "down"
    }
}

fn phase_badge(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "",
        Phase::Queued => "[queued]",
        Phase::Sending => "[sending]",
        Phase::Acked => "[acked]",
        Phase::Error => "[error]",
    }
}

fn render_masters(out: &mut String, snapshot: &Snapshot, phases: &PhaseMap, now: DateTime<Utc>) {
    if snapshot.masters.is_empty() {
        let _ = writeln!(out, "  (no masters paired)");
        return;
    }
    for master in &snapshot.masters {
        let mut line = format!(
            "  {:<4} {:<24} {}  seen {}",
            liveness_badge(master, now),
            master.display_name(),
            short_id(master.id),
            format_age(master.last_seen, now),
        );
        if let Some(state) = snapshot.master_state(master.id) {
            if let Some(fw) = &state.fw {
                let _ = write!(line, "  fw {fw}");
            }
            if let Some(rssi) = state.rssi {
                let _ = write!(line, "  rssi {rssi}");
            }
        }
        let _ = writeln!(out, "{}", line.trim_end());

        for node in snapshot.nodes_for(master.id) {
            let phase = phases.get(&PhaseKey::new(master.id, &node.mac));
            let power = if node.powered { "on" } else { "off" };
            let line = format!(
                "      {:<17} {:<20} {:<3} {}",
                node.mac,
                node.display_name(),
                power,
                phase_badge(phase),
            );
            let _ = writeln!(out, "{}", line.trim_end());
        }
    }
}

fn render_groups(out: &mut String, snapshot: &Snapshot) {
    if snapshot.groups.is_empty() {
        return;
    }
    let _ = writeln!(out, "\nGroups");
    for group in &snapshot.groups {
        let members: Vec<String> = snapshot
            .members_of(group.id)
            .map(|member| match &member.alias {
                Some(alias) => alias.clone(),
                None => member.slave_mac.clone(),
            })
            .collect();
        let _ = writeln!(
            out,
            "  {:<20} {}  ({})",
            group.name,
            short_id(group.id),
            if members.is_empty() {
                "empty".to_string()
            } else {
                members.join(", ")
            }
        );
    }
}

fn render_command(out: &mut String, snapshot: &Snapshot, command: &Command) {
    let master = snapshot
        .master(command.master_id)
        .map(|master| master.display_name().to_string())
        .unwrap_or_else(|| short_id(command.master_id));
    let target = command.target_mac.as_deref().unwrap_or("-");
    let _ = writeln!(
        out,
        "  #{:<6} {:<15} {:<20} {:<17} {}",
        command.id.0,
        command.action.as_str(),
        master,
        target,
        command.status.as_deref().unwrap_or("-"),
    );
}

/// Masters with their slaves, groups, and the newest commands.
pub fn render_snapshot(
    snapshot: &Snapshot,
    phases: &PhaseMap,
    now: DateTime<Utc>,
    recent_commands: usize,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Masters");
    render_masters(&mut out, snapshot, phases, now);
    render_groups(&mut out, snapshot);
    if recent_commands > 0 && !snapshot.commands.is_empty() {
        let _ = writeln!(out, "\nRecent commands");
        for command in snapshot.commands.iter().take(recent_commands) {
            render_command(&mut out, snapshot, command);
        }
    }
    out
}

/// Renders the whole dashboard. Liveness is evaluated against `now`.
pub fn render(state: &DashboardState, now: DateTime<Utc>, recent_commands: usize) -> String {
    let mut out = String::new();
    let who = match &state.session {
        SignInState::SignedIn { email: Some(email) } => email.as_str(),
        SignInState::SignedIn { email: None } => "signed in",
        SignInState::SigningIn => "signing in...",
        SignInState::SignedOut => "signed out",
    };
    let live = if state.realtime_live() {
        "live"
    } else if state.realtime_closed.is_some() {
        "stale"
    } else {
        "connecting"
    };
    let _ = writeln!(
        out,
        "Relay dashboard  |  {who}  |  updates: {live}  |  {}",
        now.format("%H:%M:%S")
    );
    let _ = writeln!(out, "{}", "-".repeat(72));

    if let Some(err) = &state.load_error {
        let _ = writeln!(out, "  !! failed to load dashboard: {}", err.message());
    } else if !state.loaded {
        let _ = writeln!(out, "  loading...");
    } else {
        out.push_str(&render_snapshot(
            &state.snapshot,
            &state.phases,
            now,
            recent_commands,
        ));
    }

    if let Some(pairing) = &state.pairing {
        let expires = pairing
            .expires_at
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let _ = writeln!(out, "\nPairing code: {}  (expires {expires})", pairing.code);
    }

    let _ = writeln!(out, "{}", "-".repeat(72));
    let _ = writeln!(out, "{}", state.status);
    out
}

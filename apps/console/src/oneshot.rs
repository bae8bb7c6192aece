//! Non-interactive commands: sign in, do one thing, print the result.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Subcommand;
use client_core::{ClientHandle, PhaseMap, RelayClient};
use serde_json::json;
use shared::domain::{CommandAction, GroupId, MasterId, NodeId};

use crate::settings::{Credentials, Settings};
use crate::ui::render;

fn parse_slave_action(raw: &str) -> Result<CommandAction, String> {
    match raw.to_ascii_lowercase().as_str() {
        "reset" | "rst" => Ok(CommandAction::SlaveReset),
        other => CommandAction::parse(other)
            .filter(|action| action.targets_slave())
            .ok_or_else(|| format!("unknown slave action '{raw}' (io, reset, off, hard)")),
    }
}

#[derive(Subcommand, Debug)]
pub enum OneShot {
    /// Print masters, slaves, groups, and recent commands.
    List,
    /// Pulse a master's own relay.
    Pulse {
        master: MasterId,
        #[arg(long)]
        ms: Option<u64>,
    },
    /// Reset a master.
    Reset { master: MasterId },
    /// Send a slave command (io, reset, off, hard).
    Slave {
        master: MasterId,
        mac: String,
        #[arg(value_parser = parse_slave_action)]
        action: CommandAction,
    },
    /// Send a slave command to every member of a group.
    Group {
        group: GroupId,
        #[arg(value_parser = parse_slave_action)]
        action: CommandAction,
    },
    Rename {
        #[command(subcommand)]
        target: RenameTarget,
    },
    /// Request a one-time pairing code for a new master.
    Pair,
}

#[derive(Subcommand, Debug)]
pub enum RenameTarget {
    Master { id: MasterId, name: String },
    Node { id: NodeId, name: String },
}

async fn signed_in_client(settings: &Settings) -> Result<Arc<RelayClient>> {
    let client = RelayClient::new(settings.backend_config())?;
    match settings.credentials() {
        Some(Credentials::Password { email, password }) => {
            client.sign_in(&email, &password).await?;
        }
        Some(Credentials::Redirect(url)) => {
            client.sign_in_with_redirect(&url).await?;
        }
        None => bail!("no credentials configured; set auth.email and auth.password"),
    }
    Ok(client)
}

pub async fn run(settings: &Settings, command: OneShot) -> Result<()> {
    let client = signed_in_client(settings).await?;
    match command {
        OneShot::List => {
            let snapshot = client.load_snapshot().await?;
            print!(
                "{}",
                render::render_snapshot(
                    &snapshot,
                    &PhaseMap::new(),
                    Utc::now(),
                    settings.console.recent_commands,
                )
            );
        }
        OneShot::Pulse { master, ms } => {
            let ms = ms.unwrap_or(settings.console.pulse_ms);
            let command = client
                .dispatch_command(master, None, CommandAction::Pulse, json!({ "ms": ms }))
                .await?;
            println!("queued PULSE ({ms} ms) as command #{}", command.id.0);
        }
        OneShot::Reset { master } => {
            let command = client
                .dispatch_command(master, None, CommandAction::Reset, json!({}))
                .await?;
            println!("queued RESET as command #{}", command.id.0);
        }
        OneShot::Slave {
            master,
            mac,
            action,
        } => {
            let command = client
                .dispatch_command(master, Some(mac.as_str()), action, json!({}))
                .await?;
            println!("queued {action} for {mac} as command #{}", command.id.0);
        }
        OneShot::Group { group, action } => {
            let outcomes = client.dispatch_group(group, action, json!({})).await?;
            let mut failed = 0;
            for outcome in &outcomes {
                let label = outcome
                    .member
                    .alias
                    .as_deref()
                    .unwrap_or(&outcome.member.slave_mac);
                match &outcome.result {
                    Ok(command) => println!("{label}: queued #{}", command.id.0),
                    Err(err) => {
                        failed += 1;
                        println!("{label}: failed: {err:#}");
                    }
                }
            }
            if failed == outcomes.len() {
                bail!("every member of group {group} failed");
            }
        }
        OneShot::Rename { target } => match target {
            RenameTarget::Master { id, name } => {
                let master = client.rename_master(id, &name).await?;
                println!("master {} is now '{}'", master.id, master.display_name());
            }
            RenameTarget::Node { id, name } => {
                let node = client.rename_node(id, &name).await?;
                println!("node {} is now '{}'", node.id, node.display_name());
            }
        },
        OneShot::Pair => {
            let code = client.request_pairing_code().await?;
            match code.expires_at {
                Some(expires_at) => println!("pairing code {} (expires {expires_at})", code.code),
                None => println!("pairing code {}", code.code),
            }
        }
    }
    client.sign_out().await?;
    Ok(())
}

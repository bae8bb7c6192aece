use std::time::Duration;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand};
use client_core::{BackendConfig, ClientHandle, RelayClient};
use shared::{
    domain::MasterId,
    protocol::{DeviceStateUpsert, FunctionAck, PeerStateUpsert},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-admin", about = "Administrative calls against the relay backend")]
struct Cli {
    #[arg(long, env = "RELAY__BACKEND__URL")]
    url: String,
    #[arg(long, env = "RELAY__BACKEND__ANON_KEY", hide_env_values = true)]
    anon_key: String,
    #[arg(long, env = "RELAY__AUTH__EMAIL")]
    email: String,
    #[arg(long, env = "RELAY__AUTH__PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, env = "RELAY__BACKEND__REQUEST_TIMEOUT_SECS", default_value_t = 15)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a pairing code for a new master.
    Pair,
    /// Rotate a master's device key and print the new key once.
    RotateKey { master: MasterId },
    /// Delete a master together with its slaves, commands and group memberships.
    DeleteMaster {
        master: MasterId,
        #[arg(long)]
        yes: bool,
    },
    /// Upsert a legacy `master_states` row.
    DeviceState {
        master: MasterId,
        #[arg(long, action = ArgAction::Set)]
        online: bool,
        #[arg(long)]
        fw: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        rssi: Option<i32>,
    },
    /// Upsert a legacy `peer_states` row.
    PeerState {
        master: MasterId,
        mac: String,
        #[arg(long, action = ArgAction::Set)]
        powered: bool,
    },
}

fn print_ack(what: &str, ack: &FunctionAck) {
    match &ack.message {
        Some(message) => println!("{what}: ok={} ({message})", ack.ok),
        None => println!("{what}: ok={}", ack.ok),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    if let Command::DeleteMaster { yes: false, master } = &cli.command {
        bail!("deleting master {master} removes its slaves and history; rerun with --yes");
    }

    let config = BackendConfig::new(&cli.url, &cli.anon_key)
        .with_request_timeout(Duration::from_secs(cli.timeout_secs.max(1)));
    let client = RelayClient::new(config)?;
    client.sign_in(&cli.email, &cli.password).await?;

    match cli.command {
        Command::Pair => {
            let code = client.request_pairing_code().await?;
            match code.expires_at {
                Some(expires_at) => println!("pairing code {} (expires {expires_at})", code.code),
                None => println!("pairing code {}", code.code),
            }
        }
        Command::RotateKey { master } => {
            let rotated = client.rotate_device_key(master).await?;
            println!("master {} device key: {}", rotated.master_id, rotated.device_key);
        }
        Command::DeleteMaster { master, .. } => {
            let ack = client.delete_master(master).await?;
            print_ack(&format!("delete master {master}"), &ack);
        }
        Command::DeviceState {
            master,
            online,
            fw,
            rssi,
        } => {
            let ack = client
                .upsert_device_state(DeviceStateUpsert {
                    master_id: master,
                    online,
                    fw,
                    rssi,
                })
                .await?;
            print_ack(&format!("device state {master}"), &ack);
        }
        Command::PeerState {
            master,
            mac,
            powered,
        } => {
            let mac = mac.trim().to_ascii_uppercase();
            let ack = client
                .upsert_peer_state(PeerStateUpsert {
                    master_id: master,
                    mac: mac.clone(),
                    powered,
                })
                .await?;
            print_ack(&format!("peer state {master}/{mac}"), &ack);
        }
    }

    client.sign_out().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: [&str; 9] = [
        "relay-admin",
        "--url",
        "http://127.0.0.1:54321",
        "--anon-key",
        "anon",
        "--email",
        "ops@example.com",
        "--password",
        "secret",
    ];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(BASE.iter().chain(extra.iter()).copied())
    }

    #[test]
    fn device_state_accepts_negative_rssi() {
        let cli = parse(&[
            "device-state",
            "00000000-0000-0000-0000-00000000000a",
            "--online",
            "false",
            "--rssi",
            "-67",
        ])
        .expect("parse");
        match cli.command {
            Command::DeviceState {
                online, rssi, fw, ..
            } => {
                assert!(!online);
                assert_eq!(rssi, Some(-67));
                assert_eq!(fw, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn peer_state_requires_powered_flag() {
        assert!(parse(&[
            "peer-state",
            "00000000-0000-0000-0000-00000000000a",
            "24:0a:c4:00:00:aa"
        ])
        .is_err());
        assert!(parse(&[
            "peer-state",
            "00000000-0000-0000-0000-00000000000a",
            "24:0a:c4:00:00:aa",
            "--powered",
            "true"
        ])
        .is_ok());
    }

    #[test]
    fn delete_master_defaults_to_unconfirmed() {
        let cli = parse(&["delete-master", "00000000-0000-0000-0000-00000000000a"]).expect("parse");
        assert!(matches!(cli.command, Command::DeleteMaster { yes: false, .. }));
    }

    #[test]
    fn credentials_share_the_console_env_names() {
        use clap::CommandFactory;

        let command = Cli::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .and_then(|env| env.to_str())
                .map(str::to_string)
        };
        assert_eq!(env_of("url").as_deref(), Some("RELAY__BACKEND__URL"));
        assert_eq!(env_of("anon_key").as_deref(), Some("RELAY__BACKEND__ANON_KEY"));
        assert_eq!(env_of("email").as_deref(), Some("RELAY__AUTH__EMAIL"));
        assert_eq!(env_of("password").as_deref(), Some("RELAY__AUTH__PASSWORD"));
        assert_eq!(
            env_of("timeout_secs").as_deref(),
            Some("RELAY__BACKEND__REQUEST_TIMEOUT_SECS")
        );
    }
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod backend_bridge;
mod controller;
mod oneshot;
mod settings;
mod ui;

use oneshot::OneShot;
use settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "relay-console", about = "Dashboard and commands for networked power relays")]
struct Cli {
    /// TOML settings file; defaults to ./console.toml when present.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive live dashboard (default).
    Watch,
    #[command(flatten)]
    OneShot(OneShot),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => ui::run_dashboard(&settings),
        Command::OneShot(command) => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(oneshot::run(&settings, command)),
    }
}

//! Interactive terminal dashboard.

pub mod render;

use std::{
    io::{self, BufRead, Write},
    thread,
};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};

use crate::backend_bridge::{commands::BackendCommand, runtime};
use crate::controller::{
    events::UiEvent,
    orchestration::{dispatch_backend_command, parse_line, ConsoleInput, HELP},
    reducer::{self, DashboardState},
};
use crate::settings::Settings;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Forwards stdin lines to the dashboard loop. EOF quits.
fn spawn_stdin_reader(ui_tx: Sender<UiEvent>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if ui_tx.send(UiEvent::Input(line)).is_err() {
                return;
            }
        }
        let _ = ui_tx.send(UiEvent::Input("quit".to_string()));
    });
}

fn draw(out: &mut impl Write, state: &DashboardState, settings: &Settings) -> io::Result<()> {
    write!(
        out,
        "{}{}> ",
        render::clear_screen(),
        render::render(state, Utc::now(), settings.console.recent_commands)
    )?;
    out.flush()
}

pub fn run_dashboard(settings: &Settings) -> Result<()> {
    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(COMMAND_QUEUE_CAPACITY);
    let (ui_tx, ui_rx) = unbounded::<UiEvent>();

    let worker = runtime::launch(
        settings.backend_config(),
        settings.credentials(),
        cmd_rx,
        ui_tx.clone(),
    );
    spawn_stdin_reader(ui_tx);

    let mut state = DashboardState::default();
    let mut stdout = io::stdout();
    draw(&mut stdout, &state, settings)?;

    loop {
        match ui_rx.recv_timeout(settings.tick()) {
            Ok(UiEvent::Input(line)) => {
                match parse_line(&state.snapshot, &line, settings.console.pulse_ms) {
                    Ok(ConsoleInput::Quit) => break,
                    Ok(ConsoleInput::Help) => state.status = HELP.to_string(),
                    Ok(ConsoleInput::Empty) => {}
                    Ok(ConsoleInput::Backend(cmd)) => {
                        dispatch_backend_command(&cmd_tx, cmd, &mut state.status)
                    }
                    Err(err) => reducer::apply(&mut state, UiEvent::Error(err)),
                }
            }
            Ok(event) => reducer::apply(&mut state, event),
            // Tick: redraw so liveness badges age out.
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        draw(&mut stdout, &state, settings)?;
    }

    writeln!(stdout)?;
    drop(cmd_tx);
    if worker.join().is_err() {
        tracing::warn!("backend worker panicked");
    }
    Ok(())
}

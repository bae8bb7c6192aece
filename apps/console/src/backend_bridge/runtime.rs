//! Runtime bridge between the dashboard command queue and the relay client.

use std::{sync::Arc, thread};

use client_core::{BackendConfig, ClientHandle, RelayClient};
use crossbeam_channel::{Receiver, Sender};
use serde_json::json;
use shared::domain::CommandAction;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::backend_bridge::commands::BackendCommand;
use crate::controller::events::{UiError, UiErrorContext, UiEvent};
use crate::settings::Credentials;

pub fn launch(
    config: BackendConfig,
    credentials: Option<Credentials>,
    cmd_rx: Receiver<BackendCommand>,
    ui_tx: Sender<UiEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let _ = ui_tx.try_send(UiEvent::Info("Backend worker starting...".to_string()));
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::Error(UiError::from_message(
                    UiErrorContext::BackendStartup,
                    format!("failed to build backend runtime: {err}"),
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            let client = match RelayClient::new(config) {
                Ok(client) => client,
                Err(err) => {
                    let _ = ui_tx.try_send(UiEvent::Error(UiError::from_error(
                        UiErrorContext::BackendStartup,
                        &err,
                    )));
                    tracing::error!("invalid backend configuration: {err:#}");
                    return;
                }
            };

            let event_task = tokio::spawn(forward_client_events(
                BroadcastStream::new(client.subscribe_events()),
                ui_tx.clone(),
            ));

            if sign_in(&client, credentials.as_ref(), &ui_tx).await {
                load_and_subscribe(&client, &ui_tx).await;
            }

            while let Ok(cmd) = cmd_rx.recv() {
                tracing::debug!(command = cmd.name(), "backend command received");
                handle_command(&client, cmd, credentials.as_ref(), &ui_tx).await;
            }

            let _ = client.sign_out().await;
            event_task.abort();
            tracing::info!("backend worker stopped");
        });
    })
}

async fn forward_client_events(
    mut events: BroadcastStream<client_core::ClientEvent>,
    ui_tx: Sender<UiEvent>,
) {
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                if ui_tx.send(UiEvent::from(event)).is_err() {
                    break;
                }
            }
            Err(err) => tracing::warn!("client event stream lagged: {err}"),
        }
    }
}

async fn sign_in(
    client: &Arc<RelayClient>,
    credentials: Option<&Credentials>,
    ui_tx: &Sender<UiEvent>,
) -> bool {
    let result = match credentials {
        Some(Credentials::Password { email, password }) => {
            client.sign_in(email, password).await.map(|_| ())
        }
        Some(Credentials::Redirect(url)) => client.sign_in_with_redirect(url).await.map(|_| ()),
        None => Err(anyhow::anyhow!(
            "no credentials configured; set auth.email and auth.password"
        )),
    };
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!("sign-in failed: {err:#}");
            let _ = ui_tx.send(UiEvent::Error(UiError::from_error(
                UiErrorContext::Login,
                &err,
            )));
            false
        }
    }
}

async fn load_and_subscribe(client: &Arc<RelayClient>, ui_tx: &Sender<UiEvent>) {
    match client.load_snapshot().await {
        Ok(snapshot) => {
            let _ = ui_tx.send(UiEvent::SnapshotLoaded(snapshot));
        }
        Err(err) => {
            let _ = ui_tx.send(UiEvent::Error(UiError::from_error(
                UiErrorContext::InitialLoad,
                &err,
            )));
            return;
        }
    }
    if let Err(err) = client.subscribe_realtime(&[]).await {
        let _ = ui_tx.send(UiEvent::Error(UiError::from_error(
            UiErrorContext::Realtime,
            &err,
        )));
    }
}

async fn handle_command(
    client: &Arc<RelayClient>,
    cmd: BackendCommand,
    credentials: Option<&Credentials>,
    ui_tx: &Sender<UiEvent>,
) {
    match cmd {
        BackendCommand::Refresh => {
            // Signed out after a failed start-up sign-in or a logout.
            if client.current_session().await.is_none() {
                let _ = ui_tx.send(UiEvent::Info("Signing in...".to_string()));
                if !sign_in(client, credentials, ui_tx).await {
                    return;
                }
            }
            load_and_subscribe(client, ui_tx).await;
        }
        BackendCommand::Pulse { master_id, ms } => {
            dispatch(client, ui_tx, master_id, None, CommandAction::Pulse, json!({ "ms": ms })).await;
        }
        BackendCommand::ResetMaster { master_id } => {
            dispatch(client, ui_tx, master_id, None, CommandAction::Reset, json!({})).await;
        }
        BackendCommand::Slave {
            master_id,
            mac,
            action,
        } => {
            dispatch(client, ui_tx, master_id, Some(mac), action, json!({})).await;
        }
        BackendCommand::Group { group_id, action } => {
            match client.dispatch_group(group_id, action, json!({})).await {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
                    if let Some(err) = outcomes.iter().find_map(|o| o.result.as_ref().err()) {
                        tracing::warn!(group_id = %group_id, "group member dispatch failed: {err:#}");
                    }
                    let _ = ui_tx.send(UiEvent::GroupDispatched {
                        group_id,
                        action,
                        queued: outcomes.len() - failed,
                        failed,
                    });
                }
                Err(err) => {
                    let _ = ui_tx.send(UiEvent::Error(UiError::from_error(
                        UiErrorContext::Dispatch,
                        &err,
                    )));
                }
            }
        }
        BackendCommand::RequestPairingCode => match client.request_pairing_code().await {
            Ok(code) => {
                let _ = ui_tx.send(UiEvent::PairingCode(code));
            }
            Err(err) => {
                let _ = ui_tx.send(UiEvent::Error(UiError::from_error(
                    UiErrorContext::Pairing,
                    &err,
                )));
            }
        },
        BackendCommand::SignOut => {
            if let Err(err) = client.sign_out().await {
                let _ = ui_tx.send(UiEvent::Error(UiError::from_error(
                    UiErrorContext::General,
                    &err,
                )));
            }
        }
    }
}

async fn dispatch(
    client: &Arc<RelayClient>,
    ui_tx: &Sender<UiEvent>,
    master_id: shared::domain::MasterId,
    target_mac: Option<String>,
    action: CommandAction,
    payload: serde_json::Value,
) {
    match client
        .dispatch_command(master_id, target_mac.as_deref(), action, payload)
        .await
    {
        Ok(command) => {
            let _ = ui_tx.send(UiEvent::CommandQueued {
                master_id,
                target_mac: command.target_mac,
                action,
                command_id: command.id,
            });
        }
        Err(err) => {
            let _ = ui_tx.send(UiEvent::Error(UiError::from_error(
                UiErrorContext::Dispatch,
                &err,
            )));
        }
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use shared::{
    domain::{
        Command, CommandAction, Group, GroupId, GroupMember, Master, MasterId, MasterState, Node,
        NodeId, PeerState, UserId,
    },
    protocol::{
        DeviceStateUpsert, FunctionAck, MasterRequest, NewCommand, NewGroup, NewGroupMember,
        PairingCodeResponse, PeerStateUpsert, RenameBody, RotateKeyResponse, RowChange, Table,
    },
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub mod auth;
pub mod config;
pub mod error;
pub mod phase;
pub mod realtime;
pub mod reconcile;
mod transport;

pub use auth::{strip_oauth_redirect, Session};
pub use config::{BackendConfig, FunctionNames};
pub use error::{BackendError, ClientError};
pub use phase::{phase_for_status, Phase, PhaseKey, PhaseMap, PHASE_CLEAR_DELAY};
pub use reconcile::{reconcile, ReconcileError, Snapshot, RECENT_COMMAND_LIMIT};

use auth::{PasswordGrant, RefreshGrant, TokenResponse};
use realtime::RealtimeFrame;
use transport::{ensure_success, eq, Rest};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SignedIn {
        user_id: Option<UserId>,
        email: Option<String>,
    },
    SignedOut,
    RowChanged(RowChange),
    PhaseChanged {
        key: PhaseKey,
        phase: Phase,
    },
    RealtimeSubscribed {
        table: Table,
    },
    /// The server closed one table's channel; the socket may still be up.
    RealtimeChannelClosed {
        table: Table,
    },
    RealtimeClosed {
        reason: String,
    },
    Error(String),
}

/// Outcome of one member of a group dispatch.
#[derive(Debug)]
pub struct GroupDispatchOutcome {
    pub member: GroupMember,
    pub result: Result<Command>,
}

#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;
    async fn sign_in_with_redirect(&self, redirect_url: &str) -> Result<String>;
    async fn sign_out(&self) -> Result<()>;
    async fn refresh_session(&self) -> Result<Session>;
    async fn load_snapshot(&self) -> Result<Snapshot>;
    async fn list_masters(&self) -> Result<Vec<Master>>;
    async fn list_nodes(&self, master_id: Option<MasterId>) -> Result<Vec<Node>>;
    async fn list_groups(&self) -> Result<Vec<Group>>;
    async fn list_group_members(&self, group_id: Option<GroupId>) -> Result<Vec<GroupMember>>;
    async fn list_commands(&self, master_id: Option<MasterId>, limit: usize)
        -> Result<Vec<Command>>;
    async fn list_master_states(&self) -> Result<Vec<MasterState>>;
    async fn list_peer_states(&self, master_id: Option<MasterId>) -> Result<Vec<PeerState>>;
    async fn rename_master(&self, master_id: MasterId, name: &str) -> Result<Master>;
    async fn rename_node(&self, node_id: NodeId, name: &str) -> Result<Node>;
    async fn dispatch_command(
        &self,
        master_id: MasterId,
        target_mac: Option<&str>,
        action: CommandAction,
        payload: Value,
    ) -> Result<Command>;
    async fn dispatch_group(
        &self,
        group_id: GroupId,
        action: CommandAction,
        payload: Value,
    ) -> Result<Vec<GroupDispatchOutcome>>;
    async fn create_group(&self, name: &str) -> Result<Group>;
    async fn delete_group(&self, group_id: GroupId) -> Result<()>;
    async fn add_group_member(
        &self,
        group_id: GroupId,
        master_id: MasterId,
        slave_mac: &str,
        alias: Option<&str>,
    ) -> Result<GroupMember>;
    async fn remove_group_member(
        &self,
        group_id: GroupId,
        master_id: MasterId,
        slave_mac: &str,
    ) -> Result<()>;
    async fn request_pairing_code(&self) -> Result<PairingCodeResponse>;
    async fn delete_master(&self, master_id: MasterId) -> Result<FunctionAck>;
    async fn upsert_device_state(&self, state: DeviceStateUpsert) -> Result<FunctionAck>;
    async fn upsert_peer_state(&self, state: PeerStateUpsert) -> Result<FunctionAck>;
    async fn rotate_device_key(&self, master_id: MasterId) -> Result<RotateKeyResponse>;
    async fn subscribe_realtime(&self, tables: &[Table]) -> Result<()>;
    async fn phase(&self, key: &PhaseKey) -> Phase;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

struct RealtimeTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    outbound: mpsc::Sender<Message>,
    tables: Vec<Table>,
}

impl RealtimeTasks {
    fn abort(self) {
        self.reader.abort();
        self.writer.abort();
        self.heartbeat.abort();
    }
}

#[derive(Default)]
struct RelayClientState {
    session: Option<Session>,
    realtime: Option<RealtimeTasks>,
}

pub struct RelayClient {
    http: Client,
    config: BackendConfig,
    inner: Mutex<RelayClientState>,
    phases: Mutex<PhaseMap>,
    next_ref: AtomicU64,
    events: broadcast::Sender<ClientEvent>,
}

impl RelayClient {
    pub fn new(config: BackendConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        let (events, _) = broadcast::channel(1024);
        Ok(Arc::new(Self {
            http,
            config,
            inner: Mutex::new(RelayClientState::default()),
            phases: Mutex::new(PhaseMap::new()),
            next_ref: AtomicU64::new(1),
            events,
        }))
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.inner.lock().await.session.clone()
    }

    pub async fn phases(&self) -> PhaseMap {
        self.phases.lock().await.clone()
    }

    fn next_reference(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::Relaxed)
    }

    async fn install_session(&self, session: Session) {
        let user_id = session.user_id;
        let email = session.email.clone();
        self.inner.lock().await.session = Some(session);
        let _ = self.events.send(ClientEvent::SignedIn { user_id, email });
    }

    async fn token_grant<B: serde::Serialize + ?Sized>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> Result<Session> {
        let res = self
            .http
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.config.anon_key)
            .json(body)
            .send()
            .await
            .context("failed to reach identity provider")?;
        let token: TokenResponse = ensure_success(res).await?.json().await?;
        Ok(token.into_session(Utc::now()))
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<Session> {
        let session = self
            .token_grant("refresh_token", &RefreshGrant { refresh_token })
            .await?;
        info!(user_id = ?session.user_id, "session refreshed");
        self.install_session(session.clone()).await;
        self.push_access_token(&session.access_token).await;
        Ok(session)
    }

    /// Hands a new access token to every joined realtime channel.
    async fn push_access_token(&self, access_token: &str) {
        let (outbound, tables) = {
            let guard = self.inner.lock().await;
            let Some(tasks) = guard.realtime.as_ref() else {
                return;
            };
            (tasks.outbound.clone(), tasks.tables.clone())
        };
        for table in &tables {
            let message =
                realtime::access_token_message(*table, access_token, self.next_reference());
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(table = table.as_str(), "failed to encode access token push: {err}");
                    continue;
                }
            };
            if outbound.send(Message::Text(text)).await.is_err() {
                warn!("realtime writer closed; access token not pushed");
                return;
            }
        }
        debug!(channels = tables.len(), "pushed refreshed access token to realtime");
    }

    /// Current access token, refreshed first when it is about to expire.
    async fn access_token(&self) -> Result<String> {
        let session = self
            .inner
            .lock()
            .await
            .session
            .clone()
            .ok_or(ClientError::NotSignedIn)?;
        if !session.is_expired_at(Utc::now()) {
            return Ok(session.access_token);
        }
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            return Err(anyhow!("session expired and no refresh token is available"));
        };
        Ok(self.refresh_with(refresh_token).await?.access_token)
    }

    fn rest<'a>(&'a self, token: &'a str) -> Rest<'a> {
        Rest {
            http: &self.http,
            config: &self.config,
            token,
        }
    }

    /// Sets a phase and schedules the idle reset for terminal phases.
    async fn set_phase(self: &Arc<Self>, key: PhaseKey, phase: Phase) {
        self.phases.lock().await.set(key.clone(), phase);
        debug!(%key, %phase, "phase changed");
        let _ = self.events.send(ClientEvent::PhaseChanged {
            key: key.clone(),
            phase,
        });
        if !phase.is_terminal() {
            return;
        }

        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(PHASE_CLEAR_DELAY).await;
            let cleared = client.phases.lock().await.clear_if_unchanged(&key, phase);
            if cleared {
                let _ = client.events.send(ClientEvent::PhaseChanged {
                    key,
                    phase: Phase::Idle,
                });
            }
        });
    }

    async fn handle_row_change(self: &Arc<Self>, change: RowChange) {
        if change.table == Table::Commands {
            match change.record_as::<Command>() {
                Some(Ok(command)) => {
                    if let Some(mac) = command.target_mac.as_deref() {
                        let key = PhaseKey::new(command.master_id, mac);
                        let phase = phase_for_status(command.status.as_deref());
                        self.set_phase(key, phase).await;
                    }
                }
                Some(Err(err)) => {
                    warn!(table = "commands", "undecodable command change: {err}");
                }
                None => {}
            }
        }
        let _ = self.events.send(ClientEvent::RowChanged(change));
    }

    async fn insert_command(&self, body: &NewCommand) -> Result<Command> {
        let token = self.access_token().await?;
        self.rest(&token).insert(Table::Commands, body).await
    }

    async fn dispatch_command_impl(
        self: &Arc<Self>,
        master_id: MasterId,
        target_mac: Option<&str>,
        action: CommandAction,
        payload: Value,
    ) -> Result<Command> {
        let target_mac = target_mac
            .map(str::trim)
            .filter(|mac| !mac.is_empty())
            .map(str::to_string);
        if action == CommandAction::Unknown {
            return Err(ClientError::InvalidInput("unknown command action".into()).into());
        }
        let key = target_mac
            .as_deref()
            .map(|mac| PhaseKey::new(master_id, mac));
        if let Some(key) = &key {
            self.set_phase(key.clone(), Phase::Sending).await;
        }

        let body = NewCommand {
            master_id,
            target_mac,
            action,
            payload,
        };
        let result = self.insert_command(&body).await;

        match (&result, key) {
            (Ok(command), Some(key)) => {
                info!(master_id = %master_id, slave_mac = %key.slave_mac, %action, command_id = command.id.0, "command queued");
                self.set_phase(key, Phase::Queued).await;
            }
            (Ok(command), None) => {
                info!(master_id = %master_id, %action, command_id = command.id.0, "command queued");
            }
            (Err(err), Some(key)) => {
                error!(master_id = %master_id, slave_mac = %key.slave_mac, %action, "command insert failed: {err:#}");
                self.set_phase(key, Phase::Error).await;
            }
            (Err(err), None) => {
                error!(master_id = %master_id, %action, "command insert failed: {err:#}");
            }
        }
        result
    }

    async fn invoke_function<B, T>(&self, name: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized + Sync,
        T: serde::de::DeserializeOwned,
    {
        let token = self.access_token().await?;
        self.rest(&token).invoke(name, body).await
    }

    /// Legacy state tables are optional; a missing relation reads as empty.
    async fn select_optional<T: serde::de::DeserializeOwned>(
        &self,
        table: Table,
        token: &str,
    ) -> Result<Vec<T>> {
        match self.rest(token).select(table, &[]).await {
            Ok(rows) => Ok(rows),
            Err(err) => match err.downcast_ref::<BackendError>() {
                Some(backend) if backend.is_missing_relation() => {
                    debug!(table = table.as_str(), "optional table unavailable");
                    Ok(Vec::new())
                }
                _ => Err(err),
            },
        }
    }

    async fn spawn_realtime(self: &Arc<Self>, tables: &[Table]) -> Result<()> {
        let token = self.access_token().await?;
        let ws_url = realtime::websocket_url(&self.config.url, &self.config.anon_key)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| ClientError::Realtime(format!("failed to connect websocket: {err}")))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(err) = ws_writer.send(message).await {
                    warn!("realtime send failed: {err}");
                    break;
                }
            }
        });

        let mut topics = HashMap::new();
        for table in tables {
            let join = realtime::join_message(*table, &token, self.next_reference());
            topics.insert(join.topic.clone(), *table);
            out_tx
                .send(Message::Text(serde_json::to_string(&join)?))
                .await
                .map_err(|_| ClientError::Realtime("websocket writer closed".into()))?;
        }

        let heartbeat_client = Arc::clone(self);
        let heartbeat_tx = out_tx.clone();
        let interval = self.config.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let beat = realtime::heartbeat_message(heartbeat_client.next_reference());
                let Ok(text) = serde_json::to_string(&beat) else {
                    continue;
                };
                if heartbeat_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let client = Arc::clone(self);
        let reader = tokio::spawn(async move {
            let reason = loop {
                let Some(msg) = ws_reader.next().await else {
                    break "websocket stream ended".to_string();
                };
                match msg {
                    Ok(Message::Text(text)) => match realtime::decode_frame(&text) {
                        Ok(RealtimeFrame::Change(change)) => client.handle_row_change(change).await,
                        Ok(RealtimeFrame::JoinReply { topic, ok, detail }) => {
                            let Some(table) = topics.get(&topic).copied() else {
                                continue;
                            };
                            if ok {
                                info!(table = table.as_str(), "realtime channel joined");
                                let _ = client
                                    .events
                                    .send(ClientEvent::RealtimeSubscribed { table });
                            } else {
                                let detail = detail.unwrap_or_else(|| "join rejected".into());
                                warn!(table = table.as_str(), "realtime join failed: {detail}");
                                let _ = client.events.send(ClientEvent::Error(format!(
                                    "realtime join for {} failed: {detail}",
                                    table.as_str()
                                )));
                            }
                        }
                        Ok(RealtimeFrame::ChannelError { topic, message }) => {
                            warn!(%topic, "realtime channel error: {message}");
                            let _ = client.events.send(ClientEvent::Error(format!(
                                "realtime channel {topic} error: {message}"
                            )));
                        }
                        Ok(RealtimeFrame::Closed { topic }) => {
                            let Some(table) = topics.get(&topic).copied() else {
                                debug!(%topic, "realtime channel closed");
                                continue;
                            };
                            warn!(table = table.as_str(), "realtime channel closed by server");
                            let _ = client
                                .events
                                .send(ClientEvent::RealtimeChannelClosed { table });
                        }
                        Ok(RealtimeFrame::Ignored) => {}
                        Err(err) => {
                            let _ = client
                                .events
                                .send(ClientEvent::Error(format!("invalid realtime frame: {err}")));
                        }
                    },
                    Ok(Message::Close(_)) => break "server closed the websocket".to_string(),
                    Ok(_) => {}
                    Err(err) => break format!("websocket receive failed: {err}"),
                }
            };
            warn!("realtime listener stopped: {reason}");
            let _ = client.events.send(ClientEvent::RealtimeClosed { reason });
        });

        let mut guard = self.inner.lock().await;
        if let Some(previous) = guard.realtime.take() {
            previous.abort();
        }
        guard.realtime = Some(RealtimeTasks {
            reader,
            writer,
            heartbeat,
            outbound: out_tx,
            tables: tables.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl ClientHandle for Arc<RelayClient> {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::InvalidInput("email and password are required".into()).into());
        }
        let session = self
            .token_grant(
                "password",
                &PasswordGrant {
                    email: email.trim(),
                    password,
                },
            )
            .await?;
        info!(user_id = ?session.user_id, "signed in");
        self.install_session(session.clone()).await;
        Ok(session)
    }

    async fn sign_in_with_redirect(&self, redirect_url: &str) -> Result<String> {
        let (clean_url, session) = strip_oauth_redirect(redirect_url, Utc::now())?;
        let session = session.ok_or_else(|| anyhow!("redirect url carried no access token"))?;
        info!(user_id = ?session.user_id, "signed in from oauth redirect");
        self.install_session(session).await;
        Ok(clean_url)
    }

    async fn sign_out(&self) -> Result<()> {
        let (session, realtime) = {
            let mut guard = self.inner.lock().await;
            (guard.session.take(), guard.realtime.take())
        };
        if let Some(tasks) = realtime {
            tasks.abort();
        }
        *self.phases.lock().await = PhaseMap::new();
        if let Some(session) = session {
            let res = self
                .http
                .post(self.config.auth_url("logout"))
                .header("apikey", &self.config.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            if let Err(err) = res {
                warn!("remote logout failed: {err}");
            }
        }
        let _ = self.events.send(ClientEvent::SignedOut);
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session> {
        let refresh_token = self
            .inner
            .lock()
            .await
            .session
            .as_ref()
            .ok_or(ClientError::NotSignedIn)?
            .refresh_token
            .clone()
            .ok_or_else(|| anyhow!("session has no refresh token"))?;
        self.refresh_with(&refresh_token).await
    }

    async fn load_snapshot(&self) -> Result<Snapshot> {
        let token = self.access_token().await?;
        let rest = self.rest(&token);
        let recent = RECENT_COMMAND_LIMIT.to_string();
        let by_name = [("order", "name.asc".to_string())];
        let by_mac = [("order", "mac.asc".to_string())];
        let newest_commands = [("order", "id.desc".to_string()), ("limit", recent)];
        let (masters, nodes, commands, groups, group_members) = tokio::try_join!(
            rest.select::<Master>(Table::Devices, &by_name),
            rest.select::<Node>(Table::Nodes, &by_mac),
            rest.select::<Command>(Table::Commands, &newest_commands),
            rest.select::<Group>(Table::Groups, &by_name),
            rest.select::<GroupMember>(Table::GroupMembers, &[]),
        )?;
        let (master_states, peer_states) = tokio::try_join!(
            self.select_optional::<MasterState>(Table::MasterStates, &token),
            self.select_optional::<PeerState>(Table::PeerStates, &token),
        )?;
        let mut snapshot = Snapshot {
            masters,
            nodes,
            commands,
            groups,
            group_members,
            master_states,
            peer_states,
        };
        snapshot.trim_commands();
        info!(
            masters = snapshot.masters.len(),
            nodes = snapshot.nodes.len(),
            groups = snapshot.groups.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    async fn list_masters(&self) -> Result<Vec<Master>> {
        let token = self.access_token().await?;
        self.rest(&token)
            .select(Table::Devices, &[("order", "name.asc".to_string())])
            .await
    }

    async fn list_nodes(&self, master_id: Option<MasterId>) -> Result<Vec<Node>> {
        let token = self.access_token().await?;
        let mut query = vec![("order", "mac.asc".to_string())];
        if let Some(master_id) = master_id {
            query.push(("master_id", eq(master_id)));
        }
        self.rest(&token).select(Table::Nodes, &query).await
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        let token = self.access_token().await?;
        self.rest(&token)
            .select(Table::Groups, &[("order", "name.asc".to_string())])
            .await
    }

    async fn list_group_members(&self, group_id: Option<GroupId>) -> Result<Vec<GroupMember>> {
        let token = self.access_token().await?;
        let query: Vec<(&str, String)> = group_id
            .map(|group_id| vec![("group_id", eq(group_id))])
            .unwrap_or_default();
        self.rest(&token).select(Table::GroupMembers, &query).await
    }

    async fn list_commands(
        &self,
        master_id: Option<MasterId>,
        limit: usize,
    ) -> Result<Vec<Command>> {
        let token = self.access_token().await?;
        let mut query = vec![
            ("order", "id.desc".to_string()),
            ("limit", limit.max(1).to_string()),
        ];
        if let Some(master_id) = master_id {
            query.push(("master_id", eq(master_id)));
        }
        self.rest(&token).select(Table::Commands, &query).await
    }

    async fn list_master_states(&self) -> Result<Vec<MasterState>> {
        let token = self.access_token().await?;
        self.rest(&token).select(Table::MasterStates, &[]).await
    }

    async fn list_peer_states(&self, master_id: Option<MasterId>) -> Result<Vec<PeerState>> {
        let token = self.access_token().await?;
        let query: Vec<(&str, String)> = master_id
            .map(|master_id| vec![("master_id", eq(master_id))])
            .unwrap_or_default();
        self.rest(&token).select(Table::PeerStates, &query).await
    }

    async fn rename_master(&self, master_id: MasterId, name: &str) -> Result<Master> {
        let name = validated_name(name)?;
        let token = self.access_token().await?;
        let mut rows: Vec<Master> = self
            .rest(&token)
            .update(
                Table::Devices,
                &[("id", eq(master_id))],
                &RenameBody { name },
            )
            .await?;
        rows.pop()
            .ok_or_else(|| anyhow!("master {master_id} not found"))
    }

    async fn rename_node(&self, node_id: NodeId, name: &str) -> Result<Node> {
        let name = validated_name(name)?;
        let token = self.access_token().await?;
        let mut rows: Vec<Node> = self
            .rest(&token)
            .update(Table::Nodes, &[("id", eq(node_id))], &RenameBody { name })
            .await?;
        rows.pop().ok_or_else(|| anyhow!("node {node_id} not found"))
    }

    async fn dispatch_command(
        &self,
        master_id: MasterId,
        target_mac: Option<&str>,
        action: CommandAction,
        payload: Value,
    ) -> Result<Command> {
        self.dispatch_command_impl(master_id, target_mac, action, payload)
            .await
    }

    async fn dispatch_group(
        &self,
        group_id: GroupId,
        action: CommandAction,
        payload: Value,
    ) -> Result<Vec<GroupDispatchOutcome>> {
        let members = self.list_group_members(Some(group_id)).await?;
        if members.is_empty() {
            return Err(ClientError::InvalidInput(format!("group {group_id} has no members")).into());
        }
        let mut outcomes = Vec::with_capacity(members.len());
        for member in members {
            let result = self
                .dispatch_command_impl(
                    member.master_id,
                    Some(member.slave_mac.as_str()),
                    action,
                    payload.clone(),
                )
                .await;
            outcomes.push(GroupDispatchOutcome { member, result });
        }
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(group_id = %group_id, %action, members = outcomes.len(), failed, "group dispatch finished");
        Ok(outcomes)
    }

    async fn create_group(&self, name: &str) -> Result<Group> {
        let name = validated_name(name)?;
        let token = self.access_token().await?;
        self.rest(&token)
            .insert(Table::Groups, &NewGroup { name })
            .await
    }

    async fn delete_group(&self, group_id: GroupId) -> Result<()> {
        let token = self.access_token().await?;
        self.rest(&token)
            .delete(Table::Groups, &[("id", eq(group_id))])
            .await
    }

    async fn add_group_member(
        &self,
        group_id: GroupId,
        master_id: MasterId,
        slave_mac: &str,
        alias: Option<&str>,
    ) -> Result<GroupMember> {
        let slave_mac = slave_mac.trim();
        if slave_mac.is_empty() {
            return Err(ClientError::InvalidInput("slave mac is required".into()).into());
        }
        let token = self.access_token().await?;
        self.rest(&token)
            .insert(
                Table::GroupMembers,
                &NewGroupMember {
                    group_id,
                    master_id,
                    slave_mac: slave_mac.to_string(),
                    alias: alias
                        .map(str::trim)
                        .filter(|alias| !alias.is_empty())
                        .map(str::to_string),
                },
            )
            .await
    }

    async fn remove_group_member(
        &self,
        group_id: GroupId,
        master_id: MasterId,
        slave_mac: &str,
    ) -> Result<()> {
        let token = self.access_token().await?;
        self.rest(&token)
            .delete(
                Table::GroupMembers,
                &[
                    ("group_id", eq(group_id)),
                    ("master_id", eq(master_id)),
                    ("slave_mac", eq(slave_mac.trim())),
                ],
            )
            .await
    }

    async fn request_pairing_code(&self) -> Result<PairingCodeResponse> {
        let name = self.config.functions.pairing_code.clone();
        let code: PairingCodeResponse = self
            .invoke_function(&name, &serde_json::json!({}))
            .await?;
        info!(expires_at = ?code.expires_at, "pairing code issued");
        Ok(code)
    }

    async fn delete_master(&self, master_id: MasterId) -> Result<FunctionAck> {
        let name = self.config.functions.delete_master.clone();
        let ack: FunctionAck = self
            .invoke_function(&name, &MasterRequest { master_id })
            .await?;
        info!(master_id = %master_id, "master deleted");
        Ok(ack)
    }

    async fn upsert_device_state(&self, state: DeviceStateUpsert) -> Result<FunctionAck> {
        let name = self.config.functions.device_state.clone();
        self.invoke_function(&name, &state).await
    }

    async fn upsert_peer_state(&self, state: PeerStateUpsert) -> Result<FunctionAck> {
        let name = self.config.functions.peer_state.clone();
        self.invoke_function(&name, &state).await
    }

    async fn rotate_device_key(&self, master_id: MasterId) -> Result<RotateKeyResponse> {
        let name = self.config.functions.rotate_device_key.clone();
        let rotated: RotateKeyResponse = self
            .invoke_function(&name, &MasterRequest { master_id })
            .await?;
        info!(master_id = %master_id, "device key rotated");
        Ok(rotated)
    }

    async fn subscribe_realtime(&self, tables: &[Table]) -> Result<()> {
        let tables = if tables.is_empty() {
            Table::ALL.to_vec()
        } else {
            tables.to_vec()
        };
        self.spawn_realtime(&tables).await
    }

    async fn phase(&self, key: &PhaseKey) -> Phase {
        self.phases.lock().await.get(key)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

fn validated_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ClientError::InvalidInput("name must not be empty".into()).into());
    }
    Ok(name.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

const FAILING_MAC: &str = "FF:FF:FF:FF:FF:FF";

#[derive(Clone, Default)]
struct MockBackend {
    inserts: Arc<Mutex<Vec<(String, Value)>>>,
    invocations: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    reject_all_inserts: bool,
}

fn master_a() -> MasterId {
    MasterId(Uuid::from_u128(0xA))
}

fn group_id() -> GroupId {
    GroupId(Uuid::from_u128(0x600))
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn select_rows(Path(table): Path<String>) -> Response {
    let rows = match table.as_str() {
        "devices" => json!([
            { "id": master_a(), "name": "pump house", "mac": "24:0A:C4:00:00:01", "last_seen": null }
        ]),
        "nodes" => json!([
            { "id": Uuid::from_u128(0xB1), "master_id": master_a(), "mac": "24:0A:C4:00:00:AA", "name": "heater", "powered": true }
        ]),
        "commands" => json!([
            { "id": 3, "master_id": master_a(), "target_mac": null, "action": "PULSE", "payload": { "ms": 500 }, "status": "ACKED" }
        ]),
        "groups" => json!([{ "id": group_id(), "name": "winter" }]),
        "group_members" => json!([
            { "group_id": group_id(), "master_id": master_a(), "slave_mac": "24:0A:C4:00:00:AA", "alias": "heater" },
            { "group_id": group_id(), "master_id": master_a(), "slave_mac": FAILING_MAC, "alias": null }
        ]),
        "peer_states" => json!([]),
        _ => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "code": "42P01", "message": format!("relation \"public.{table}\" does not exist") })),
            )
                .into_response()
        }
    };
    Json(rows).into_response()
}

async fn insert_rows(
    Path(table): Path<String>,
    State(state): State<MockBackend>,
    Json(body): Json<Value>,
) -> Response {
    state.inserts.lock().await.push((table.clone(), body.clone()));
    let failing_target = body.get("target_mac").and_then(Value::as_str) == Some(FAILING_MAC);
    if state.reject_all_inserts || failing_target {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "code": "42501", "message": "new row violates row-level security policy" })),
        )
            .into_response();
    }
    let mut row = body;
    if table == "commands" {
        let count = state.inserts.lock().await.len();
        row["id"] = json!(count);
        row["status"] = json!("NEW");
    } else {
        row["id"] = json!(Uuid::from_u128(0x700));
    }
    (StatusCode::CREATED, Json(json!([row]))).into_response()
}

async fn issue_token(
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some("anon-key") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "no apikey" }))).into_response();
    }
    if query.get("grant_type").map(String::as_str) == Some("refresh_token")
        && body["refresh_token"] == "refresh-1"
    {
        return Json(json!({
            "access_token": "opaque-access-2",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-2",
            "user": { "id": Uuid::from_u128(0x42), "email": "ops@example.com" }
        }))
        .into_response();
    }
    if query.get("grant_type").map(String::as_str) != Some("password")
        || body["password"] != "hunter2"
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
        )
            .into_response();
    }
    Json(json!({
        "access_token": "opaque-access",
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "refresh-1",
        "user": { "id": Uuid::from_u128(0x42), "email": body["email"] }
    }))
    .into_response()
}

async fn invoke_function(
    Path(name): Path<String>,
    State(state): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state
        .invocations
        .lock()
        .await
        .push((name.clone(), bearer(&headers), body.clone()));
    match name.as_str() {
        "pairing-code" => Json(json!({ "code": "483920", "expires_at": "2024-05-01T12:10:00Z" }))
            .into_response(),
        "rotate-device-key" => Json(json!({
            "master_id": body["master_id"],
            "device_key": "dk_new",
            "rotated_at": "2024-05-01T12:00:00Z"
        }))
        .into_response(),
        "delete-master" => StatusCode::NO_CONTENT.into_response(),
        _ => Json(json!({ "ok": true })).into_response(),
    }
}

/// Acknowledges each join, then closes that channel straight away.
async fn realtime_socket(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(close_after_join)
}

async fn close_after_join(mut socket: WebSocket) {
    while let Some(Ok(WsMessage::Text(text))) = socket.recv().await {
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if frame["event"] != "phx_join" {
            continue;
        }
        let reply = json!({
            "topic": frame["topic"],
            "event": "phx_reply",
            "ref": frame["ref"],
            "payload": { "status": "ok", "response": {} }
        });
        let close = json!({
            "topic": frame["topic"],
            "event": "phx_close",
            "ref": null,
            "payload": {}
        });
        for out in [reply, close] {
            if socket.send(WsMessage::Text(out.to_string())).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_backend(state: MockBackend) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/rest/v1/:table", get(select_rows).post(insert_rows))
        .route("/auth/v1/token", post(issue_token))
        .route("/functions/v1/:name", post(invoke_function))
        .route("/realtime/v1/websocket", get(realtime_socket))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

async fn signed_in_client(url: &str) -> Arc<RelayClient> {
    let client = RelayClient::new(BackendConfig::new(url, "anon-key")).expect("client");
    client.inner.lock().await.session = Some(Session::from_access_token("test-token"));
    client
}

fn drain_phases(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<Phase> {
    let mut phases = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ClientEvent::PhaseChanged { phase, .. } = event {
            phases.push(phase);
        }
    }
    phases
}

fn command_change(status: &str, target_mac: Option<&str>) -> RowChange {
    RowChange {
        table: Table::Commands,
        kind: shared::protocol::ChangeKind::Insert,
        record: Some(json!({
            "id": 11,
            "master_id": master_a(),
            "target_mac": target_mac,
            "action": "SLV_IO",
            "payload": {},
            "status": status
        })),
        old_record: None,
        commit_timestamp: None,
    }
}

#[tokio::test]
async fn pulse_without_target_inserts_null_mac_and_no_phase() {
    let backend = MockBackend::default();
    let url = spawn_backend(backend.clone()).await.expect("backend");
    let client = signed_in_client(&url).await;
    let mut rx = client.subscribe_events();

    let command = client
        .dispatch_command(master_a(), None, CommandAction::Pulse, json!({ "ms": 500 }))
        .await
        .expect("dispatch");

    assert_eq!(command.target_mac, None);
    let inserts = backend.inserts.lock().await;
    assert_eq!(inserts.len(), 1);
    let (table, body) = &inserts[0];
    assert_eq!(table, "commands");
    assert_eq!(body["target_mac"], Value::Null);
    assert_eq!(body["action"], "PULSE");
    assert_eq!(body["payload"]["ms"], 500);
    assert!(client.phases().await.is_empty());
    assert!(drain_phases(&mut rx).is_empty());
}

#[tokio::test]
async fn slave_dispatch_moves_through_sending_to_queued() {
    let backend = MockBackend::default();
    let url = spawn_backend(backend.clone()).await.expect("backend");
    let client = signed_in_client(&url).await;
    let mut rx = client.subscribe_events();

    client
        .dispatch_command(
            master_a(),
            Some("24:0a:c4:00:00:aa"),
            CommandAction::SlaveIo,
            json!({}),
        )
        .await
        .expect("dispatch");

    assert_eq!(drain_phases(&mut rx), vec![Phase::Sending, Phase::Queued]);
    let key = PhaseKey::new(master_a(), "24:0A:C4:00:00:AA");
    assert_eq!(client.phase(&key).await, Phase::Queued);
    assert_eq!(
        key.to_string(),
        format!("{}|24:0A:C4:00:00:AA", master_a())
    );
}

#[tokio::test]
async fn rejected_insert_flags_error_and_surfaces_backend_error() {
    let backend = MockBackend {
        reject_all_inserts: true,
        ..MockBackend::default()
    };
    let url = spawn_backend(backend).await.expect("backend");
    let client = signed_in_client(&url).await;
    let mut rx = client.subscribe_events();

    let err = client
        .dispatch_command(master_a(), Some("AA:01"), CommandAction::SlaveReset, json!({}))
        .await
        .expect_err("insert should be rejected");

    let backend_err = err.downcast_ref::<BackendError>().expect("backend error");
    assert_eq!(backend_err.status, 403);
    assert!(backend_err.message.contains("row-level security"));
    assert_eq!(drain_phases(&mut rx), vec![Phase::Sending, Phase::Error]);
    assert_eq!(
        client.phase(&PhaseKey::new(master_a(), "AA:01")).await,
        Phase::Error
    );
}

#[tokio::test(start_paused = true)]
async fn dispatch_without_session_flags_error_then_clears() {
    let client =
        RelayClient::new(BackendConfig::new("http://127.0.0.1:9", "anon-key")).expect("client");
    let key = PhaseKey::new(master_a(), "AA:02");

    let err = client
        .dispatch_command(master_a(), Some("AA:02"), CommandAction::SlaveIo, json!({}))
        .await
        .expect_err("no session");
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::NotSignedIn)
    ));
    assert_eq!(client.phase(&key).await, Phase::Error);

    tokio::time::sleep(PHASE_CLEAR_DELAY + Duration::from_millis(50)).await;
    assert_eq!(client.phase(&key).await, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn acked_notification_clears_after_delay() {
    let client =
        RelayClient::new(BackendConfig::new("http://127.0.0.1:9", "anon-key")).expect("client");
    let mut rx = client.subscribe_events();
    let key = PhaseKey::new(master_a(), "AA:03");

    client
        .handle_row_change(command_change("ACKED", Some("AA:03")))
        .await;
    assert_eq!(client.phase(&key).await, Phase::Acked);

    tokio::time::sleep(Duration::from_millis(1_400)).await;
    assert_eq!(client.phase(&key).await, Phase::Acked);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.phase(&key).await, Phase::Idle);
    assert_eq!(drain_phases(&mut rx), vec![Phase::Acked, Phase::Idle]);
}

#[tokio::test(start_paused = true)]
async fn newer_phase_survives_stale_clear() {
    let client =
        RelayClient::new(BackendConfig::new("http://127.0.0.1:9", "anon-key")).expect("client");
    let key = PhaseKey::new(master_a(), "AA:04");

    client
        .handle_row_change(command_change("ERR", Some("AA:04")))
        .await;
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    client
        .handle_row_change(command_change("SENT", Some("AA:04")))
        .await;

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(client.phase(&key).await, Phase::Sending);
}

#[tokio::test]
async fn command_change_without_target_only_forwards_row() {
    let client =
        RelayClient::new(BackendConfig::new("http://127.0.0.1:9", "anon-key")).expect("client");
    let mut rx = client.subscribe_events();

    client.handle_row_change(command_change("ACKED", None)).await;

    assert!(client.phases().await.is_empty());
    match rx.try_recv().expect("event") {
        ClientEvent::RowChanged(change) => assert_eq!(change.table, Table::Commands),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn sign_in_installs_session_from_token_response() {
    let url = spawn_backend(MockBackend::default()).await.expect("backend");
    let client = RelayClient::new(BackendConfig::new(&url, "anon-key")).expect("client");
    let mut rx = client.subscribe_events();

    let session = client
        .sign_in("ops@example.com", "hunter2")
        .await
        .expect("sign in");

    assert_eq!(session.access_token, "opaque-access");
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(session.user_id, Some(UserId(Uuid::from_u128(0x42))));
    assert!(session.expires_at.is_some());
    assert!(matches!(
        rx.try_recv().expect("event"),
        ClientEvent::SignedIn { .. }
    ));

    let err = client
        .sign_in("ops@example.com", "wrong")
        .await
        .expect_err("bad password");
    let backend_err = err.downcast_ref::<BackendError>().expect("backend error");
    assert_eq!(backend_err.message, "Invalid login credentials");
}

#[tokio::test]
async fn load_snapshot_treats_missing_legacy_tables_as_empty() {
    let url = spawn_backend(MockBackend::default()).await.expect("backend");
    let client = signed_in_client(&url).await;

    let snapshot = client.load_snapshot().await.expect("snapshot");

    assert_eq!(snapshot.masters.len(), 1);
    assert_eq!(snapshot.nodes_for(master_a()).count(), 1);
    assert_eq!(snapshot.members_of(group_id()).count(), 2);
    assert_eq!(snapshot.commands.len(), 1);
    assert!(snapshot.master_states.is_empty());
    assert!(snapshot.peer_states.is_empty());
}

#[tokio::test]
async fn requests_require_a_session() {
    let client =
        RelayClient::new(BackendConfig::new("http://127.0.0.1:9", "anon-key")).expect("client");
    let err = client.list_masters().await.expect_err("not signed in");
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::NotSignedIn)
    ));
}

#[tokio::test]
async fn group_dispatch_continues_past_member_failures() {
    let backend = MockBackend::default();
    let url = spawn_backend(backend.clone()).await.expect("backend");
    let client = signed_in_client(&url).await;

    let outcomes = client
        .dispatch_group(group_id(), CommandAction::SlaveForceOff, json!({}))
        .await
        .expect("group dispatch");

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_ok());
    assert!(outcomes[1].result.is_err());
    assert_eq!(backend.inserts.lock().await.len(), 2);
    assert_eq!(
        client
            .phase(&PhaseKey::new(master_a(), "24:0A:C4:00:00:AA"))
            .await,
        Phase::Queued
    );
    assert_eq!(
        client.phase(&PhaseKey::new(master_a(), FAILING_MAC)).await,
        Phase::Error
    );
}

#[tokio::test]
async fn remote_procedures_send_bearer_token() {
    let backend = MockBackend::default();
    let url = spawn_backend(backend.clone()).await.expect("backend");
    let client = signed_in_client(&url).await;

    let code = client.request_pairing_code().await.expect("pairing code");
    assert_eq!(code.code, "483920");

    let rotated = client.rotate_device_key(master_a()).await.expect("rotate");
    assert_eq!(rotated.master_id, master_a());
    assert_eq!(rotated.device_key, "dk_new");

    let ack = client.delete_master(master_a()).await.expect("delete");
    assert!(!ack.ok);

    let invocations = backend.invocations.lock().await;
    let names: Vec<&str> = invocations.iter().map(|(name, _, _)| name.as_str()).collect();
    assert_eq!(names, vec!["pairing-code", "rotate-device-key", "delete-master"]);
    assert!(invocations
        .iter()
        .all(|(_, auth, _)| auth.as_deref() == Some("Bearer test-token")));
    assert_eq!(invocations[2].2["master_id"], json!(master_a()));
}

#[tokio::test]
async fn rename_rejects_blank_names_before_any_request() {
    let client =
        RelayClient::new(BackendConfig::new("http://127.0.0.1:9", "anon-key")).expect("client");
    let err = client
        .rename_master(master_a(), "   ")
        .await
        .expect_err("blank name");
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn refreshed_token_is_pushed_to_joined_channels() {
    let url = spawn_backend(MockBackend::default()).await.expect("backend");
    let client = RelayClient::new(BackendConfig::new(&url, "anon-key")).expect("client");
    let mut session = Session::from_access_token("stale-token");
    session.refresh_token = Some("refresh-1".into());
    let (outbound, mut sent) = mpsc::channel(8);
    {
        let mut guard = client.inner.lock().await;
        guard.session = Some(session);
        guard.realtime = Some(RealtimeTasks {
            reader: tokio::spawn(async {}),
            writer: tokio::spawn(async {}),
            heartbeat: tokio::spawn(async {}),
            outbound,
            tables: vec![Table::Devices, Table::Commands],
        });
    }

    let refreshed = client.refresh_session().await.expect("refresh");
    assert_eq!(refreshed.access_token, "opaque-access-2");

    let mut pushed = Vec::new();
    while let Ok(Message::Text(text)) = sent.try_recv() {
        pushed.push(serde_json::from_str::<realtime::PhoenixMessage>(&text).expect("frame"));
    }
    let topics: Vec<&str> = pushed.iter().map(|msg| msg.topic.as_str()).collect();
    assert_eq!(topics, vec!["realtime:public:devices", "realtime:public:commands"]);
    for msg in &pushed {
        assert_eq!(msg.event, "access_token");
        assert_eq!(msg.payload["access_token"], "opaque-access-2");
    }
}

#[tokio::test]
async fn refresh_without_realtime_pushes_nothing() {
    let url = spawn_backend(MockBackend::default()).await.expect("backend");
    let client = RelayClient::new(BackendConfig::new(&url, "anon-key")).expect("client");
    let mut session = Session::from_access_token("stale-token");
    session.refresh_token = Some("refresh-1".into());
    client.inner.lock().await.session = Some(session);

    client.refresh_session().await.expect("refresh");

    assert!(client.inner.lock().await.realtime.is_none());
    assert_eq!(
        client.current_session().await.map(|session| session.access_token),
        Some("opaque-access-2".to_string())
    );
}

#[tokio::test]
async fn server_closed_channel_is_reported_per_table() {
    let url = spawn_backend(MockBackend::default()).await.expect("backend");
    let client = signed_in_client(&url).await;
    let mut rx = client.subscribe_events();

    client
        .subscribe_realtime(&[Table::Commands])
        .await
        .expect("subscribe");

    let mut seen = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ClientEvent::RealtimeChannelClosed { table }) => break table,
                Ok(event) => seen.push(event),
                Err(err) => panic!("event bus failed: {err}"),
            }
        }
    })
    .await
    .expect("channel close event");

    assert_eq!(closed, Table::Commands);
    assert!(seen.iter().any(|event| matches!(
        event,
        ClientEvent::RealtimeSubscribed {
            table: Table::Commands
        }
    )));
    assert!(!seen
        .iter()
        .any(|event| matches!(event, ClientEvent::RealtimeClosed { .. })));
    client.sign_out().await.expect("sign out");
}

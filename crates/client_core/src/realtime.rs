//! Phoenix-channel framing for the realtime change feed.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::protocol::{ChangeKind, RowChange, Table};
use url::Url;

const REALTIME_PROTOCOL_VSN: &str = "1.0.0";
const PHOENIX_TOPIC: &str = "phoenix";
const SCHEMA: &str = "public";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeFrame {
    Change(RowChange),
    JoinReply {
        topic: String,
        ok: bool,
        detail: Option<String>,
    },
    ChannelError {
        topic: String,
        message: String,
    },
    Closed {
        topic: String,
    },
    Ignored,
}

pub fn topic_for(table: Table) -> String {
    format!("realtime:{SCHEMA}:{}", table.as_str())
}

/// `http(s)://host` → `ws(s)://host/realtime/v1/websocket?apikey=..&vsn=..`
pub fn websocket_url(base_url: &str, anon_key: &str) -> Result<String> {
    let mut url = Url::parse(base_url).with_context(|| format!("invalid backend url: {base_url}"))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(anyhow!("unsupported backend url scheme: {other}")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("failed to switch {base_url} to {scheme}"))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", REALTIME_PROTOCOL_VSN);
    Ok(url.to_string())
}

pub fn join_message(table: Table, access_token: &str, reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic_for(table),
        event: "phx_join".into(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": SCHEMA, "table": table.as_str() }
                ]
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
    }
}

pub fn access_token_message(table: Table, access_token: &str, reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic_for(table),
        event: "access_token".into(),
        payload: json!({ "access_token": access_token }),
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_message(reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: PHOENIX_TOPIC.into(),
        event: "heartbeat".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
    #[serde(default)]
    commit_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

pub fn decode_frame(text: &str) -> Result<RealtimeFrame> {
    let message: PhoenixMessage =
        serde_json::from_str(text).context("invalid realtime frame")?;
    match message.event.as_str() {
        "postgres_changes" => {
            let payload: ChangePayload = serde_json::from_value(message.payload)
                .context("invalid postgres_changes payload")?;
            let Some(table) = Table::from_name(&payload.data.table) else {
                return Ok(RealtimeFrame::Ignored);
            };
            Ok(RealtimeFrame::Change(RowChange {
                table,
                kind: payload.data.kind,
                record: payload.data.record,
                old_record: payload.data.old_record,
                commit_timestamp: payload.data.commit_timestamp,
            }))
        }
        "phx_reply" if message.topic != PHOENIX_TOPIC => {
            let ok = message.payload.get("status").and_then(Value::as_str) == Some("ok");
            let detail = message
                .payload
                .get("response")
                .and_then(|response| response.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(RealtimeFrame::JoinReply {
                topic: message.topic,
                ok,
                detail,
            })
        }
        "phx_error" => Ok(RealtimeFrame::ChannelError {
            topic: message.topic,
            message: message.payload.to_string(),
        }),
        "system" if message.payload.get("status").and_then(Value::as_str) == Some("error") => {
            Ok(RealtimeFrame::ChannelError {
                topic: message.topic,
                message: message
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("system error")
                    .to_string(),
            })
        }
        "phx_close" => Ok(RealtimeFrame::Closed {
            topic: message.topic,
        }),
        _ => Ok(RealtimeFrame::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_websocket_url_from_https_base() {
        let url = websocket_url("https://relay.example.co", "anon-key").expect("url");
        assert_eq!(
            url,
            "wss://relay.example.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );
        let url = websocket_url("http://127.0.0.1:54321", "k").expect("url");
        assert!(url.starts_with("ws://127.0.0.1:54321/realtime/v1/websocket?"));
        assert!(websocket_url("ftp://relay", "k").is_err());
    }

    #[test]
    fn join_message_targets_one_table() {
        let msg = join_message(Table::Commands, "token", 3);
        assert_eq!(msg.topic, "realtime:public:commands");
        assert_eq!(msg.event, "phx_join");
        assert_eq!(msg.reference.as_deref(), Some("3"));
        assert_eq!(
            msg.payload["config"]["postgres_changes"][0]["table"],
            "commands"
        );
        let encoded = serde_json::to_value(&msg).expect("encode");
        assert_eq!(encoded["ref"], "3");
    }

    #[test]
    fn decodes_postgres_change() {
        let frame = decode_frame(
            r#"{
                "topic": "realtime:public:commands",
                "event": "postgres_changes",
                "ref": null,
                "payload": {
                    "ids": [1],
                    "data": {
                        "schema": "public",
                        "table": "commands",
                        "type": "INSERT",
                        "commit_timestamp": "2024-05-01T12:00:00Z",
                        "record": { "id": 9, "status": "ACKED" },
                        "old_record": null,
                        "columns": []
                    }
                }
            }"#,
        )
        .expect("decode");
        let RealtimeFrame::Change(change) = frame else {
            panic!("expected change frame");
        };
        assert_eq!(change.table, Table::Commands);
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.record.expect("record")["status"], "ACKED");
    }

    #[test]
    fn decodes_join_replies_and_ignores_heartbeat_acks() {
        let frame = decode_frame(
            r#"{"topic":"realtime:public:nodes","event":"phx_reply","ref":"2","payload":{"status":"error","response":{"reason":"unauthorized"}}}"#,
        )
        .expect("decode");
        assert_eq!(
            frame,
            RealtimeFrame::JoinReply {
                topic: "realtime:public:nodes".into(),
                ok: false,
                detail: Some("unauthorized".into()),
            }
        );

        let frame = decode_frame(
            r#"{"topic":"phoenix","event":"phx_reply","ref":"7","payload":{"status":"ok","response":{}}}"#,
        )
        .expect("decode");
        assert_eq!(frame, RealtimeFrame::Ignored);
    }

    #[test]
    fn unknown_tables_are_ignored() {
        let frame = decode_frame(
            r#"{"topic":"realtime:public:audit","event":"postgres_changes","payload":{"data":{"table":"audit","type":"DELETE"}}}"#,
        )
        .expect("decode");
        assert_eq!(frame, RealtimeFrame::Ignored);
    }
}

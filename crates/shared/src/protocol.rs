use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::{CommandAction, GroupId, MasterId};

/// Backend collections the client reads, writes and listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Devices,
    Nodes,
    Commands,
    Groups,
    GroupMembers,
    MasterStates,
    PeerStates,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Devices,
        Table::Nodes,
        Table::Commands,
        Table::Groups,
        Table::GroupMembers,
        Table::MasterStates,
        Table::PeerStates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Devices => "devices",
            Self::Nodes => "nodes",
            Self::Commands => "commands",
            Self::Groups => "groups",
            Self::GroupMembers => "group_members",
            Self::MasterStates => "master_states",
            Self::PeerStates => "peer_states",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.as_str() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change notification, transport independent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: Table,
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl RowChange {
    pub fn record_as<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.record
            .as_ref()
            .filter(|record| !is_empty_record(record))
            .map(|record| serde_json::from_value(record.clone()))
    }

    pub fn old_record_as<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.old_record
            .as_ref()
            .filter(|record| !is_empty_record(record))
            .map(|record| serde_json::from_value(record.clone()))
    }
}

fn is_empty_record(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Body of a command insert. `target_mac` is always serialized, `null` for
/// commands aimed at the master itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommand {
    pub master_id: MasterId,
    pub target_mac: Option<String>,
    pub action: CommandAction,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroupMember {
    pub group_id: GroupId,
    pub master_id: MasterId,
    pub slave_mac: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameBody {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingCodeResponse {
    pub code: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRequest {
    pub master_id: MasterId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateUpsert {
    pub master_id: MasterId,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStateUpsert {
    pub master_id: MasterId,
    pub mac: String,
    pub powered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateKeyResponse {
    pub master_id: MasterId,
    pub device_key: String,
    #[serde(default)]
    pub rotated_at: Option<DateTime<Utc>>,
}

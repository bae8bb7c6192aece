use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A master counts as live while its last heartbeat is younger than this.
pub const LIVENESS_WINDOW_MS: i64 = 8_000;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(MasterId);
id_newtype!(NodeId);
id_newtype!(GroupId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub i64);

/// A physical control unit. Rows live in the `devices` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Master {
    pub id: MasterId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Master {
    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }

    /// `last_seen` must be set and strictly younger than [`LIVENESS_WINDOW_MS`].
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_seen {
            Some(last_seen) => {
                now.signed_duration_since(last_seen).num_milliseconds() < LIVENESS_WINDOW_MS
            }
            None => false,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.mac.as_deref())
            .unwrap_or("(unnamed master)")
    }
}

/// A power-controlled endpoint attached to a master. Rows live in `nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub master_id: MasterId,
    pub mac: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub powered: bool,
}

impl Node {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.mac)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandAction {
    /// Power pulse on the master's own relay.
    #[serde(rename = "PULSE")]
    Pulse,
    #[serde(rename = "RESET")]
    Reset,
    /// Power pulse on a slave.
    #[serde(rename = "SLV_IO")]
    SlaveIo,
    #[serde(rename = "SLV_RESET")]
    SlaveReset,
    #[serde(rename = "SLV_FORCE_OFF")]
    SlaveForceOff,
    #[serde(rename = "SLV_HARD_RESET")]
    SlaveHardReset,
    #[serde(other, rename = "UNKNOWN")]
    Unknown,
}

impl CommandAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pulse => "PULSE",
            Self::Reset => "RESET",
            Self::SlaveIo => "SLV_IO",
            Self::SlaveReset => "SLV_RESET",
            Self::SlaveForceOff => "SLV_FORCE_OFF",
            Self::SlaveHardReset => "SLV_HARD_RESET",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn targets_slave(self) -> bool {
        matches!(
            self,
            Self::SlaveIo | Self::SlaveReset | Self::SlaveForceOff | Self::SlaveHardReset
        )
    }

    /// Accepts wire tags (`SLV_IO`) and the short console verbs (`io`, `off`).
    pub fn parse(raw: &str) -> Option<Self> {
        let action = match raw.trim().to_ascii_uppercase().as_str() {
            "PULSE" => Self::Pulse,
            "RESET" => Self::Reset,
            "SLV_IO" | "IO" => Self::SlaveIo,
            "SLV_RESET" | "SLAVE_RESET" => Self::SlaveReset,
            "SLV_FORCE_OFF" | "OFF" | "FORCE_OFF" => Self::SlaveForceOff,
            "SLV_HARD_RESET" | "HARD" | "HARD_RESET" => Self::SlaveHardReset,
            _ => return None,
        };
        Some(action)
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued instruction. The status lifecycle is driven by the device side;
/// the client only ever writes new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub master_id: MasterId,
    #[serde(default)]
    pub target_mac: Option<String>,
    pub action: CommandAction,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: GroupId,
    pub master_id: MasterId,
    pub slave_mac: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl GroupMember {
    pub fn same_slot(&self, other: &GroupMember) -> bool {
        self.group_id == other.group_id
            && self.master_id == other.master_id
            && self.slave_mac.eq_ignore_ascii_case(&other.slave_mac)
    }
}

/// Row of the legacy `master_states` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterState {
    pub master_id: MasterId,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fw: Option<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
}

/// Row of the legacy `peer_states` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerState {
    pub master_id: MasterId,
    pub mac: String,
    #[serde(default)]
    pub powered: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

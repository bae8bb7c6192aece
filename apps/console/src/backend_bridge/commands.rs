//! Backend commands queued from the dashboard to the backend worker.

use shared::domain::{CommandAction, GroupId, MasterId};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    /// Re-reads every collection and replaces the dashboard snapshot.
    Refresh,
    Pulse {
        master_id: MasterId,
        ms: u64,
    },
    ResetMaster {
        master_id: MasterId,
    },
    Slave {
        master_id: MasterId,
        mac: String,
        action: CommandAction,
    },
    Group {
        group_id: GroupId,
        action: CommandAction,
    },
    RequestPairingCode,
    SignOut,
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::Pulse { .. } => "pulse",
            Self::ResetMaster { .. } => "reset_master",
            Self::Slave { .. } => "slave",
            Self::Group { .. } => "group",
            Self::RequestPairingCode => "request_pairing_code",
            Self::SignOut => "sign_out",
        }
    }
}

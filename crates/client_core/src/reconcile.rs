//! Applies realtime row changes to the locally held snapshot.

use serde::{de::DeserializeOwned, Deserialize};
use shared::{
    domain::{
        Command, CommandId, Group, GroupId, GroupMember, Master, MasterId, MasterState, Node,
        NodeId, PeerState,
    },
    protocol::{ChangeKind, RowChange, Table},
};
use thiserror::Error;

/// Commands older than the newest this many are dropped from the snapshot.
pub const RECENT_COMMAND_LIMIT: usize = 50;

/// Transient projection of the backend collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub masters: Vec<Master>,
    pub nodes: Vec<Node>,
    pub commands: Vec<Command>,
    pub groups: Vec<Group>,
    pub group_members: Vec<GroupMember>,
    pub master_states: Vec<MasterState>,
    pub peer_states: Vec<PeerState>,
}

impl Snapshot {
    pub fn master(&self, master_id: MasterId) -> Option<&Master> {
        self.masters.iter().find(|master| master.id == master_id)
    }

    pub fn nodes_for(&self, master_id: MasterId) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(move |node| node.master_id == master_id)
    }

    pub fn node_by_mac(&self, master_id: MasterId, mac: &str) -> Option<&Node> {
        self.nodes_for(master_id)
            .find(|node| node.mac.eq_ignore_ascii_case(mac.trim()))
    }

    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|group| group.id == group_id)
    }

    pub fn members_of(&self, group_id: GroupId) -> impl Iterator<Item = &GroupMember> {
        self.group_members
            .iter()
            .filter(move |member| member.group_id == group_id)
    }

    pub fn master_state(&self, master_id: MasterId) -> Option<&MasterState> {
        self.master_states
            .iter()
            .find(|state| state.master_id == master_id)
    }

    /// Keeps commands newest first and bounded.
    pub fn trim_commands(&mut self) {
        self.commands.sort_by(|a, b| b.id.cmp(&a.id));
        self.commands.truncate(RECENT_COMMAND_LIMIT);
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{table:?} {kind:?} carried no usable record")]
    MissingRecord { table: Table, kind: ChangeKind },
    #[error("failed to decode {table:?} record: {source}")]
    Decode {
        table: Table,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct IdKey<T> {
    id: T,
}

#[derive(Deserialize)]
struct MasterKey {
    master_id: MasterId,
}

#[derive(Deserialize)]
struct MemberKey {
    group_id: GroupId,
    master_id: MasterId,
    slave_mac: String,
}

#[derive(Deserialize)]
struct PeerKey {
    master_id: MasterId,
    mac: String,
}

/// Returns `snapshot` with `change` applied.
///
/// Inserts and updates upsert by key; deletes remove by the key carried in
/// `old_record`. A failed decode leaves the caller's snapshot untouched.
pub fn reconcile(snapshot: &Snapshot, change: &RowChange) -> Result<Snapshot, ReconcileError> {
    let mut next = snapshot.clone();
    match change.kind {
        ChangeKind::Insert | ChangeKind::Update => apply_upsert(&mut next, change)?,
        ChangeKind::Delete => apply_delete(&mut next, change)?,
    }
    Ok(next)
}

fn decode_new<T: DeserializeOwned>(change: &RowChange) -> Result<T, ReconcileError> {
    change
        .record_as::<T>()
        .ok_or(ReconcileError::MissingRecord {
            table: change.table,
            kind: change.kind,
        })?
        .map_err(|source| ReconcileError::Decode {
            table: change.table,
            source,
        })
}

fn decode_old<T: DeserializeOwned>(change: &RowChange) -> Result<T, ReconcileError> {
    change
        .old_record_as::<T>()
        .ok_or(ReconcileError::MissingRecord {
            table: change.table,
            kind: change.kind,
        })?
        .map_err(|source| ReconcileError::Decode {
            table: change.table,
            source,
        })
}

fn upsert_by<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) {
    match items.iter_mut().find(|existing| same(existing, &item)) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

fn apply_upsert(next: &mut Snapshot, change: &RowChange) -> Result<(), ReconcileError> {
    match change.table {
        Table::Devices => {
            let master: Master = decode_new(change)?;
            upsert_by(&mut next.masters, master, |a, b| a.id == b.id);
        }
        Table::Nodes => {
            let node: Node = decode_new(change)?;
            upsert_by(&mut next.nodes, node, |a, b| a.id == b.id);
        }
        Table::Commands => {
            let command: Command = decode_new(change)?;
            upsert_by(&mut next.commands, command, |a, b| a.id == b.id);
            next.trim_commands();
        }
        Table::Groups => {
            let group: Group = decode_new(change)?;
            upsert_by(&mut next.groups, group, |a, b| a.id == b.id);
        }
        Table::GroupMembers => {
            let member: GroupMember = decode_new(change)?;
            upsert_by(&mut next.group_members, member, GroupMember::same_slot);
        }
        Table::MasterStates => {
            let state: MasterState = decode_new(change)?;
            upsert_by(&mut next.master_states, state, |a, b| {
                a.master_id == b.master_id
            });
        }
        Table::PeerStates => {
            let state: PeerState = decode_new(change)?;
            upsert_by(&mut next.peer_states, state, |a, b| {
                a.master_id == b.master_id && a.mac.eq_ignore_ascii_case(&b.mac)
            });
        }
    }
    Ok(())
}

fn apply_delete(next: &mut Snapshot, change: &RowChange) -> Result<(), ReconcileError> {
    match change.table {
        Table::Devices => {
            let IdKey { id } = decode_old::<IdKey<MasterId>>(change)?;
            next.masters.retain(|master| master.id != id);
            next.nodes.retain(|node| node.master_id != id);
            next.group_members.retain(|member| member.master_id != id);
            next.master_states.retain(|state| state.master_id != id);
            next.peer_states.retain(|state| state.master_id != id);
        }
        Table::Nodes => {
            let IdKey { id } = decode_old::<IdKey<NodeId>>(change)?;
            next.nodes.retain(|node| node.id != id);
        }
        Table::Commands => {
            let IdKey { id } = decode_old::<IdKey<CommandId>>(change)?;
            next.commands.retain(|command| command.id != id);
        }
        Table::Groups => {
            let IdKey { id } = decode_old::<IdKey<GroupId>>(change)?;
            next.groups.retain(|group| group.id != id);
            next.group_members.retain(|member| member.group_id != id);
        }
        Table::GroupMembers => {
            let key: MemberKey = decode_old(change)?;
            next.group_members.retain(|member| {
                !(member.group_id == key.group_id
                    && member.master_id == key.master_id
                    && member.slave_mac.eq_ignore_ascii_case(&key.slave_mac))
            });
        }
        Table::MasterStates => {
            let MasterKey { master_id } = decode_old(change)?;
            next.master_states
                .retain(|state| state.master_id != master_id);
        }
        Table::PeerStates => {
            let key: PeerKey = decode_old(change)?;
            next.peer_states.retain(|state| {
                !(state.master_id == key.master_id && state.mac.eq_ignore_ascii_case(&key.mac))
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;

//! Per-slave command progress as shown by the dashboard.
//!
//! Command rows move through a lifecycle owned by the device side. The
//! client projects that lifecycle, plus its own in-flight writes, onto a
//! small phase per `(master, slave)` pair. Terminal phases fall back to
//! [`Phase::Idle`] after [`PHASE_CLEAR_DELAY`] unless something newer has
//! replaced them.

use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use shared::domain::MasterId;

pub const PHASE_CLEAR_DELAY: Duration = Duration::from_millis(1_500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Queued,
    Sending,
    Acked,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acked | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Acked => "acked",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a command status onto a phase. Matching is exact; anything
/// unrecognised, padded or lowercase included, counts as queued.
pub fn phase_for_status(status: Option<&str>) -> Phase {
    match status {
        None | Some("") | Some("NEW") | Some("PENDING") => Phase::Queued,
        Some("SENT") => Phase::Sending,
        Some("ACKED") => Phase::Acked,
        Some("ERR") => Phase::Error,
        Some(_) => Phase::Queued,
    }
}

/// Identifies one slave of one master. MACs compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseKey {
    pub master_id: MasterId,
    pub slave_mac: String,
}

impl PhaseKey {
    pub fn new(master_id: MasterId, slave_mac: &str) -> Self {
        Self {
            master_id,
            slave_mac: slave_mac.trim().to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.master_id, self.slave_mac)
    }
}

/// Phase per key. Absent keys are idle.
#[derive(Debug, Clone, Default)]
pub struct PhaseMap {
    entries: HashMap<PhaseKey, Phase>,
}

impl PhaseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PhaseKey) -> Phase {
        self.entries.get(key).copied().unwrap_or_default()
    }

    /// Overwrites the phase for `key`; last writer wins. Returns the previous
    /// phase.
    pub fn set(&mut self, key: PhaseKey, phase: Phase) -> Phase {
        let previous = if phase == Phase::Idle {
            self.entries.remove(&key)
        } else {
            self.entries.insert(key, phase)
        };
        previous.unwrap_or_default()
    }

    pub fn apply_status(&mut self, key: PhaseKey, status: Option<&str>) -> Phase {
        let phase = phase_for_status(status);
        self.set(key, phase);
        phase
    }

    /// Resets `key` to idle only if it still holds `expected`.
    pub fn clear_if_unchanged(&mut self, key: &PhaseKey, expected: Phase) -> bool {
        if expected == Phase::Idle || self.get(key) != expected {
            return false;
        }
        self.entries.remove(key);
        true
    }

    pub fn contains(&self, key: &PhaseKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PhaseKey, Phase)> {
        self.entries.iter().map(|(key, phase)| (key, *phase))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn key(mac: &str) -> PhaseKey {
        PhaseKey::new(MasterId(Uuid::nil()), mac)
    }

    #[test]
    fn status_mapping_is_total() {
        assert_eq!(phase_for_status(None), Phase::Queued);
        assert_eq!(phase_for_status(Some("NEW")), Phase::Queued);
        assert_eq!(phase_for_status(Some("PENDING")), Phase::Queued);
        assert_eq!(phase_for_status(Some("SENT")), Phase::Sending);
        assert_eq!(phase_for_status(Some("ACKED")), Phase::Acked);
        assert_eq!(phase_for_status(Some("ERR")), Phase::Error);
        assert_eq!(phase_for_status(Some("REJECTED")), Phase::Queued);
        assert_eq!(phase_for_status(Some("acked")), Phase::Queued);
    }

    #[test]
    fn padded_statuses_are_not_terminal() {
        assert_eq!(phase_for_status(Some(" ACKED ")), Phase::Queued);
        assert_eq!(phase_for_status(Some("ERR\n")), Phase::Queued);
        assert_eq!(phase_for_status(Some(" SENT")), Phase::Queued);
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Acked.is_terminal());
        assert!(Phase::Error.is_terminal());
        assert!(!Phase::Sending.is_terminal());
        assert!(!Phase::Queued.is_terminal());
        assert!(!Phase::Idle.is_terminal());
    }

    #[test]
    fn key_normalizes_mac_case() {
        assert_eq!(key("aa:bb:cc:00:11:22"), key(" AA:BB:CC:00:11:22"));
        assert_eq!(
            key("aa:bb").to_string(),
            "00000000-0000-0000-0000-000000000000|AA:BB"
        );
    }

    #[test]
    fn last_writer_wins() {
        let mut phases = PhaseMap::new();
        phases.set(key("aa"), Phase::Sending);
        phases.apply_status(key("aa"), Some("ACKED"));
        phases.apply_status(key("aa"), Some("SENT"));
        assert_eq!(phases.get(&key("aa")), Phase::Sending);
    }

    #[test]
    fn clear_only_when_unchanged() {
        let mut phases = PhaseMap::new();
        phases.set(key("aa"), Phase::Acked);
        assert!(phases.clear_if_unchanged(&key("aa"), Phase::Acked));
        assert_eq!(phases.get(&key("aa")), Phase::Idle);
        assert!(!phases.contains(&key("aa")));

        phases.set(key("aa"), Phase::Error);
        phases.set(key("aa"), Phase::Sending);
        assert!(!phases.clear_if_unchanged(&key("aa"), Phase::Error));
        assert_eq!(phases.get(&key("aa")), Phase::Sending);
    }

    #[test]
    fn setting_idle_drops_the_entry() {
        let mut phases = PhaseMap::new();
        phases.set(key("aa"), Phase::Queued);
        assert_eq!(phases.set(key("aa"), Phase::Idle), Phase::Queued);
        assert!(phases.is_empty());
    }
}

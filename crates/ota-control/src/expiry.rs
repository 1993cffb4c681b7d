//! Deadline and action-consumption transitions over a set of maps.
//!
//! These functions mutate a [`ControlMaps`] value in place and report what
//! changed; the service applies them to a registry copy and persists the
//! result before it becomes visible.

use tracing::info;

use crate::model::StateName;
use crate::registry::{ControlMaps, MapKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    /// Maps whose deadline lapsed during this tick.
    pub expired: Vec<MapKey>,
    /// Maps dropped because nothing non-default was left in them.
    pub pruned: Vec<MapKey>,
}

impl ExpiryReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.pruned.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionExecutedReport {
    /// Number of state entries whose action changed to `on_action_executed`.
    pub transitioned: usize,
    pub pruned: Vec<MapKey>,
}

impl ActionExecutedReport {
    pub fn is_empty(&self) -> bool {
        self.transitioned == 0 && self.pruned.is_empty()
    }
}

/// Apply `on_map_expire` to every state of every map whose deadline is at or
/// before `now_ms`. Each map expires at most once.
pub fn expire_due(maps: &mut ControlMaps, now_ms: u64) -> ExpiryReport {
    let mut report = ExpiryReport::default();
    for (key, entry) in maps.iter_mut() {
        if !entry.is_due(now_ms) {
            continue;
        }
        for state in entry.map.states.values_mut() {
            *state = state.after_expiry();
        }
        entry.map.sanitize();
        entry.expired = true;
        info!(map = %key, deadline_ms = entry.expires_at_ms, "control map expired");
        report.expired.push(key.clone());
    }
    report.pruned = prune_inert(maps);
    report
}

/// Apply `on_action_executed` to every map's entry for `state`.
pub fn action_executed(maps: &mut ControlMaps, state: StateName) -> ActionExecutedReport {
    let mut report = ActionExecutedReport::default();
    for entry in maps.values_mut() {
        if let Some(current) = entry.map.states.get_mut(&state) {
            let mut before = *current;
            before.sanitize();
            let next = current.after_action_executed();
            if next != before {
                *current = next;
                report.transitioned += 1;
            }
        }
        entry.map.sanitize();
    }
    report.pruned = prune_inert(maps);
    report
}

/// Drop maps whose states all sanitized away.
pub fn prune_inert(maps: &mut ControlMaps) -> Vec<MapKey> {
    let pruned: Vec<MapKey> = maps
        .iter()
        .filter(|(_, entry)| entry.map.is_inert())
        .map(|(key, _)| key.clone())
        .collect();
    for key in &pruned {
        maps.remove(key);
        info!(map = %key, "control map pruned");
    }
    pruned
}

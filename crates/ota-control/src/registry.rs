//! Concurrency-safe set of live control maps.
//!
//! At most one entry exists per `(id, priority)`. Readers always observe a
//! complete map list: every mutation happens under the write lock, and
//! [`ControlMapRegistry::update`] swaps in a fully built replacement only
//! when its closure succeeds.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::{Action, StateName, UpdateControlMap};
use crate::resolve::{Resolution, resolve};

/// Registry key. Ordering is by id, then increasing priority.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapKey {
    pub id: String,
    pub priority: i32,
}

impl MapKey {
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            priority,
        }
    }
}

impl std::fmt::Display for MapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.priority)
    }
}

/// A live map with its runtime timestamps (Unix-epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMapEntry {
    pub map: UpdateControlMap,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    /// Set once the deadline lapsed and the expire actions were applied.
    pub expired: bool,
}

impl ControlMapEntry {
    pub fn new(map: UpdateControlMap, now_ms: u64, lifetime: Duration) -> Self {
        Self {
            map,
            created_at_ms: now_ms,
            expires_at_ms: now_ms
                .saturating_add(u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX)),
            expired: false,
        }
    }

    pub fn key(&self) -> MapKey {
        self.map.key()
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        !self.expired && self.expires_at_ms <= now_ms
    }
}

pub type ControlMaps = BTreeMap<MapKey, ControlMapEntry>;

#[derive(Debug, Default)]
pub struct ControlMapRegistry {
    maps: RwLock<ControlMaps>,
}

impl ControlMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_maps(maps: ControlMaps) -> Self {
        Self {
            maps: RwLock::new(maps),
        }
    }

    /// Insert, replacing any entry with the same `(id, priority)`.
    pub fn set(&self, entry: ControlMapEntry) -> Option<ControlMapEntry> {
        self.maps.write().insert(entry.key(), entry)
    }

    /// Every entry for `id`, ordered by increasing priority.
    pub fn get(&self, id: &str) -> Vec<ControlMapEntry> {
        let lo = MapKey::new(id, i32::MIN);
        let hi = MapKey::new(id, i32::MAX);
        self.maps
            .read()
            .range(lo..=hi)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn get_all(&self) -> Vec<ControlMapEntry> {
        self.maps.read().values().cloned().collect()
    }

    pub fn remove(&self, id: &str, priority: i32) -> Option<ControlMapEntry> {
        self.maps.write().remove(&MapKey::new(id, priority))
    }

    pub fn len(&self) -> usize {
        self.maps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.read().is_empty()
    }

    /// Effective action for `state` across every registered map.
    pub fn effective_action(&self, state: StateName) -> Action {
        self.resolve(state).action
    }

    pub fn resolve(&self, state: StateName) -> Resolution {
        let maps = self.maps.read();
        resolve(maps.values(), state)
    }

    /// Earliest deadline among maps that have not expired yet.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.maps
            .read()
            .values()
            .filter(|entry| !entry.expired)
            .map(|entry| entry.expires_at_ms)
            .min()
    }

    pub fn has_due(&self, now_ms: u64) -> bool {
        self.maps.read().values().any(|entry| entry.is_due(now_ms))
    }

    /// Apply `mutate` to a copy of the current maps and install the copy only
    /// if it returns `Ok`. The write lock is held throughout, so concurrent
    /// updates serialize and readers never see the copy half-built.
    pub fn update<T, E>(
        &self,
        mutate: impl FnOnce(&ControlMaps, &mut ControlMaps) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut guard = self.maps.write();
        let mut next = guard.clone();
        let out = mutate(&guard, &mut next)?;
        *guard = next;
        Ok(out)
    }
}

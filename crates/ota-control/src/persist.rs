//! Layout of control maps in the transactional store.
//!
//! Each live map is stored as JSON under `update-control-map/<id>/<priority>`.
//! The index key lists the live `(id, priority)` pairs so a restart can find
//! every record without scanning the store. Records and index are always
//! written in the same transaction.

use std::collections::BTreeMap;

use ota_store::{Store, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::ControlMapError;
use crate::model::{StateName, UpdateControlMap, UpdateControlMapState};
use crate::registry::{ControlMapEntry, ControlMaps, MapKey};

pub const INDEX_KEY: &[u8] = b"update-control-maps";
const RECORD_PREFIX: &str = "update-control-map";

pub fn record_key(key: &MapKey) -> Vec<u8> {
    format!("{RECORD_PREFIX}/{}/{}", key.id, key.priority).into_bytes()
}

/// Wire schema of the control interface plus the runtime fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlMapRecord {
    id: String,
    priority: i32,
    #[serde(default)]
    states: BTreeMap<StateName, UpdateControlMapState>,
    created_at_ms: u64,
    expires_at_ms: u64,
    #[serde(default)]
    expired: bool,
}

impl From<&ControlMapEntry> for ControlMapRecord {
    fn from(entry: &ControlMapEntry) -> Self {
        Self {
            id: entry.map.id.clone(),
            priority: entry.map.priority,
            states: entry.map.states.clone(),
            created_at_ms: entry.created_at_ms,
            expires_at_ms: entry.expires_at_ms,
            expired: entry.expired,
        }
    }
}

impl From<ControlMapRecord> for ControlMapEntry {
    fn from(record: ControlMapRecord) -> Self {
        Self {
            map: UpdateControlMap {
                id: record.id,
                priority: record.priority,
                states: record.states,
            },
            created_at_ms: record.created_at_ms,
            expires_at_ms: record.expires_at_ms,
            expired: record.expired,
        }
    }
}

fn corrupt(key: &[u8], message: impl Into<String>) -> ControlMapError {
    ControlMapError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        message: message.into(),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ControlMapError> {
    serde_json::to_vec(value).map_err(|e| ControlMapError::Encode(e.to_string()))
}

/// Load every persisted map in one read transaction.
pub fn load<S: Store>(store: &S) -> Result<ControlMaps, ControlMapError> {
    store.read_transaction(|txn| {
        let index = match txn.read(INDEX_KEY) {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => return Ok(ControlMaps::new()),
            Err(err) => return Err(err.into()),
        };
        let keys: Vec<MapKey> =
            serde_json::from_slice(&index).map_err(|e| corrupt(INDEX_KEY, e.to_string()))?;

        let mut maps = ControlMaps::new();
        for key in keys {
            let record_key = record_key(&key);
            let raw = txn.read(&record_key).map_err(|err| {
                if err.is_not_found() {
                    corrupt(&record_key, "indexed record is missing")
                } else {
                    err.into()
                }
            })?;
            let record: ControlMapRecord = serde_json::from_slice(&raw)
                .map_err(|e| corrupt(&record_key, e.to_string()))?;
            let entry = ControlMapEntry::from(record);
            if entry.key() != key {
                return Err(corrupt(&record_key, format!("record holds {}", entry.key())));
            }
            maps.insert(key, entry);
        }
        Ok(maps)
    })
}

/// Write the difference between `before` and `after` into `txn`.
pub fn persist_changes(
    txn: &mut dyn Transaction,
    before: &ControlMaps,
    after: &ControlMaps,
) -> Result<(), ControlMapError> {
    for (key, entry) in after {
        if before.get(key) != Some(entry) {
            txn.write(&record_key(key), &encode(&ControlMapRecord::from(entry))?)?;
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            txn.remove(&record_key(key))?;
        }
    }
    if !before.keys().eq(after.keys()) {
        let index: Vec<&MapKey> = after.keys().collect();
        txn.write(INDEX_KEY, &encode(&index)?)?;
    }
    Ok(())
}

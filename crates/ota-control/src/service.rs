//! The single mutation path for control maps.
//!
//! Every change is computed on a copy of the registry contents, committed to
//! the store in one write transaction, and only then made visible. A store
//! failure leaves both the registry and the store as they were.

use std::sync::Arc;
use std::time::Duration;

use ota_store::Store;
use tracing::{debug, info};

use crate::error::ControlMapError;
use crate::expiry::{self, ActionExecutedReport, ExpiryReport};
use crate::model::{Action, StateName, UpdateControlMap};
use crate::persist;
use crate::registry::{ControlMapEntry, ControlMapRegistry, ControlMaps, MapKey};

pub struct ControlMapService<S: Store> {
    registry: Arc<ControlMapRegistry>,
    store: Arc<S>,
    expiration: Duration,
}

impl<S: Store> ControlMapService<S> {
    /// Open the service, restoring every map persisted in `store`.
    ///
    /// Restored maps whose deadline already passed are expired by the next
    /// [`ControlMapService::expire_due`] call.
    pub fn open(store: Arc<S>, expiration: Duration) -> Result<Self, ControlMapError> {
        let maps = persist::load(&*store)?;
        if !maps.is_empty() {
            info!(count = maps.len(), "restored control maps");
        }
        Ok(Self {
            registry: Arc::new(ControlMapRegistry::from_maps(maps)),
            store,
            expiration,
        })
    }

    pub fn registry(&self) -> &Arc<ControlMapRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Seconds the submitter may wait before refreshing a map: half the map
    /// lifetime rounded down, never below one second. A one-second lifetime
    /// therefore gets a one-second refresh interval and no slack.
    pub fn refresh_timeout_secs(&self) -> u64 {
        (self.expiration.as_secs() / 2).max(1)
    }

    /// Validate, sanitize and insert `map`, replacing any live map with the
    /// same `(id, priority)` and restarting its deadline. An inert map clears
    /// the matching live entry instead.
    pub fn set_control_map(
        &self,
        mut map: UpdateControlMap,
        now_ms: u64,
    ) -> Result<u64, ControlMapError> {
        map.validate()?;
        map.sanitize();
        let key = map.key();

        if map.is_inert() {
            let removed = self.commit(|maps| maps.remove(&key))?;
            if removed.is_some() {
                info!(map = %key, "control map cleared by inert submission");
            } else {
                debug!(map = %key, "ignoring inert control map");
            }
        } else {
            let entry = ControlMapEntry::new(map, now_ms, self.expiration);
            let expires_at_ms = entry.expires_at_ms;
            let previous = self.commit(|maps| maps.insert(key.clone(), entry))?;
            match previous {
                Some(_) => debug!(map = %key, expires_at_ms, "control map refreshed"),
                None => info!(map = %key, expires_at_ms, "control map inserted"),
            }
        }
        Ok(self.refresh_timeout_secs())
    }

    pub fn set_control_map_json(
        &self,
        json: &str,
        now_ms: u64,
    ) -> Result<u64, ControlMapError> {
        let map = UpdateControlMap::from_json(json)?;
        self.set_control_map(map, now_ms)
    }

    /// Expire every map whose deadline is at or before `now_ms`.
    pub fn expire_due(&self, now_ms: u64) -> Result<ExpiryReport, ControlMapError> {
        if !self.registry.has_due(now_ms) {
            return Ok(ExpiryReport::default());
        }
        self.commit(|maps| expiry::expire_due(maps, now_ms))
    }

    /// Consumption hook: the driver acted on the effective action for `state`.
    pub fn action_executed(
        &self,
        state: StateName,
    ) -> Result<ActionExecutedReport, ControlMapError> {
        let report = self.commit(|maps| expiry::action_executed(maps, state))?;
        debug!(%state, transitioned = report.transitioned, "action executed");
        Ok(report)
    }

    /// A new deployment starts: fallbacks left by expired maps belong to the
    /// previous one and are cleared.
    pub fn deployment_started(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<MapKey>, ControlMapError> {
        let removed = self.remove_where(|entry| entry.expired)?;
        if !removed.is_empty() {
            info!(deployment_id, cleared = removed.len(), "cleared expired control maps");
        }
        Ok(removed)
    }

    /// Remove maps provisioned for a deployment that has now finished.
    pub fn deployment_finished(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<MapKey>, ControlMapError> {
        let removed = self.remove_where(|entry| entry.map.id == deployment_id)?;
        if !removed.is_empty() {
            info!(deployment_id, cleared = removed.len(), "cleared deployment control maps");
        }
        Ok(removed)
    }

    pub fn effective_action(&self, state: StateName) -> Action {
        self.registry.effective_action(state)
    }

    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.registry.next_deadline_ms()
    }

    fn remove_where(
        &self,
        predicate: impl Fn(&ControlMapEntry) -> bool,
    ) -> Result<Vec<MapKey>, ControlMapError> {
        self.commit(|maps| {
            let doomed: Vec<MapKey> = maps
                .iter()
                .filter(|(_, entry)| predicate(entry))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &doomed {
                maps.remove(key);
            }
            doomed
        })
    }

    fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut ControlMaps) -> T,
    ) -> Result<T, ControlMapError> {
        self.registry.update(|current, next| {
            let out = mutate(next);
            if *current != *next {
                self.store
                    .write_transaction(|txn| persist::persist_changes(txn, current, next))?;
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UpdateControlMapState;
    use ota_store::{MemStore, StoreError, Transaction};
    use std::sync::atomic::{AtomicBool, Ordering};

    const INSTALL: StateName = StateName::ArtifactInstallEnter;

    fn pause_map(id: &str, priority: i32) -> UpdateControlMap {
        UpdateControlMap::new(id, priority)
            .with_state(INSTALL, UpdateControlMapState::new(Action::Pause))
    }

    fn service() -> ControlMapService<MemStore> {
        ControlMapService::open(Arc::new(MemStore::new()), Duration::from_secs(60)).expect("open")
    }

    /// MemStore wrapper whose write transactions can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemStore,
        fail_writes: AtomicBool,
    }

    impl Store for FlakyStore {
        fn write_transaction<T, E, F>(&self, body: F) -> Result<T, E>
        where
            F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
            E: From<StoreError>,
        {
            let fail = self.fail_writes.load(Ordering::SeqCst);
            self.inner.write_transaction(|txn| {
                let out = body(txn)?;
                if fail {
                    return Err(StoreError::io("disk full").into());
                }
                Ok(out)
            })
        }

        fn read_transaction<T, E, F>(&self, body: F) -> Result<T, E>
        where
            F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
            E: From<StoreError>,
        {
            self.inner.read_transaction(body)
        }
    }

    #[test]
    fn end_to_end_pause_expires_to_fail_and_prunes() {
        let svc = service();
        let timeout = svc
            .set_control_map_json(
                r#"{"id":"d1","priority":0,"states":{"ArtifactInstall_Enter":{"action":"pause"}}}"#,
                0,
            )
            .expect("set");
        assert_eq!(timeout, 30);
        assert_eq!(svc.effective_action(INSTALL), Action::Pause);

        let report = svc.expire_due(60_000).expect("expire");
        assert_eq!(report.expired, vec![MapKey::new("d1", 0)]);
        assert_eq!(svc.effective_action(INSTALL), Action::Fail);
        assert_eq!(svc.registry().len(), 1);

        let report = svc.action_executed(INSTALL).expect("executed");
        assert_eq!(report.pruned, vec![MapKey::new("d1", 0)]);
        assert!(svc.registry().is_empty());
        assert_eq!(svc.effective_action(INSTALL), Action::Continue);
    }

    #[test]
    fn refresh_extends_deadline() {
        let svc = service();
        svc.set_control_map(pause_map("m", 0), 0).expect("set");
        assert_eq!(svc.next_deadline_ms(), Some(60_000));

        svc.set_control_map(pause_map("m", 0), 50_000).expect("refresh");
        assert_eq!(svc.registry().len(), 1);
        assert_eq!(svc.next_deadline_ms(), Some(110_000));
        assert!(svc.expire_due(60_000).expect("tick").is_empty());
        assert_eq!(svc.effective_action(INSTALL), Action::Pause);
    }

    #[test]
    fn refresh_revives_expired_map() {
        let svc = service();
        svc.set_control_map(pause_map("m", 0), 0).expect("set");
        svc.expire_due(60_000).expect("expire");
        assert_eq!(svc.effective_action(INSTALL), Action::Fail);

        svc.set_control_map(pause_map("m", 0), 61_000).expect("refresh");
        assert_eq!(svc.effective_action(INSTALL), Action::Pause);
        assert!(!svc.registry().get("m")[0].expired);
    }

    #[test]
    fn inert_submission_clears_live_map() {
        let svc = service();
        svc.set_control_map(pause_map("m", 3), 0).expect("set");
        svc.set_control_map(UpdateControlMap::new("m", 3), 1).expect("clear");
        assert!(svc.registry().is_empty());
        assert!(persist::load(&**svc.store()).expect("load").is_empty());
    }

    #[test]
    fn invalid_map_is_never_inserted() {
        let svc = service();
        let err = svc
            .set_control_map_json(
                r#"{"id":"m","states":{"ArtifactInstall_Enter":{"on_map_expire":"pause"}}}"#,
                0,
            )
            .expect_err("invalid");
        assert!(err.is_invalid());
        assert!(svc.registry().is_empty());

        let err = svc
            .set_control_map(UpdateControlMap::default(), 0)
            .expect_err("empty id");
        assert!(err.is_invalid());
    }

    #[test]
    fn maps_survive_restart() {
        let store = Arc::new(MemStore::new());
        {
            let svc =
                ControlMapService::open(store.clone(), Duration::from_secs(60)).expect("open");
            svc.set_control_map(pause_map("a", 0), 1_000).expect("set");
            svc.set_control_map(pause_map("a", 1), 1_000).expect("set");
            svc.set_control_map(
                UpdateControlMap::new("b", 0).with_state(
                    StateName::ArtifactCommitEnter,
                    UpdateControlMapState::new(Action::Fail),
                ),
                2_000,
            )
            .expect("set");
            svc.expire_due(61_000).expect("expire");
        }

        let svc = ControlMapService::open(store, Duration::from_secs(60)).expect("reopen");
        assert_eq!(svc.registry().get("a").len(), 2);
        assert!(svc.registry().get("a")[0].expired);
        assert_eq!(svc.registry().get("b")[0].expires_at_ms, 62_000);
        assert_eq!(svc.effective_action(INSTALL), Action::Fail);
        assert_eq!(svc.effective_action(StateName::ArtifactCommitEnter), Action::Fail);
    }

    #[test]
    fn store_failure_leaves_registry_unchanged() {
        let store = Arc::new(FlakyStore::default());
        let svc = ControlMapService::open(store.clone(), Duration::from_secs(60)).expect("open");
        svc.set_control_map(pause_map("m", 0), 0).expect("set");

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = svc.expire_due(60_000).expect_err("store failure");
        assert!(matches!(err, ControlMapError::Store(StoreError::Io { .. })), "{err}");
        assert_eq!(svc.effective_action(INSTALL), Action::Pause);
        assert!(!svc.registry().get("m")[0].expired);

        let err = svc.set_control_map(pause_map("n", 0), 0).expect_err("store failure");
        assert!(matches!(err, ControlMapError::Store(_)));
        assert!(svc.registry().get("n").is_empty());

        store.fail_writes.store(false, Ordering::SeqCst);
        let persisted = persist::load(&store.inner).expect("load");
        assert!(!persisted[&MapKey::new("m", 0)].expired);
        svc.expire_due(60_000).expect("expire");
        assert_eq!(svc.effective_action(INSTALL), Action::Fail);
    }

    #[test]
    fn refresh_timeout_is_half_the_lifetime() {
        let open = |secs| {
            ControlMapService::open(Arc::new(MemStore::new()), Duration::from_secs(secs))
                .expect("open")
        };
        assert_eq!(open(3600).refresh_timeout_secs(), 1800);
        assert_eq!(open(3).refresh_timeout_secs(), 1);
        assert_eq!(open(2).refresh_timeout_secs(), 1);
        assert_eq!(open(1).refresh_timeout_secs(), 1);
    }

    #[test]
    fn huge_expiration_never_wraps_the_deadline() {
        let svc = ControlMapService::open(
            Arc::new(MemStore::new()),
            Duration::from_secs(18_446_744_073_709_552),
        )
        .expect("open");
        svc.set_control_map(pause_map("m", 0), 0).expect("set");
        assert_eq!(svc.next_deadline_ms(), Some(u64::MAX));

        assert!(svc.expire_due(1_000).expect("tick").is_empty());
        assert_eq!(svc.effective_action(INSTALL), Action::Pause);
    }

    #[test]
    fn repeated_pause_does_not_rewrite_the_store() {
        let store = Arc::new(FlakyStore::default());
        let svc = ControlMapService::open(store.clone(), Duration::from_secs(60)).expect("open");
        svc.set_control_map(pause_map("m", 0), 0).expect("set");

        // Any write now fails, so success means nothing was persisted.
        store.fail_writes.store(true, Ordering::SeqCst);
        let report = svc.action_executed(INSTALL).expect("executed");
        assert_eq!(report.transitioned, 0);
        assert!(report.pruned.is_empty());
        assert_eq!(svc.effective_action(INSTALL), Action::Pause);
    }

    #[test]
    fn deployment_lifecycle_clears_maps() {
        let svc = service();
        svc.set_control_map(pause_map("dep-1", 0), 0).expect("set");
        svc.set_control_map(pause_map("dep-1", 5), 0).expect("set");
        svc.set_control_map(pause_map("other", 0), 30_000).expect("set");
        svc.expire_due(60_000).expect("expire");

        let cleared = svc.deployment_finished("dep-1").expect("finished");
        assert_eq!(cleared, vec![MapKey::new("dep-1", 0), MapKey::new("dep-1", 5)]);
        assert_eq!(svc.registry().len(), 1);

        svc.expire_due(90_000).expect("expire");
        let cleared = svc.deployment_started("dep-2").expect("started");
        assert_eq!(cleared, vec![MapKey::new("other", 0)]);
        assert!(svc.registry().is_empty());
    }
}

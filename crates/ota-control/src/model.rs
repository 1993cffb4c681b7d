//! Control map documents as submitted over the control interface.
//!
//! Fields left unset by the submitter stay `None` on the wire type; the
//! accessors compute the defaults and [`UpdateControlMapState::sanitize`]
//! writes them back explicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControlMapError;
use crate::registry::MapKey;

/// Action requested at a checkpoint.
///
/// Variants are declared in increasing severity; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Continue,
    ForceContinue,
    Pause,
    Fail,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Continue,
        Action::ForceContinue,
        Action::Pause,
        Action::Fail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Continue => "continue",
            Action::ForceContinue => "force_continue",
            Action::Pause => "pause",
            Action::Fail => "fail",
        }
    }

    /// Fallback applied on map expiry when `on_map_expire` is unset.
    pub fn default_on_map_expire(self) -> Action {
        match self {
            Action::Continue => Action::Continue,
            Action::ForceContinue => Action::ForceContinue,
            Action::Pause | Action::Fail => Action::Fail,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ControlMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ControlMapError::invalid(format!("unknown action '{s}'")))
    }
}

/// Lifecycle checkpoints a control map may constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateName {
    #[serde(rename = "ArtifactInstall_Enter")]
    ArtifactInstallEnter,
    #[serde(rename = "ArtifactReboot_Enter")]
    ArtifactRebootEnter,
    #[serde(rename = "ArtifactCommit_Enter")]
    ArtifactCommitEnter,
}

impl StateName {
    pub const ALL: [StateName; 3] = [
        StateName::ArtifactInstallEnter,
        StateName::ArtifactRebootEnter,
        StateName::ArtifactCommitEnter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StateName::ArtifactInstallEnter => "ArtifactInstall_Enter",
            StateName::ArtifactRebootEnter => "ArtifactReboot_Enter",
            StateName::ArtifactCommitEnter => "ArtifactCommit_Enter",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateName {
    type Err = ControlMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateName::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| ControlMapError::invalid(format!("unknown state name '{s}'")))
    }
}

/// Policy for a single checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateControlMapState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_map_expire: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_action_executed: Option<Action>,
}

impl UpdateControlMapState {
    pub fn new(action: Action) -> Self {
        Self {
            action: Some(action),
            ..Self::default()
        }
    }

    pub fn explicit(action: Action, on_map_expire: Action, on_action_executed: Action) -> Self {
        Self {
            action: Some(action),
            on_map_expire: Some(on_map_expire),
            on_action_executed: Some(on_action_executed),
        }
    }

    pub fn action(&self) -> Action {
        self.action.unwrap_or(Action::Continue)
    }

    pub fn on_map_expire(&self) -> Action {
        self.on_map_expire
            .unwrap_or_else(|| self.action().default_on_map_expire())
    }

    pub fn on_action_executed(&self) -> Action {
        self.on_action_executed.unwrap_or_else(|| self.action())
    }

    pub fn validate(&self) -> Result<(), ControlMapError> {
        // A paused map that loses its owner must not block the device forever.
        if self.on_map_expire == Some(Action::Pause) {
            return Err(ControlMapError::invalid(
                "on_map_expire must not be 'pause'",
            ));
        }
        Ok(())
    }

    /// Replace unset fields with their defaults.
    pub fn sanitize(&mut self) {
        *self = Self::explicit(self.action(), self.on_map_expire(), self.on_action_executed());
    }

    /// True when the state carries no constraint once defaults are applied.
    pub fn is_default(&self) -> bool {
        self.action() == Action::Continue
            && self.on_map_expire() == Action::Continue
            && self.on_action_executed() == Action::Continue
    }

    /// State after the map's refresh deadline lapsed.
    ///
    /// The expire action becomes the action and the entry turns one-shot: it
    /// decays to `continue` once that action has been executed.
    pub fn after_expiry(&self) -> Self {
        Self::explicit(self.on_map_expire(), Action::Continue, Action::Continue)
    }

    /// State after the driver executed the current action.
    pub fn after_action_executed(&self) -> Self {
        Self::explicit(
            self.on_action_executed(),
            self.on_map_expire(),
            self.on_action_executed(),
        )
    }
}

/// A time-limited policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateControlMap {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<StateName, UpdateControlMapState>,
}

impl UpdateControlMap {
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            priority,
            states: BTreeMap::new(),
        }
    }

    pub fn with_state(mut self, name: StateName, state: UpdateControlMapState) -> Self {
        self.states.insert(name, state);
        self
    }

    /// Strict decode: unknown fields, unknown state names and unknown action
    /// values are all validation failures. The decoded map is validated but
    /// not sanitized.
    pub fn from_json(json: &str) -> Result<Self, ControlMapError> {
        let map: UpdateControlMap = serde_json::from_str(json)
            .map_err(|e| ControlMapError::invalid(format!("decode: {e}")))?;
        map.validate()?;
        Ok(map)
    }

    pub fn key(&self) -> MapKey {
        MapKey::new(self.id.clone(), self.priority)
    }

    pub fn validate(&self) -> Result<(), ControlMapError> {
        if self.id.is_empty() {
            return Err(ControlMapError::invalid("id must not be empty"));
        }
        for (name, state) in &self.states {
            state
                .validate()
                .map_err(|e| ControlMapError::invalid(format!("state {name}: {e}")))?;
        }
        Ok(())
    }

    /// Fill defaults on every state and drop the states that end up as no-ops.
    pub fn sanitize(&mut self) {
        for state in self.states.values_mut() {
            state.sanitize();
        }
        self.states.retain(|_, state| !state.is_default());
    }

    /// A map without states carries no information and is never retained.
    pub fn is_inert(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_json(field: &str, value: &str) -> String {
        format!(r#"{{"id":"whatever","states":{{"ArtifactInstall_Enter":{{"{field}":"{value}"}}}}}}"#)
    }

    #[test]
    fn state_validation() {
        assert!(UpdateControlMapState::default().validate().is_ok());

        for value in Action::ALL {
            let action = UpdateControlMapState {
                action: Some(value),
                ..Default::default()
            };
            assert!(action.validate().is_ok());

            let on_expire = UpdateControlMapState {
                on_map_expire: Some(value),
                ..Default::default()
            };
            if value == Action::Pause {
                assert!(on_expire.validate().is_err());
            } else {
                assert!(on_expire.validate().is_ok());
            }

            let on_executed = UpdateControlMapState {
                on_action_executed: Some(value),
                ..Default::default()
            };
            assert!(on_executed.validate().is_ok());
        }
    }

    #[test]
    fn unknown_action_values_invalidate() {
        for (field, value) in [
            ("action", "foo"),
            ("on_map_expire", "bar"),
            ("on_action_executed", "baz"),
            ("on_map_expire", "pause"),
        ] {
            let err = UpdateControlMap::from_json(&state_json(field, value))
                .expect_err("should be invalid");
            assert!(err.is_invalid(), "{field}={value}: {err}");
        }
    }

    #[test]
    fn map_validation() {
        assert!(UpdateControlMap::default().validate().is_err());
        assert!(UpdateControlMap::new("whatever", 0).validate().is_ok());

        for name in StateName::ALL {
            let map = UpdateControlMap::new("whatever", 0)
                .with_state(name, UpdateControlMapState::default());
            assert!(map.validate().is_ok(), "{name}");
        }

        let bad = UpdateControlMap::new("whatever", 0).with_state(
            StateName::ArtifactCommitEnter,
            UpdateControlMapState {
                on_map_expire: Some(Action::Pause),
                ..Default::default()
            },
        );
        assert!(bad.validate().is_err());
    }

    #[test]
    fn validation_from_json() {
        let json = r#"{
            "priority": 0,
            "states": {
                "ArtifactInstall_Enter": {
                    "action": "continue",
                    "on_map_expire": "force_continue",
                    "on_action_executed": "pause"
                },
                "ArtifactReboot_Enter": {
                    "action": "pause",
                    "on_map_expire": "fail",
                    "on_action_executed": "continue"
                }
            },
            "id": "01234567-89ab-cdef-0123-456789abcdef"
        }"#;
        let map = UpdateControlMap::from_json(json).expect("valid");
        assert_eq!(map.states.len(), 2);
        assert_eq!(
            map.states[&StateName::ArtifactInstallEnter].action,
            Some(Action::Continue)
        );
        assert_eq!(
            map.states[&StateName::ArtifactRebootEnter].on_map_expire,
            Some(Action::Fail)
        );
    }

    #[test]
    fn json_rejects_unknown_fields_and_states() {
        let unknown_field = r#"{"id":"x","priority":1,"states":{},"extra":true}"#;
        assert!(UpdateControlMap::from_json(unknown_field).unwrap_err().is_invalid());

        let unknown_state_field =
            r#"{"id":"x","states":{"ArtifactInstall_Enter":{"action":"pause","when":"now"}}}"#;
        assert!(UpdateControlMap::from_json(unknown_state_field).unwrap_err().is_invalid());

        let unknown_state = r#"{"id":"x","states":{"Download_Enter":{"action":"pause"}}}"#;
        assert!(UpdateControlMap::from_json(unknown_state).unwrap_err().is_invalid());

        assert!(UpdateControlMap::from_json("{not json").unwrap_err().is_invalid());
        assert!(UpdateControlMap::from_json(r#"{"priority":3}"#).unwrap_err().is_invalid());
    }

    #[test]
    fn state_sanitize() {
        use Action::*;
        let cases = [
            (
                UpdateControlMapState::explicit(Pause, ForceContinue, Fail),
                UpdateControlMapState::explicit(Pause, ForceContinue, Fail),
            ),
            (
                UpdateControlMapState::default(),
                UpdateControlMapState::explicit(Continue, Continue, Continue),
            ),
            (
                UpdateControlMapState::new(ForceContinue),
                UpdateControlMapState::explicit(ForceContinue, ForceContinue, ForceContinue),
            ),
            (
                UpdateControlMapState {
                    on_map_expire: Some(ForceContinue),
                    ..Default::default()
                },
                UpdateControlMapState::explicit(Continue, ForceContinue, Continue),
            ),
            (
                UpdateControlMapState {
                    on_action_executed: Some(ForceContinue),
                    ..Default::default()
                },
                UpdateControlMapState::explicit(Continue, Continue, ForceContinue),
            ),
            (
                UpdateControlMapState::new(Fail),
                UpdateControlMapState::explicit(Fail, Fail, Fail),
            ),
            (
                UpdateControlMapState::new(Pause),
                UpdateControlMapState::explicit(Pause, Fail, Pause),
            ),
            (
                UpdateControlMapState {
                    on_map_expire: Some(Fail),
                    on_action_executed: Some(Fail),
                    ..Default::default()
                },
                UpdateControlMapState::explicit(Continue, Fail, Fail),
            ),
        ];

        for (n, (mut input, expected)) in cases.into_iter().enumerate() {
            input.sanitize();
            assert_eq!(input, expected, "case {n}");
        }
    }

    #[test]
    fn map_sanitize() {
        use Action::*;
        let all_default = UpdateControlMapState::explicit(Continue, Continue, Continue);

        let mut map_default = UpdateControlMap::new("whatever", 100)
            .with_state(StateName::ArtifactInstallEnter, all_default)
            .with_state(StateName::ArtifactRebootEnter, all_default)
            .with_state(StateName::ArtifactCommitEnter, all_default);
        map_default.sanitize();
        assert!(map_default.states.is_empty());
        assert!(map_default.is_inert());

        let failing = UpdateControlMapState::explicit(Fail, Continue, Continue);
        let mut map_one_state = UpdateControlMap::new("whatever", 100)
            .with_state(StateName::ArtifactInstallEnter, all_default)
            .with_state(StateName::ArtifactRebootEnter, failing)
            .with_state(StateName::ArtifactCommitEnter, all_default);
        map_one_state.sanitize();
        assert_eq!(map_one_state.states.len(), 1);
        assert_eq!(map_one_state.states[&StateName::ArtifactRebootEnter], failing);
    }

    #[test]
    fn severity_order() {
        assert!(Action::Fail > Action::Pause);
        assert!(Action::Pause > Action::ForceContinue);
        assert!(Action::ForceContinue > Action::Continue);
        assert_eq!("force_continue".parse::<Action>().unwrap(), Action::ForceContinue);
        assert_eq!(
            "ArtifactReboot_Enter".parse::<StateName>().unwrap(),
            StateName::ArtifactRebootEnter
        );
        assert!("Download_Enter".parse::<StateName>().is_err());
    }

    #[test]
    fn expiry_and_execution_transitions() {
        use Action::*;
        let pause = {
            let mut s = UpdateControlMapState::new(Pause);
            s.sanitize();
            s
        };
        assert_eq!(pause.after_expiry(), UpdateControlMapState::explicit(Fail, Continue, Continue));

        let once = UpdateControlMapState::explicit(Pause, Fail, Continue);
        let executed = once.after_action_executed();
        assert_eq!(executed, UpdateControlMapState::explicit(Continue, Fail, Continue));
        assert!(!executed.is_default());
    }
}

//! Effective-action resolution.
//!
//! Every map that names the checkpoint casts one vote. The most severe vote
//! wins (`fail > pause > force_continue > continue`) regardless of map id or
//! priority; no votes means `continue`.

use serde::{Deserialize, Serialize};

use crate::model::{Action, StateName};
use crate::registry::{ControlMapEntry, MapKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: Action,
    /// First map, in registry order, that cast the winning vote.
    pub decided_by: Option<MapKey>,
    /// Refresh deadline of the deciding map, if it has not expired yet.
    pub expires_at_ms: Option<u64>,
}

impl Resolution {
    fn unconstrained() -> Self {
        Self {
            action: Action::Continue,
            decided_by: None,
            expires_at_ms: None,
        }
    }
}

pub fn resolve<'a>(
    entries: impl IntoIterator<Item = &'a ControlMapEntry>,
    state: StateName,
) -> Resolution {
    let mut winner: Option<(&ControlMapEntry, Action)> = None;
    for entry in entries {
        let Some(vote) = entry.map.states.get(&state).map(|s| s.action()) else {
            continue;
        };
        match winner {
            Some((_, best)) if best >= vote => {}
            _ => winner = Some((entry, vote)),
        }
    }

    match winner {
        Some((entry, action)) => Resolution {
            action,
            decided_by: Some(entry.key()),
            expires_at_ms: (!entry.expired).then_some(entry.expires_at_ms),
        },
        None => Resolution::unconstrained(),
    }
}

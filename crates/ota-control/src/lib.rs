//! Update control maps: the policy oracle consulted by the install state
//! machine before it crosses an irreversible checkpoint.
//!
//! - [`model`]: control map documents, validation and sanitization.
//! - [`registry`]: the shared set of live maps, keyed by `(id, priority)`.
//! - [`resolve`]: severity-ordered resolution of the effective action.
//! - [`expiry`]: deadline and action-consumption transitions.
//! - [`persist`]: record layout in the transactional store.
//! - [`service`]: the single mutation path tying the above together.

pub mod error;
pub mod expiry;
pub mod model;
pub mod persist;
pub mod registry;
pub mod resolve;
pub mod service;

pub use error::ControlMapError;
pub use expiry::{ActionExecutedReport, ExpiryReport};
pub use model::{Action, StateName, UpdateControlMap, UpdateControlMapState};
pub use registry::{ControlMapEntry, ControlMapRegistry, ControlMaps, MapKey};
pub use resolve::{Resolution, resolve};
pub use service::ControlMapService;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix-epoch milliseconds.
///
/// Deadlines are persisted as absolute wall-clock values, so a clock jump on
/// the device moves them too.
pub fn now_wallclock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

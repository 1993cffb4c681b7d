use std::path::PathBuf;
use std::time::Duration;

use crate::error::AgentError;

pub const DEFAULT_MAP_EXPIRATION: Duration = Duration::from_secs(3600);
pub const DEFAULT_IDLE_TICK: Duration = Duration::from_secs(60);
pub const DEFAULT_CONTROL_SOCKET: &str = "/run/ota/control.sock";
/// Upper bound for configured intervals (ten years).
pub const MAX_INTERVAL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Lifetime of a submitted or refreshed control map.
    pub map_expiration: Duration,
    /// Wake interval of the daemon loop when no deadline is pending.
    pub idle_tick: Duration,
    /// SQLite database path; `None` keeps maps in memory only.
    pub store_path: Option<PathBuf>,
    pub control_socket: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            map_expiration: DEFAULT_MAP_EXPIRATION,
            idle_tick: DEFAULT_IDLE_TICK,
            store_path: None,
            control_socket: PathBuf::from(DEFAULT_CONTROL_SOCKET),
        }
    }
}

impl AgentConfig {
    /// Overlay `OTA_*` environment variables on the defaults.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AgentConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AgentError> {
        let mut config = Self::default();
        if let Some(secs) = lookup("OTA_MAP_EXPIRATION_SECS") {
            config.map_expiration = parse_secs("OTA_MAP_EXPIRATION_SECS", &secs)?;
        }
        if let Some(secs) = lookup("OTA_IDLE_TICK_SECS") {
            config.idle_tick = parse_secs("OTA_IDLE_TICK_SECS", &secs)?;
        }
        if let Some(path) = lookup("OTA_STORE_PATH").filter(|p| !p.is_empty()) {
            config.store_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("OTA_CONTROL_SOCKET").filter(|p| !p.is_empty()) {
            config.control_socket = PathBuf::from(path);
        }
        Ok(config)
    }
}

/// Accept `secs` as an interval named `name` if it is in
/// `1..=MAX_INTERVAL_SECS`.
pub fn interval_secs(name: &str, secs: u64) -> Result<Duration, AgentError> {
    match secs {
        0 => Err(AgentError::Config(format!("{name} must be positive"))),
        secs if secs > MAX_INTERVAL_SECS => Err(AgentError::Config(format!(
            "{name}={secs} exceeds the maximum of {MAX_INTERVAL_SECS} seconds"
        ))),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration, AgentError> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| AgentError::Config(format!("{name}={raw:?}: {e}")))?;
    interval_secs(name, secs)
}

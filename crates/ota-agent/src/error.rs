use ota_control::ControlMapError;
use ota_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("control map error: {0}")]
    Control(#[from] ControlMapError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("update manager unavailable: {0}")]
    External(String),
    #[error("control socket error: {0}")]
    Io(String),
    #[error("request rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl AgentError {
    /// True when the caller submitted a malformed control map.
    pub fn is_invalid_control_map(&self) -> bool {
        match self {
            AgentError::Control(err) => err.is_invalid(),
            AgentError::Rejected { code, .. } => code == "invalid_control_map",
            _ => false,
        }
    }
}

use ota_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlMapError {
    #[error("invalid control map: {0}")]
    InvalidControlMap(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("corrupt control map record '{key}': {message}")]
    Corrupt { key: String, message: String },
    #[error("control map encoding error: {0}")]
    Encode(String),
}

impl ControlMapError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ControlMapError::InvalidControlMap(msg.into())
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ControlMapError::InvalidControlMap(_))
    }
}

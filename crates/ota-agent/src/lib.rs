//! Update manager daemon: owns the control map service, expires maps on
//! schedule and serves the control socket.

pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod handle;

pub use config::AgentConfig;
pub use control::{ControlClient, ControlError, ControlServer, RequestEnvelope, ResponseEnvelope};
pub use daemon::{ControlMapEvent, ControlMsg, UpdateManagerDaemon};
pub use error::AgentError;
pub use handle::UpdateManagerHandle;

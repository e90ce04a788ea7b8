//! ==============================================================================
//! error.rs - agent error taxonomy
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     one error type for the protocol engine. the variant tells the caller
//!     how bad it is:
//!     - fatal-startup: Io / Json / Toml / InvalidConfig / Connect
//!     - fatal-session: ConnectionClosed / Send
//!     - recoverable:   Sample / Upload (logged, never end the session)
//!
//!     recoverable request errors (unknown method, id not found...) never
//!     become an AgentError; the dispatcher turns them into a
//!     `{"result": false, "error": ...}` response instead.
//! ```
//!
//! ==============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("can not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("write socket error: {0}")]
    Send(#[source] std::io::Error),

    #[error("sampling failed: {0}")]
    Sample(String),

    #[error("upload failed: {0}")]
    Upload(String),
}

impl AgentError {
    /// errors that must end the main loop
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AgentError::Sample(_) | AgentError::Upload(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

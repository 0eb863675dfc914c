use thiserror::Error;

use crate::format::ContainerFormat;
use crate::host::HostError;

/// Failures surfaced to the message listener for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    /// The host cannot decode the selected container.
    #[error("unsupported container format: {0}")]
    UnsupportedFormat(ContainerFormat),

    /// The decode buffer rejected a chunk as malformed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The inbound message itself was invalid.
    #[error("invalid message: {0}")]
    Transport(String),

    /// Opening the sink or decode session failed.
    #[error("session initialization failed: {0}")]
    Initialization(String),

    /// The chunk belongs to a session that was superseded, completed or torn down.
    #[error("playback {0} is no longer active")]
    Inactive(String),

    /// Any other host-level failure.
    #[error(transparent)]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

impl PlayerError {
    /// Whether this error ends the session it occurred in.
    ///
    /// Transport errors describe a bad message and inactive errors describe a session that
    /// is already gone; neither tears anything down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PlayerError::Transport(_) | PlayerError::Inactive(_))
    }
}

//! Channel error types.

use thiserror::Error;

/// Errors surfaced across the channel boundary.
///
/// Runtime faults (connection drops, bad frames, orphan updates) never show
/// up here; they are absorbed into connection-state changes, log lines, and
/// notifications. What remains is construction-time validation and the
/// transport-level connect failure the driver handles internally.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid server origin '{0}': expected an http:// or https:// URL")]
    InvalidOrigin(String),

    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

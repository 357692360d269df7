//! Error taxonomy for the message reconciler and its collaborators
//!
//! Transport and mark-read failures are best-effort and get logged at the
//! core boundary. History-load and upload failures are surfaced to the caller
//! so it can offer a retry.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Socket unreachable or disconnected. Recovered by the transport's own
    /// reconnection policy.
    #[error("transport unavailable: {0}")]
    Transport(String),

    /// History fetch failed (network or non-2xx). Retryable by the user.
    #[error("failed to load history for room {room_id}: {reason}")]
    HistoryLoad { room_id: String, reason: String },

    /// File upload failed. Never partially merged into the message sequence.
    #[error("upload failed: {0}")]
    Upload(String),

    /// Read receipt could not be delivered. Logged and dropped.
    #[error("mark-read failed for room {room_id}: {reason}")]
    MarkRead { room_id: String, reason: String },

    /// Any other REST call rejected by the backend.
    #[error("API request failed: {0}")]
    Api(String),

    #[error("no room selected")]
    NoRoom,

    #[error("no recipient known for room {0}")]
    NoRecipient(String),
}

impl ChatError {
    /// Whether the UI should offer a manual retry for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::HistoryLoad { .. } | ChatError::Upload(_))
    }
}

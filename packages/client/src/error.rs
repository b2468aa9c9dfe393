//! Error types for the lobby synchronization client.
//!
//! Errors are captured at the synchronizer boundary and turned into
//! observable view state; nothing in this crate propagates a panic for a
//! failure that the UI should display instead.

use thiserror::Error;

/// Errors surfaced by the synchronizers and the session manager
#[derive(Debug, Error)]
pub enum SyncError {
    /// Lobby code does not match the `XXX-XXX` shape; carries the raw
    /// candidate for error display
    #[error("invalid lobby code '{0}'")]
    InvalidLobbyCode(String),

    /// Channel or stream failure (recovered via retry)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Store query failure outside of a toggle
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reconnection attempts exhausted; terminal until a manual reset
    #[error("reconnection attempts exhausted")]
    ExhaustedRetries,

    /// A toggle-ban mutation was rejected server-side; the optimistic
    /// change has been rolled back
    #[error("ban toggle rejected: {0}")]
    MutationConflict(String),

    /// Toggle requested for an item not present in the local cache
    #[error("item '{0}' not found")]
    ItemNotFound(String),
}

/// Realtime channel / stream transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("channel closed")]
    Closed,

    /// The transport variant does not support this operation
    /// (e.g. presence tracking over a broadcast-only SSE stream)
    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),
}

/// Data store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

//! Sync error handling
//!
//! Typed errors for the connection and synchronization layers.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by the connection manager and the state synchronizer
#[derive(Error, Debug)]
pub enum SyncError {
    /// Outbound action or payload failed validation; nothing was written
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// No open connection (or the handle used is no longer the live one)
    #[error("Not connected: the socket is not open. The client will reconnect automatically.")]
    NotConnected,

    /// WebSocket transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// Connection attempt did not complete in time
    #[error("Timed out after {0:?} waiting for the connection to open")]
    ConnectTimeout(Duration),

    /// No acknowledgement or snapshot arrived for a request in time
    #[error("Timed out after {0:?} waiting for the server to confirm the action")]
    ConfirmationTimeout(Duration),

    /// The server never sent a snapshot of a collection
    #[error("Timed out after {0:?} waiting for a snapshot from the server")]
    SnapshotTimeout(Duration),

    /// JSON encoding failed
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The connection manager has been shut down
    #[error("Connection manager has shut down")]
    Shutdown,
}

impl SyncError {
    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NotConnected
                | SyncError::Transport(_)
                | SyncError::ConnectTimeout(_)
                | SyncError::ConfirmationTimeout(_)
                | SyncError::SnapshotTimeout(_)
        )
    }

    /// Short hint for front ends
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::NotConnected | SyncError::ConnectTimeout(_) => {
                Some("Check that the server is running and the URL is correct (crudwire config show).")
            }
            SyncError::MalformedPayload(_) => {
                Some("Actions are <customer|item>:<create|read|read-all|update|delete|delete-all> with a JSON array payload.")
            }
            _ => None,
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
